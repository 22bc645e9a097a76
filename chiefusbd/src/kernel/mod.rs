//! Host-OS interface model: the request object, the status vocabulary, the
//! blocking primitives, and the traits the driver's collaborators implement.
//!
//! The driver never reaches the kernel, the bus driver or the power framework
//! directly; everything below it is one of the traits here.

pub mod caps;
pub mod event;
pub mod irp;
pub mod mdl;
pub mod status;

use std::sync::Arc;

pub use caps::{DeviceCapabilities, DevicePowerState, SystemPowerState, POWER_MAP_ENTRIES};
pub use event::Event;
pub use irp::{
    Completion, CompletionRoutine, FileObject, IoStatus, Irp, IrpKind, PnpMinor, PowerMinor,
    PowerType,
};
pub use mdl::Mdl;
pub use status::{Error, Result, Status};

/// The device stack below this driver. Forwarded requests land here.
///
/// Contract: the callee completes every request exactly once. When it defers
/// completion to another thread it marks the request pending and returns
/// [`Status::PENDING`]; otherwise the returned status matches the completion
/// status.
pub trait LowerDevice: Send + Sync {
    fn call(&self, irp: Arc<Irp>) -> Status;
}

/// The power framework's two entry points used by this driver.
pub trait PowerFramework: Send + Sync {
    /// Release the next power request to the driver. Called exactly once per
    /// handled power request, before it is forwarded or completed.
    fn start_next_power_irp(&self, irp: &Arc<Irp>);

    /// Ask the framework to send this device stack a set-power request for
    /// `state`. `on_complete` runs once that request has finished.
    fn request_power_irp(
        &self,
        state: DevicePowerState,
        on_complete: Box<dyn FnOnce(Status) + Send>,
    ) -> Result<()>;
}

/// Named-object services: device objects and the symbolic links user mode
/// opens.
pub trait ObjectNamespace: Send + Sync {
    fn create_device(&self, name: &str) -> Result<()>;
    fn delete_device(&self, name: &str);
    fn create_symbolic_link(&self, link: &str, target: &str) -> Result<()>;
    fn delete_symbolic_link(&self, link: &str);
}
