//! Driver bootstrap: device and symbolic-link creation, attachment to the
//! stack, and the query-capabilities round-trip.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::device::ChiefDevice;
use crate::kernel::{
    Completion, DeviceCapabilities, Event, Irp, LowerDevice, ObjectNamespace, PnpMinor,
    PowerFramework, Result, Status,
};

pub const DEVICE_NAME: &str = r"\Device\ChiefUSB";
pub const SYMBOLIC_LINK_NAME: &str = r"\DosDevices\ChiefUSB";

/// The driver object: the services handed over at load time, and the
/// add-device entry the PnP manager calls for each device instance.
pub struct Driver {
    namespace: Arc<dyn ObjectNamespace>,
    power_framework: Arc<dyn PowerFramework>,
}

impl Driver {
    pub fn new(
        namespace: Arc<dyn ObjectNamespace>,
        power_framework: Arc<dyn PowerFramework>,
    ) -> Self {
        Self {
            namespace,
            power_framework,
        }
    }

    /// Create the named device object and its symbolic link, attach above
    /// the physical device, learn the device capabilities, and take the
    /// structural reference that keeps the count from draining before final
    /// removal.
    pub fn add_device(&self, physical: Arc<dyn LowerDevice>) -> Result<Arc<ChiefDevice>> {
        self.namespace.create_device(DEVICE_NAME)?;
        if let Err(err) = self
            .namespace
            .create_symbolic_link(SYMBOLIC_LINK_NAME, DEVICE_NAME)
        {
            self.namespace.delete_device(DEVICE_NAME);
            return Err(err);
        }

        let device = Arc::new(ChiefDevice::new(
            Arc::clone(&self.namespace),
            Arc::clone(&self.power_framework),
            physical,
        ));
        device.attach_to_stack();

        // The capabilities table feeds the power machine; keep the seeded
        // defaults when the stack below cannot answer.
        if let Err(err) = query_capabilities(&device) {
            warn!("query-capabilities round-trip failed: {err}");
        }

        device.lock.increment();
        debug!("{} added", DEVICE_NAME);

        Ok(device)
    }

    /// Nothing to unwind here: each device instance tears itself down on
    /// final removal.
    pub fn unload(&self) {}
}

/// Round-trip a query-capabilities request through the stack below and adopt
/// the table it fills in.
fn query_capabilities(device: &Arc<ChiefDevice>) -> Result<()> {
    let table = Arc::new(Mutex::new(DeviceCapabilities::default()));

    let irp = Irp::pnp(PnpMinor::QueryCapabilities(Arc::clone(&table)));
    irp.set_io_status(Status::NOT_SUPPORTED, 0);

    let done = Arc::new(Event::new());
    let signal = Arc::clone(&done);
    device.forward_with_completion(
        &irp,
        Box::new(move |_irp: &Arc<Irp>| {
            signal.set();
            Completion::MoreProcessingRequired
        }),
    );
    done.wait();

    irp.io_status().status.result()?;
    device.set_capabilities(table.lock().clone());
    Ok(())
}
