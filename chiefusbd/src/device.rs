//! Per-device state: the extension record every subsystem hangs off.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use log::warn;
use parking_lot::Mutex;

use crate::kernel::{
    CompletionRoutine, DeviceCapabilities, DevicePowerState, Error, Irp, LowerDevice,
    ObjectNamespace, PowerFramework, Result, Status,
};
use crate::lock::DeviceLock;
use crate::usb::{ConfigBlock, InterfaceInfo, OpenPipe};

bitflags! {
    /// Device-object flags recorded at creation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        const DIRECT_IO = 1 << 0;
        const POWER_PAGEABLE = 1 << 1;
    }
}

/// USB state owned by the PnP transitions: present exactly while the device
/// is configured.
#[derive(Default)]
pub(crate) struct UsbState {
    pub config: Option<ConfigBlock>,
    pub interface: Option<InterfaceInfo>,
    pub bcd_usb: Option<u16>,
}

struct PowerStates {
    current: DevicePowerState,
    target: DevicePowerState,
}

/// The device extension. One per device stack instance, created at
/// add-device and torn down by final removal.
pub struct ChiefDevice {
    attached: Mutex<Option<Arc<dyn LowerDevice>>>,
    physical: Arc<dyn LowerDevice>,
    namespace: Arc<dyn ObjectNamespace>,
    power_framework: Arc<dyn PowerFramework>,
    capabilities: Mutex<DeviceCapabilities>,
    usb: Mutex<UsbState>,
    power: Mutex<PowerStates>,
    power_irp_count: AtomicI32,
    pub(crate) lock: DeviceLock,
    flags: DeviceFlags,
}

impl ChiefDevice {
    pub(crate) fn new(
        namespace: Arc<dyn ObjectNamespace>,
        power_framework: Arc<dyn PowerFramework>,
        physical: Arc<dyn LowerDevice>,
    ) -> Self {
        Self {
            attached: Mutex::new(None),
            physical,
            namespace,
            power_framework,
            capabilities: Mutex::new(DeviceCapabilities::default()),
            usb: Mutex::new(UsbState::default()),
            power: Mutex::new(PowerStates {
                current: DevicePowerState::D0,
                target: DevicePowerState::D0,
            }),
            power_irp_count: AtomicI32::new(0),
            lock: DeviceLock::new(),
            flags: DeviceFlags::DIRECT_IO | DeviceFlags::POWER_PAGEABLE,
        }
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    /// Attach above the physical device, recording the device the stack
    /// returned as the forwarding target.
    pub(crate) fn attach_to_stack(&self) {
        *self.attached.lock() = Some(Arc::clone(&self.physical));
    }

    pub(crate) fn detach(&self) {
        *self.attached.lock() = None;
    }

    pub(crate) fn attached(&self) -> Result<Arc<dyn LowerDevice>> {
        self.attached
            .lock()
            .clone()
            .ok_or(Error::new(Status::NO_SUCH_DEVICE))
    }

    pub(crate) fn namespace(&self) -> &Arc<dyn ObjectNamespace> {
        &self.namespace
    }

    pub(crate) fn power_framework(&self) -> &Arc<dyn PowerFramework> {
        &self.power_framework
    }

    pub(crate) fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.lock().clone()
    }

    pub(crate) fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        *self.capabilities.lock() = capabilities;
    }

    /// The device is configured exactly while a configuration descriptor is
    /// held.
    pub fn configured(&self) -> bool {
        self.usb.lock().config.is_some()
    }

    /// Gate for non-PnP, non-power requests.
    pub(crate) fn admission_check(&self) -> Result<()> {
        if self.lock.blocked() || !self.configured() {
            return Err(Error::new(Status::DELETE_PENDING));
        }
        Ok(())
    }

    pub(crate) fn config_block(&self) -> Option<ConfigBlock> {
        self.usb.lock().config.clone()
    }

    pub(crate) fn set_config_block(&self, config: Option<ConfigBlock>) {
        self.usb.lock().config = config;
    }

    pub(crate) fn interface_info(&self) -> Option<InterfaceInfo> {
        self.usb.lock().interface.clone()
    }

    pub(crate) fn set_interface_info(&self, interface: Option<InterfaceInfo>) {
        self.usb.lock().interface = interface;
    }

    pub fn bcd_usb(&self) -> Option<u16> {
        self.usb.lock().bcd_usb
    }

    pub(crate) fn set_bcd_usb(&self, bcd: Option<u16>) {
        self.usb.lock().bcd_usb = bcd;
    }

    /// Drop every piece of USB state in one sweep (final removal).
    pub(crate) fn clear_usb_state(&self) {
        let mut usb = self.usb.lock();
        usb.config = None;
        usb.interface = None;
        usb.bcd_usb = None;
    }

    /// Look up pipe `index` in the active interface.
    pub(crate) fn open_pipe(&self, index: usize) -> Option<OpenPipe> {
        let usb = self.usb.lock();
        let interface = usb.interface.as_ref()?;
        let info = *interface.pipes.get(index)?;
        Some(OpenPipe { index, info })
    }

    pub fn current_power_state(&self) -> DevicePowerState {
        self.power.lock().current
    }

    pub(crate) fn set_current_power_state(&self, state: DevicePowerState) {
        self.power.lock().current = state;
    }

    pub fn target_power_state(&self) -> DevicePowerState {
        self.power.lock().target
    }

    pub(crate) fn set_target_power_state(&self, state: DevicePowerState) {
        self.power.lock().target = state;
    }

    pub(crate) fn power_irp_issued(&self) -> i32 {
        self.power_irp_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn power_irp_finished(&self) -> i32 {
        self.power_irp_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Power requests issued through the framework that have not completed.
    pub fn power_irps_in_flight(&self) -> i32 {
        self.power_irp_count.load(Ordering::SeqCst)
    }

    /// Advisory view of the reference count.
    pub fn active_references(&self) -> i32 {
        self.lock.count()
    }

    /// Advisory snapshot of the per-pipe allocation bitmap.
    pub fn claimed_pipes(&self) -> Vec<bool> {
        self.lock.allocated_pipes()
    }

    /// Forward a request to the next lower driver, leaving this level out of
    /// its completion path.
    pub(crate) fn forward(&self, irp: &Arc<Irp>) -> Status {
        match self.attached() {
            Ok(lower) => lower.call(Arc::clone(irp)),
            Err(err) => {
                warn!("forward with no attached device: {:?}", irp.kind());
                irp.complete(err.status());
                err.status()
            }
        }
    }

    /// Forward a request with a completion routine at this level.
    pub(crate) fn forward_with_completion(
        &self,
        irp: &Arc<Irp>,
        routine: CompletionRoutine,
    ) -> Status {
        irp.set_completion(routine);
        match self.attached() {
            Ok(lower) => lower.call(Arc::clone(irp)),
            Err(err) => {
                warn!("forward with no attached device: {:?}", irp.kind());
                irp.complete(err.status());
                err.status()
            }
        }
    }
}
