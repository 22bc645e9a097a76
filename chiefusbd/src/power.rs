//! Power state machine: system-to-device mapping, set-power handling, and
//! the ordering obligations toward the power framework.
//!
//! Every handled power request notifies the framework for the next one
//! exactly once, before it is forwarded or completed. A set-power request
//! that would not change the device state is forwarded untouched.

use std::sync::Arc;

use log::{debug, warn};

use crate::device::ChiefDevice;
use crate::kernel::{
    Completion, DevicePowerState, Irp, PowerMinor, PowerType, Status, SystemPowerState,
};

impl ChiefDevice {
    /// Map a system power state to the device power state the capabilities
    /// table prescribes. States at or beyond `Maximum` map to the deepest
    /// sleep.
    pub fn system_to_device(&self, system: SystemPowerState) -> DevicePowerState {
        if system >= SystemPowerState::Maximum {
            return DevicePowerState::D3;
        }
        self.capabilities().device_state[system as usize]
    }

    pub(crate) fn dispatch_power(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        let minor = match irp.kind() {
            crate::kernel::IrpKind::Power(minor) => *minor,
            _ => return Status::INVALID_PARAMETER,
        };

        match minor {
            PowerMinor::SetPower(PowerType::System(system)) => {
                self.handle_system_set_power(irp, system)
            }
            PowerMinor::SetPower(PowerType::Device(device)) => {
                self.handle_device_set_power(irp, device)
            }
            PowerMinor::QueryPower(_) | PowerMinor::PowerSequence => {
                self.power_framework().start_next_power_irp(&irp);
                self.forward(&irp)
            }
            PowerMinor::WaitWake => {
                // The device reports no wake capability.
                self.power_framework().start_next_power_irp(&irp);
                irp.complete_request(Status::NOT_SUPPORTED, 0);
                Status::NOT_SUPPORTED
            }
        }
    }

    /// A system set-power request: compute the matching device state and,
    /// when it differs from the current one, ask the framework for a device
    /// set-power request. The original request is held and forwarded from
    /// that request's completion.
    fn handle_system_set_power(self: &Arc<Self>, irp: Arc<Irp>, system: SystemPowerState) -> Status {
        let target = self.system_to_device(system);
        self.power_framework().start_next_power_irp(&irp);

        if target == self.current_power_state() {
            return self.forward(&irp);
        }

        debug!(
            "system state {:?} moves device {:?} -> {:?}",
            system,
            self.current_power_state(),
            target
        );

        self.set_target_power_state(target);
        irp.mark_pending();
        self.power_irp_issued();

        let device = Arc::clone(self);
        let original = Arc::clone(&irp);
        let result = self.power_framework().request_power_irp(
            target,
            Box::new(move |status: Status| {
                if status.is_error() {
                    warn!("device power request finished with {status}");
                }
                device.forward(&original);
                device.power_irp_finished();
            }),
        );

        if let Err(err) = result {
            warn!("power framework refused the device power request: {err}");
            self.power_irp_finished();
            irp.complete_request(err.status(), 0);
            return err.status();
        }

        Status::PENDING
    }

    /// A device set-power request. Power-up is recorded on the way back up
    /// so the state only changes once the stack below has reached D0;
    /// power-down is recorded immediately.
    fn handle_device_set_power(
        self: &Arc<Self>,
        irp: Arc<Irp>,
        state: DevicePowerState,
    ) -> Status {
        self.power_framework().start_next_power_irp(&irp);
        self.set_target_power_state(state);

        if state == DevicePowerState::D0 {
            let device = Arc::clone(self);
            return self.forward_with_completion(
                &irp,
                Box::new(move |irp: &Arc<Irp>| {
                    if irp.pending_returned() {
                        irp.mark_pending();
                    }
                    device.set_current_power_state(DevicePowerState::D0);
                    Completion::Continue
                }),
            );
        }

        if state > DevicePowerState::Unspecified && state < DevicePowerState::Maximum {
            self.set_current_power_state(state);
        }
        self.forward(&irp)
    }
}
