//! PnP state machine: start, stop, query and cancel transitions, surprise
//! removal, and the final teardown sequence.
//!
//! Every PnP dispatch holds one per-call reference; each transition releases
//! it exactly once on every exit path, inline or from its completion
//! routine.

use std::sync::Arc;

use log::{debug, warn};

use crate::device::ChiefDevice;
use crate::driver::{DEVICE_NAME, SYMBOLIC_LINK_NAME};
use crate::kernel::{Completion, Event, Irp, IrpKind, PnpMinor, Status};

/// Admission flag a query transition arms and its cancel transition clears.
#[derive(Clone, Copy, Debug)]
enum PendingTransition {
    Stop,
    Remove,
}

impl ChiefDevice {
    pub(crate) fn dispatch_pnp(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        let minor = match irp.kind() {
            IrpKind::Pnp(minor) => minor.clone(),
            _ => return Status::INVALID_PARAMETER,
        };

        match minor {
            PnpMinor::StartDevice => self.start_device(irp),
            PnpMinor::StopDevice => self.stop_device(irp),
            PnpMinor::QueryStopDevice => self.query_transition(irp, PendingTransition::Stop),
            PnpMinor::QueryRemoveDevice => self.query_transition(irp, PendingTransition::Remove),
            PnpMinor::CancelStopDevice => self.cancel_transition(irp, PendingTransition::Stop),
            PnpMinor::CancelRemoveDevice => {
                self.cancel_transition(irp, PendingTransition::Remove)
            }
            PnpMinor::SurpriseRemoval => self.surprise_removal(irp),
            PnpMinor::RemoveDevice => self.remove_device(irp),
            PnpMinor::QueryCapabilities(_) | PnpMinor::Other(_) => {
                let status = self.forward(&irp);
                self.lock.decrement_and_notify();
                status
            }
        }
    }

    /// Start: let the stack below start first, then bring up the USB side of
    /// the device. The request is completed here in every case.
    fn start_device(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        let started = Arc::new(Event::new());
        let signal = Arc::clone(&started);
        self.forward_with_completion(
            &irp,
            Box::new(move |_irp: &Arc<Irp>| {
                signal.set();
                Completion::MoreProcessingRequired
            }),
        );
        started.wait();

        let mut status = irp.io_status().status;
        if status.is_success() {
            status = self.configure_device();
        } else {
            warn!("lower driver failed start: {status}");
        }

        self.lock.decrement_and_notify();
        irp.complete_request(status, 0);
        status
    }

    /// USB bring-up after a successful start: device descriptor, then the
    /// configuration descriptor, then alternate setting 0. A failed device
    /// descriptor fetch only costs the cached specification level.
    fn configure_device(&self) -> Status {
        match self.get_device_descriptor() {
            Ok(descriptor) => self.set_bcd_usb(Some(descriptor.usb)),
            Err(err) => {
                warn!("device descriptor fetch failed: {err}");
                self.set_bcd_usb(None);
            }
        }

        let config = match self.get_configuration_descriptor() {
            Ok(config) => config,
            Err(err) => {
                warn!("configuration descriptor fetch failed: {err}");
                return err.status();
            }
        };
        debug!(
            "configured: {} bytes, configuration value {}",
            config.raw.len(),
            config.descriptor.configuration_value
        );
        self.set_config_block(Some(config));

        self.set_alternate_setting(0)
    }

    /// Stop: deconfigure, lift the hold, and only involve the stack below
    /// when the deconfiguration worked.
    fn stop_device(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        let status = self.clear_configuration();
        self.lock.set_hold_new_requests(false);

        let status = if status.is_success() {
            self.forward(&irp)
        } else {
            warn!("deconfigure failed during stop: {status}");
            irp.complete_request(status, 0);
            status
        };

        self.lock.decrement_and_notify();
        status
    }

    /// Query-stop / query-remove: the admission flag is armed only once the
    /// stack below has agreed, so the flag flip and the per-call release
    /// both live in the completion routine.
    fn query_transition(self: &Arc<Self>, irp: Arc<Irp>, transition: PendingTransition) -> Status {
        let device = Arc::clone(self);
        self.forward_with_completion(
            &irp,
            Box::new(move |irp: &Arc<Irp>| {
                if irp.pending_returned() {
                    irp.mark_pending();
                }
                if irp.io_status().status.is_success() {
                    debug!("query {:?} accepted, holding new requests", transition);
                    match transition {
                        PendingTransition::Stop => device.lock.set_hold_new_requests(true),
                        PendingTransition::Remove => device.lock.set_remove_pending(true),
                    }
                }
                device.lock.decrement_and_notify();
                Completion::Continue
            }),
        )
    }

    /// Cancel-stop / cancel-remove: nothing to undo while unconfigured, the
    /// request just passes through. Otherwise clear the flag and pass the
    /// request down marked successful.
    fn cancel_transition(self: &Arc<Self>, irp: Arc<Irp>, transition: PendingTransition) -> Status {
        let status = if !self.configured() {
            self.forward(&irp)
        } else {
            debug!("cancel {:?}, admitting new requests again", transition);
            match transition {
                PendingTransition::Stop => self.lock.set_hold_new_requests(false),
                PendingTransition::Remove => self.lock.set_remove_pending(false),
            }
            irp.set_io_status(Status::SUCCESS, 0);
            self.forward(&irp)
        };

        self.lock.decrement_and_notify();
        status
    }

    /// The device is gone without warning: stop admitting, abort what is in
    /// flight, and acknowledge.
    fn surprise_removal(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        self.lock.decrement_and_notify();
        self.lock.set_removed();

        let status = self.abort_pipes();
        if status.is_error() {
            warn!("pipe abort during surprise removal: {status}");
        }

        irp.set_io_status(Status::SUCCESS, 0);
        self.forward(&irp)
    }

    /// Final removal. The steps are ordered and none may move: flag, abort,
    /// forward, release the structural reference, drain, free, unlink,
    /// detach, delete.
    fn remove_device(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        self.lock.decrement_and_notify();
        self.lock.set_removed();

        let status = self.abort_pipes();
        if status.is_error() {
            warn!("pipe abort during removal: {status}");
        }

        let status = self.forward(&irp);

        // The reference taken at add-device; from here the count can reach
        // zero.
        self.lock.decrement_and_notify();
        debug!("waiting for open handles and transfers to drain");
        self.lock.drain();

        self.clear_usb_state();
        self.lock.resize_pipes(0);

        self.namespace().delete_symbolic_link(SYMBOLIC_LINK_NAME);
        self.detach();
        self.namespace().delete_device(DEVICE_NAME);
        debug!("device removed");

        status
    }
}
