//! Typed, synchronous-by-default façade over the bus driver's request-block
//! interface.

use std::mem;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::device::ChiefDevice;
use crate::kernel::{Completion, Error, Irp, Mdl, Result, Status};
use crate::usb::urb::{
    select_configuration_request_size, vendor_request_type, SelectConfigurationRequest,
    IOCTL_INTERNAL_USB_GET_PORT_STATUS, IOCTL_INTERNAL_USB_RESET_PORT,
    IOCTL_INTERNAL_USB_SUBMIT_URB,
};
use crate::usb::{
    find_interface, ConfigBlock, ConfigDescriptor, DescriptorKind, DeviceDescriptor, PipeHandle,
    PipeInfo, PortStatus, TransferFlags, Urb, VendorRequestHeader,
};

/// Alternate settings the driver accepts; only index 0 is exercised today.
pub const SUPPORTED_ALT_SETTINGS: u8 = 2;

/// First guess for the configuration-descriptor fetch; grown to the reported
/// total length when it does not fit.
const CONFIG_DESC_PROBE_SIZE: usize = 64;

impl ChiefDevice {
    /// Submit a request block to the bus driver and wait for its completion.
    /// Runs at passive level only.
    pub(crate) fn submit_urb(&self, urb: &Arc<Mutex<Urb>>) -> Status {
        let lower = match self.attached() {
            Ok(lower) => lower,
            Err(err) => return err.status(),
        };

        trace!("submitting {:?}", urb.lock().function());

        let irp = Irp::internal_device_control(IOCTL_INTERNAL_USB_SUBMIT_URB);
        irp.attach_urb(Arc::clone(urb));

        let mut status = lower.call(Arc::clone(&irp));
        if status == Status::PENDING {
            irp.wait();
            status = irp.io_status().status;
        }
        status
    }

    /// Send or receive a vendor control request. `header.length` and `data`
    /// are updated in place on a receive.
    pub(crate) fn vendor_request(
        &self,
        header: &mut VendorRequestHeader,
        data: &mut Vec<u8>,
        receive: bool,
    ) -> Status {
        let length = header.length as usize;
        let mut buffer = Vec::new();
        if length > 0 {
            if receive {
                buffer = vec![0; length];
            } else {
                buffer = data[..length].to_vec();
            }
        }

        let flags = if receive {
            TransferFlags::DIRECTION_IN | TransferFlags::SHORT_TRANSFER_OK
        } else {
            TransferFlags::empty()
        };

        // Only the low byte of the 16-bit request code goes on the wire.
        let urb = Arc::new(Mutex::new(Urb::ControlVendorRequest {
            request: (header.request & 0xff) as u8,
            value: header.value,
            index: header.index,
            request_type: vendor_request_type(receive),
            flags,
            buffer,
            transferred: 0,
        }));

        let status = self.submit_urb(&urb);

        if status.is_success() && receive && length > 0 {
            let guard = urb.lock();
            if let Urb::ControlVendorRequest {
                buffer,
                transferred,
                ..
            } = &*guard
            {
                let n = (*transferred).min(buffer.len());
                header.length = n as u16;
                data.clear();
                data.extend_from_slice(&buffer[..n]);
            }
        }

        status
    }

    /// Build a bulk/interrupt request over the caller's MDL and forward it.
    /// The completion routine owns the request from then on: it propagates
    /// the pending mark, drops the transfer's reference, records the transfer
    /// length as information and finishes the request with the bus driver's
    /// status.
    pub(crate) fn send_bulk_or_interrupt(
        self: &Arc<Self>,
        irp: &Arc<Irp>,
        pipe: PipeInfo,
        read: bool,
    ) -> Status {
        let length = irp.mdl().map(Mdl::byte_count).unwrap_or(0);

        let mut flags = TransferFlags::SHORT_TRANSFER_OK;
        if read {
            flags |= TransferFlags::DIRECTION_IN;
        }

        trace!(
            "bulk/interrupt {} of {} bytes on pipe {:?}",
            if read { "in" } else { "out" },
            length,
            pipe.handle
        );

        let urb = Arc::new(Mutex::new(Urb::BulkOrInterruptTransfer {
            pipe: pipe.handle,
            flags,
            mdl: irp.mdl().cloned(),
            transfer_length: length,
        }));
        irp.attach_urb(Arc::clone(&urb));

        let device = Arc::clone(self);
        let completion_urb = Arc::clone(&urb);
        let routine = Box::new(move |irp: &Arc<Irp>| {
            if irp.pending_returned() {
                irp.mark_pending();
            }
            device.lock.decrement_and_notify();

            let transferred = match &*completion_urb.lock() {
                Urb::BulkOrInterruptTransfer {
                    transfer_length, ..
                } => *transfer_length,
                _ => 0,
            };
            let status = irp.io_status().status;
            irp.complete_request(status, transferred);
            Completion::MoreProcessingRequired
        });

        self.lock.increment();
        self.forward_with_completion(irp, routine)
    }

    /// Select interface 0, alternate setting `alternate`, resizing the pipe
    /// bitmap for the new pipe count and adopting the interface information
    /// the bus driver returns.
    pub(crate) fn set_alternate_setting(&self, alternate: u8) -> Status {
        if alternate >= SUPPORTED_ALT_SETTINGS {
            return Status::INVALID_PARAMETER;
        }

        let Some(config) = self.config_block() else {
            return Status::INVALID_PARAMETER;
        };

        let view = match find_interface(&config.raw, 0, alternate) {
            Ok(view) => view,
            Err(err) => {
                warn!("no usable interface for alternate setting {alternate}: {err}");
                return err.status();
            }
        };
        let pipe_count = view.endpoints.len();

        self.lock.resize_pipes(pipe_count);

        let urb = Arc::new(Mutex::new(Urb::SelectConfiguration {
            request: Some(SelectConfigurationRequest {
                configuration_value: config.descriptor.configuration_value,
                interface_number: view.descriptor.number,
                alternate_setting: alternate,
                pipe_count,
            }),
            request_length: select_configuration_request_size(pipe_count),
            interface: None,
        }));

        let status = self.submit_urb(&urb);
        if status.is_error() {
            return status;
        }

        let returned = match &*urb.lock() {
            Urb::SelectConfiguration { interface, .. } => interface.clone(),
            _ => None,
        };
        match returned {
            Some(interface) => {
                debug!(
                    "selected alternate setting {} with {} pipes",
                    alternate,
                    interface.pipe_count()
                );
                self.set_interface_info(Some(interface));
                status
            }
            None => {
                warn!("select configuration returned no interface information");
                Status::DEVICE_DATA_ERROR
            }
        }
    }

    /// Fetch the 18-byte device descriptor.
    pub(crate) fn get_device_descriptor(&self) -> Result<DeviceDescriptor> {
        let urb = Arc::new(Mutex::new(Urb::GetDescriptor {
            kind: DescriptorKind::Device,
            index: 0,
            language_id: 0,
            buffer: vec![0; mem::size_of::<DeviceDescriptor>()],
            transferred: 0,
        }));

        self.submit_urb(&urb).result()?;

        let guard = urb.lock();
        let Urb::GetDescriptor { buffer, .. } = &*guard else {
            return Err(Error::new(Status::DEVICE_DATA_ERROR));
        };
        plain::from_bytes(buffer)
            .map(|descriptor: &DeviceDescriptor| *descriptor)
            .map_err(|_| Error::new(Status::DEVICE_DATA_ERROR))
    }

    /// Fetch the configuration descriptor, growing the buffer to the
    /// reported total length until the whole block fits. The returned block
    /// is owned by the caller.
    pub(crate) fn get_configuration_descriptor(&self) -> Result<ConfigBlock> {
        let mut buffer_size = CONFIG_DESC_PROBE_SIZE;

        loop {
            let urb = Arc::new(Mutex::new(Urb::GetDescriptor {
                kind: DescriptorKind::Configuration,
                index: 0,
                language_id: 0,
                buffer: vec![0; buffer_size],
                transferred: 0,
            }));

            self.submit_urb(&urb).result()?;

            let (buffer, transferred) = {
                let mut guard = urb.lock();
                match &mut *guard {
                    Urb::GetDescriptor {
                        buffer,
                        transferred,
                        ..
                    } => (mem::take(buffer), *transferred),
                    _ => return Err(Error::new(Status::DEVICE_DATA_ERROR)),
                }
            };

            if transferred == 0 {
                return ConfigBlock::parse(buffer).map_err(|err| Error::new(err.status()));
            }

            let descriptor: ConfigDescriptor = *plain::from_bytes(&buffer)
                .map_err(|_| Error::new(Status::INVALID_PARAMETER))?;
            let total = descriptor.total_length as usize;
            if total <= buffer_size {
                return ConfigBlock::parse(buffer).map_err(|err| Error::new(err.status()));
            }

            debug!(
                "configuration descriptor needs {} bytes, refetching",
                total
            );
            buffer_size = total;
        }
    }

    /// Deselect the configuration. On success the held descriptor is
    /// released, leaving the device unconfigured.
    pub(crate) fn clear_configuration(&self) -> Status {
        let urb = Arc::new(Mutex::new(Urb::SelectConfiguration {
            request: None,
            request_length: select_configuration_request_size(0),
            interface: None,
        }));

        let status = self.submit_urb(&urb);
        if status.is_success() {
            self.set_config_block(None);
        }
        status
    }

    /// Clear a stall condition on one pipe.
    pub(crate) fn reset_pipe(&self, pipe: PipeHandle) -> Status {
        let urb = Arc::new(Mutex::new(Urb::ResetPipe { pipe }));
        self.submit_urb(&urb)
    }

    /// Abort every pipe some handle still references. Each aborted pipe has
    /// its allocation bit cleared and the references of its open handles
    /// dropped; the first bus error stops the walk.
    pub(crate) fn abort_pipes(&self) -> Status {
        let Some(interface) = self.interface_info() else {
            return Status::SUCCESS;
        };
        if interface.pipes.is_empty() {
            return Status::SUCCESS;
        }

        let allocated = self.lock.allocated_pipes();
        for (index, pipe) in interface.pipes.iter().enumerate() {
            if !allocated.get(index).copied().unwrap_or(false) {
                continue;
            }

            let urb = Arc::new(Mutex::new(Urb::AbortPipe { pipe: pipe.handle }));
            let status = self.submit_urb(&urb);
            if status.is_error() {
                warn!("abort of pipe {index} failed: {status}");
                return status;
            }

            for _ in 0..self.lock.revoke_pipe(index) {
                self.lock.decrement();
            }
        }

        Status::SUCCESS
    }

    /// Read the upstream port state from the bus driver.
    pub(crate) fn port_status(&self) -> Result<PortStatus> {
        let lower = self.attached()?;

        let irp = Irp::internal_device_control(IOCTL_INTERNAL_USB_GET_PORT_STATUS);
        let mut status = lower.call(Arc::clone(&irp));
        if status == Status::PENDING {
            irp.wait();
            status = irp.io_status().status;
        }
        status.result()?;

        Ok(PortStatus::from_bits_truncate(
            irp.io_status().information as u32,
        ))
    }

    /// Cycle the upstream port.
    pub(crate) fn reset_upstream_port(&self) -> Status {
        let lower = match self.attached() {
            Ok(lower) => lower,
            Err(err) => return err.status(),
        };

        let irp = Irp::internal_device_control(IOCTL_INTERNAL_USB_RESET_PORT);
        let mut status = lower.call(Arc::clone(&irp));
        if status == Status::PENDING {
            irp.wait();
            status = irp.io_status().status;
        }
        status
    }

    /// Recovery after a failed bulk/interrupt transfer: clear the pipe
    /// stall, then reset the upstream port when the port is connected but
    /// not enabled. Skipped once removal is underway.
    pub(crate) fn recover_stalled_pipe(&self, pipe: PipeInfo) {
        if self.lock.removed() || self.lock.remove_pending() {
            return;
        }

        let status = self.reset_pipe(pipe.handle);
        if status.is_error() {
            warn!("pipe reset failed: {status}");
        }

        match self.port_status() {
            Ok(port) => {
                if port.contains(PortStatus::CONNECTED) && !port.contains(PortStatus::ENABLED) {
                    debug!("port connected but not enabled, resetting upstream port");
                    let status = self.reset_upstream_port();
                    if status.is_error() {
                        warn!("upstream port reset failed: {status}");
                    }
                }
            }
            Err(err) => warn!("port status read failed: {err}"),
        }
    }
}
