//! Per-major-function entry points. Each one is a thin envelope: admission
//! check, a reference on the device lock for the duration of the call, then
//! the subsystem that does the work.

use std::sync::Arc;

use log::{debug, warn};

use crate::device::ChiefDevice;
use crate::kernel::{Irp, IrpKind, Mdl, Status};
use crate::usb::VendorRequestHeader;

/// Device-control codes accepted from user mode (buffered transport).
pub const IOCTL_VENDOR_REQUEST_OUT: u32 = 0x0022_0000;
pub const IOCTL_VENDOR_REQUEST_IN: u32 = 0x0022_0004;
pub const IOCTL_SELECT_ALTERNATE_SETTING: u32 = 0x0022_0008;
pub const IOCTL_READ_BCD_USB: u32 = 0x0022_000C;

/// Largest read or write carried by a single bulk/interrupt transfer.
/// Anything bigger is refused; splitting stays a future extension.
pub const MAX_TRANSFER_SIZE: usize = 64_000;

const VENDOR_HEADER_SIZE: usize = core::mem::size_of::<VendorRequestHeader>();

impl ChiefDevice {
    /// The driver's dispatch table.
    pub fn dispatch(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        match irp.kind() {
            IrpKind::Create { .. } => self.dispatch_create(irp),
            IrpKind::Close => self.dispatch_close(irp),
            IrpKind::Read => self.dispatch_read_write(irp, true),
            IrpKind::Write => self.dispatch_read_write(irp, false),
            IrpKind::DeviceControl { .. } => self.dispatch_device_control(irp),
            IrpKind::Power(_) => {
                self.lock.increment();
                let status = self.dispatch_power(irp);
                self.lock.decrement_and_notify();
                status
            }
            IrpKind::Pnp(_) => {
                // The PnP machine owns the release; some transitions defer
                // it into a completion routine.
                self.lock.increment();
                self.dispatch_pnp(irp)
            }
            IrpKind::SystemControl | IrpKind::InternalDeviceControl { .. } => {
                self.lock.increment();
                let status = self.forward(&irp);
                self.lock.decrement_and_notify();
                status
            }
        }
    }

    fn dispatch_create(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        self.lock.increment();
        let status = self.create_inner(&irp);
        self.lock.decrement_and_notify();
        status
    }

    fn create_inner(&self, irp: &Arc<Irp>) -> Status {
        if let Err(err) = self.admission_check() {
            irp.complete_request(err.status(), 0);
            return err.status();
        }

        let path = match irp.kind() {
            IrpKind::Create { path } => path.clone(),
            _ => String::new(),
        };

        // No digits anywhere at the tail: the control file, no pipe.
        let Some(value) = parse_pipe_suffix(&path) else {
            irp.complete_request(Status::SUCCESS, 0);
            return Status::SUCCESS;
        };

        let open = usize::try_from(value)
            .ok()
            .and_then(|index| self.open_pipe(index));
        let (Some(file), Some(open)) = (irp.file(), open) else {
            warn!("open of {:?} does not name a pipe", path);
            irp.complete_request(Status::INVALID_PARAMETER, 0);
            return Status::INVALID_PARAMETER;
        };

        debug!("open claims pipe {}", open.index);
        file.bind_pipe(open);
        // Every open that selects a pipe holds its own reference.
        self.lock.claim_pipe(open.index);
        self.lock.increment();

        irp.complete_request(Status::SUCCESS, 0);
        Status::SUCCESS
    }

    fn dispatch_close(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        self.lock.increment();

        if let Some(open) = irp.file().and_then(|file| file.take_pipe()) {
            debug!("close releases pipe {}", open.index);
            // Unless the teardown abort already revoked this handle's share,
            // the close drops the reference its open took.
            if self.lock.release_pipe(open.index) {
                self.lock.decrement_and_notify();
            }
        }
        irp.complete_request(Status::SUCCESS, 0);

        self.lock.decrement_and_notify();
        Status::SUCCESS
    }

    fn dispatch_read_write(self: &Arc<Self>, irp: Arc<Irp>, read: bool) -> Status {
        self.lock.increment();
        let status = self.read_write_inner(&irp, read);
        self.lock.decrement_and_notify();
        status
    }

    fn read_write_inner(self: &Arc<Self>, irp: &Arc<Irp>, read: bool) -> Status {
        if let Err(err) = self.admission_check() {
            irp.complete_request(err.status(), 0);
            return err.status();
        }

        // Reads and writes only make sense on a pipe handle.
        let Some(open) = irp.file().and_then(|file| file.pipe()) else {
            irp.complete_request(Status::INVALID_HANDLE, 0);
            return Status::INVALID_HANDLE;
        };

        let length = irp.mdl().map(Mdl::byte_count).unwrap_or(0);
        if length > MAX_TRANSFER_SIZE {
            irp.complete_request(Status::NOT_IMPLEMENTED, 0);
            return Status::NOT_IMPLEMENTED;
        }

        let status = self.send_bulk_or_interrupt(irp, open.info, read);
        if status.is_error() {
            self.recover_stalled_pipe(open.info);
        }
        status
    }

    fn dispatch_device_control(self: &Arc<Self>, irp: Arc<Irp>) -> Status {
        self.lock.increment();
        let status = self.device_control_inner(&irp);
        self.lock.decrement_and_notify();
        status
    }

    fn device_control_inner(self: &Arc<Self>, irp: &Arc<Irp>) -> Status {
        if let Err(err) = self.admission_check() {
            irp.complete_request(err.status(), 0);
            return err.status();
        }

        let code = match irp.kind() {
            IrpKind::DeviceControl { code } => *code,
            _ => 0,
        };

        match code {
            IOCTL_VENDOR_REQUEST_OUT => self.vendor_ioctl(irp, false),
            IOCTL_VENDOR_REQUEST_IN => self.vendor_ioctl(irp, true),
            IOCTL_SELECT_ALTERNATE_SETTING => {
                let buffer = irp.system_buffer().clone();
                let Ok(header) = plain::from_bytes::<VendorRequestHeader>(&buffer) else {
                    irp.complete_request(Status::INVALID_PARAMETER, 0);
                    return Status::INVALID_PARAMETER;
                };
                let alternate = (header.request & 0xff) as u8;
                let status = self.set_alternate_setting(alternate);
                irp.complete_request(status, 0);
                status
            }
            IOCTL_READ_BCD_USB => match self.bcd_usb() {
                Some(bcd) => {
                    let mut buffer = irp.system_buffer();
                    if buffer.len() < 2 {
                        buffer.resize(2, 0);
                    }
                    buffer[..2].copy_from_slice(&bcd.to_le_bytes());
                    drop(buffer);
                    irp.complete_request(Status::SUCCESS, 2);
                    Status::SUCCESS
                }
                None => {
                    irp.complete_request(Status::DEVICE_DATA_ERROR, 0);
                    Status::DEVICE_DATA_ERROR
                }
            },
            _ => {
                warn!("unknown device control code {code:#x}");
                irp.complete_request(Status::INVALID_PARAMETER, 0);
                Status::INVALID_PARAMETER
            }
        }
    }

    /// Vendor control through the user payload: header plus
    /// inline data. A receive updates the header length and data in the
    /// user's buffer; a bus failure on a receive leaves the buffer untouched
    /// and surfaces as a device data error.
    fn vendor_ioctl(self: &Arc<Self>, irp: &Arc<Irp>, receive: bool) -> Status {
        let input = irp.system_buffer().clone();
        let Ok(header) = plain::from_bytes::<VendorRequestHeader>(&input) else {
            irp.complete_request(Status::INVALID_PARAMETER, 0);
            return Status::INVALID_PARAMETER;
        };
        let mut header = *header;
        let length = header.length as usize;

        let data_area = &input[VENDOR_HEADER_SIZE..];
        if data_area.len() < length {
            irp.complete_request(Status::INVALID_PARAMETER, 0);
            return Status::INVALID_PARAMETER;
        }
        let mut data = data_area[..length].to_vec();

        let status = self.vendor_request(&mut header, &mut data, receive);

        if !receive {
            irp.complete_request(status, 0);
            return status;
        }

        if status.is_error() {
            irp.complete_request(Status::DEVICE_DATA_ERROR, 0);
            return Status::DEVICE_DATA_ERROR;
        }

        let request = header.request;
        let value = header.value;
        let index = header.index;
        let returned = header.length;

        let mut buffer = irp.system_buffer();
        buffer.clear();
        buffer.extend_from_slice(&request.to_le_bytes());
        buffer.extend_from_slice(&value.to_le_bytes());
        buffer.extend_from_slice(&index.to_le_bytes());
        buffer.extend_from_slice(&returned.to_le_bytes());
        buffer.extend_from_slice(&data);
        drop(buffer);

        irp.complete_request(Status::SUCCESS, returned as usize);
        Status::SUCCESS
    }
}

/// Pipe index from an open path: the rightmost maximal run of decimal
/// digits, base 10. A name that does not end in a digit has no pipe index.
pub(crate) fn parse_pipe_suffix(name: &str) -> Option<u64> {
    let digits = name
        .bytes()
        .rev()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }

    let mut value: u64 = 0;
    for byte in name.bytes().skip(name.len() - digits) {
        value = value
            .saturating_mul(10)
            .saturating_add((byte - b'0') as u64);
    }
    Some(value)
}
