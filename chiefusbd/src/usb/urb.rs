//! Request blocks and pipe bookkeeping for the bus-driver protocol.

use bitflags::bitflags;
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

use super::{DescriptorKind, EndpointTy};
use crate::kernel::Mdl;

/// Internal device-control codes understood by the bus driver below.
pub const IOCTL_INTERNAL_USB_SUBMIT_URB: u32 = 0x0022_0003;
pub const IOCTL_INTERNAL_USB_RESET_PORT: u32 = 0x0022_0007;
pub const IOCTL_INTERNAL_USB_GET_PORT_STATUS: u32 = 0x0022_0013;

bitflags! {
    /// Direction and policy bits carried by a transfer request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TransferFlags: u32 {
        const DIRECTION_IN = 1 << 0;
        const SHORT_TRANSFER_OK = 1 << 1;
    }
}

bitflags! {
    /// Upstream port state as reported by the bus driver.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PortStatus: u32 {
        const ENABLED = 1 << 0;
        const CONNECTED = 1 << 1;
    }
}

const REQUEST_DEVICE_TO_HOST: u8 = 1;
const REQUEST_HOST_TO_DEVICE: u8 = 0;
const REQUEST_TYPE_VENDOR: u8 = 2;
const REQUEST_RECIPIENT_DEVICE: u8 = 0;

/// bmRequestType bits for a vendor request addressed to the device.
pub fn vendor_request_type(device_to_host: bool) -> u8 {
    let direction = if device_to_host {
        REQUEST_DEVICE_TO_HOST
    } else {
        REQUEST_HOST_TO_DEVICE
    };
    (direction << 7) | (REQUEST_TYPE_VENDOR << 5) | REQUEST_RECIPIENT_DEVICE
}

/// Opaque per-pipe handle assigned by the bus driver when a configuration is
/// selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeHandle(pub u64);

/// One pipe of the active interface, as reported back by the bus driver.
#[derive(Clone, Copy, Debug)]
pub struct PipeInfo {
    pub handle: PipeHandle,
    pub ty: EndpointTy,
    pub address: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// The active interface and its pipes.
#[derive(Clone, Debug)]
pub struct InterfaceInfo {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub pipes: SmallVec<[PipeInfo; 4]>,
}

impl InterfaceInfo {
    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }
}

/// A pipe claimed by an open file handle.
#[derive(Clone, Copy, Debug)]
pub struct OpenPipe {
    pub index: usize,
    pub info: PipeInfo,
}

/// Payload exchanged with user mode for a vendor control request: this
/// header followed by `length` bytes of data.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct VendorRequestHeader {
    pub request: u16,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

unsafe impl plain::Plain for VendorRequestHeader {}

const_assert_eq!(core::mem::size_of::<VendorRequestHeader>(), 8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrbFunction {
    SelectConfiguration,
    BulkOrInterruptTransfer,
    GetDescriptorFromDevice,
    VendorDevice,
    ResetPipe,
    AbortPipe,
}

/// Parameters of a select-configuration request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectConfigurationRequest {
    pub configuration_value: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub pipe_count: usize,
}

/// Sizing rule for a select-configuration request: a fixed header plus one
/// pipe-information block per pipe.
pub fn select_configuration_request_size(pipe_count: usize) -> usize {
    const HEADER: usize = core::mem::size_of::<SelectConfigurationRequest>();
    const PIPE_BLOCK: usize = core::mem::size_of::<PipeInfo>();
    HEADER + pipe_count * PIPE_BLOCK
}

/// A request block for the bus driver. Travels in the argument slot of an
/// internal device-control request; the bus fills in the output fields
/// (`transferred`, `transfer_length`, `interface`) before completing it.
#[derive(Debug)]
pub enum Urb {
    ControlVendorRequest {
        request: u8,
        value: u16,
        index: u16,
        request_type: u8,
        flags: TransferFlags,
        buffer: Vec<u8>,
        transferred: usize,
    },
    BulkOrInterruptTransfer {
        pipe: PipeHandle,
        flags: TransferFlags,
        mdl: Option<Mdl>,
        /// Requested length on the way down, actual transfer length once the
        /// bus driver has completed the request.
        transfer_length: usize,
    },
    GetDescriptor {
        kind: DescriptorKind,
        index: u8,
        language_id: u16,
        buffer: Vec<u8>,
        transferred: usize,
    },
    SelectConfiguration {
        /// `None` deconfigures the device.
        request: Option<SelectConfigurationRequest>,
        request_length: usize,
        interface: Option<InterfaceInfo>,
    },
    ResetPipe {
        pipe: PipeHandle,
    },
    AbortPipe {
        pipe: PipeHandle,
    },
}

impl Urb {
    pub fn function(&self) -> UrbFunction {
        match self {
            Urb::ControlVendorRequest { .. } => UrbFunction::VendorDevice,
            Urb::BulkOrInterruptTransfer { .. } => UrbFunction::BulkOrInterruptTransfer,
            Urb::GetDescriptor { .. } => UrbFunction::GetDescriptorFromDevice,
            Urb::SelectConfiguration { .. } => UrbFunction::SelectConfiguration,
            Urb::ResetPipe { .. } => UrbFunction::ResetPipe,
            Urb::AbortPipe { .. } => UrbFunction::AbortPipe,
        }
    }
}
