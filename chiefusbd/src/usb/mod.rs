//! Wire-level USB data: descriptors, the configuration-block walker, and the
//! request blocks handed to the bus driver.

pub use self::config::ConfigDescriptor;
pub use self::device::DeviceDescriptor;
pub use self::endpoint::{EndpointDescriptor, EndpointTy, ENDP_ATTR_TY_MASK};
pub use self::interface::InterfaceDescriptor;
pub use self::urb::{
    InterfaceInfo, OpenPipe, PipeHandle, PipeInfo, PortStatus, TransferFlags, Urb, UrbFunction,
    VendorRequestHeader,
};

use smallvec::SmallVec;
use thiserror::Error;

use crate::kernel::Status;

mod config;
mod device;
mod endpoint;
mod interface;
pub mod urb;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    None,
    Device,
    Configuration,
    String,
    Interface,
    Endpoint,
    DeviceQualifier,
    OtherSpeedConfiguration,
    InterfacePower,
    OnTheGo,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor block truncated")]
    Truncated,
    #[error("expected descriptor kind {expected}, found {found}")]
    WrongKind { expected: u8, found: u8 },
    #[error("no descriptor for interface {number} alternate setting {alternate}")]
    NoSuchInterface { number: u8, alternate: u8 },
}

impl DescriptorError {
    /// Status surfaced to callers. A missing interface mirrors the parse
    /// helper it replaces and reports resource exhaustion; everything else is
    /// malformed input.
    pub fn status(&self) -> Status {
        match self {
            DescriptorError::NoSuchInterface { .. } => Status::INSUFFICIENT_RESOURCES,
            _ => Status::INVALID_PARAMETER,
        }
    }
}

/// Any descriptor that can appear in the configuration block's data area.
#[derive(Debug)]
enum AnyDescriptor {
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    Other(u8),
}

impl AnyDescriptor {
    fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        if bytes.len() < 2 {
            return None;
        }

        let len = bytes[0] as usize;
        let kind = bytes[1];

        if len < 2 || bytes.len() < len {
            return None;
        }

        Some((
            match kind {
                4 => Self::Interface(*plain::from_bytes(bytes).ok()?),
                5 => Self::Endpoint(*plain::from_bytes(bytes).ok()?),
                _ => Self::Other(kind),
            },
            len,
        ))
    }
}

/// The active configuration descriptor: the raw block as fetched from the
/// device, plus its parsed header.
#[derive(Clone, Debug)]
pub struct ConfigBlock {
    pub raw: Vec<u8>,
    pub descriptor: ConfigDescriptor,
}

impl ConfigBlock {
    /// Adopt a raw configuration block, trimming it to its own
    /// `total_length`.
    pub fn parse(mut raw: Vec<u8>) -> Result<Self, DescriptorError> {
        let descriptor: ConfigDescriptor = *plain::from_bytes(&raw)
            .map_err(|_| DescriptorError::Truncated)?;
        if descriptor.kind != DescriptorKind::Configuration as u8 {
            return Err(DescriptorError::WrongKind {
                expected: DescriptorKind::Configuration as u8,
                found: descriptor.kind,
            });
        }
        let total = descriptor.total_length as usize;
        if total < core::mem::size_of::<ConfigDescriptor>() {
            return Err(DescriptorError::Truncated);
        }
        if total <= raw.len() {
            raw.truncate(total);
        }
        Ok(Self { raw, descriptor })
    }
}

/// An interface located inside a configuration block, with the endpoint
/// descriptors that belong to it.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceView {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: SmallVec<[EndpointDescriptor; 4]>,
}

/// Walk a raw configuration block for interface `number`, alternate setting
/// `alternate`, collecting its endpoint descriptors.
pub fn find_interface(
    raw: &[u8],
    number: u8,
    alternate: u8,
) -> Result<InterfaceView, DescriptorError> {
    let header = core::mem::size_of::<ConfigDescriptor>();
    if raw.len() < header {
        return Err(DescriptorError::Truncated);
    }

    let mut offset = header;
    while offset < raw.len() {
        let Some((descriptor, len)) = AnyDescriptor::parse(&raw[offset..]) else {
            return Err(DescriptorError::Truncated);
        };
        offset += len;

        let AnyDescriptor::Interface(interface) = descriptor else {
            continue;
        };
        if interface.number != number || interface.alternate_setting != alternate {
            continue;
        }

        let mut endpoints = SmallVec::new();
        while endpoints.len() < interface.endpoints as usize && offset < raw.len() {
            let Some((descriptor, len)) = AnyDescriptor::parse(&raw[offset..]) else {
                return Err(DescriptorError::Truncated);
            };
            offset += len;
            match descriptor {
                AnyDescriptor::Endpoint(endpoint) => endpoints.push(endpoint),
                // The next interface begins before all declared endpoints
                // were seen.
                AnyDescriptor::Interface(_) => return Err(DescriptorError::Truncated),
                AnyDescriptor::Other(_) => continue,
            }
        }
        if endpoints.len() < interface.endpoints as usize {
            return Err(DescriptorError::Truncated);
        }

        return Ok(InterfaceView {
            descriptor: interface,
            endpoints,
        });
    }

    Err(DescriptorError::NoSuchInterface { number, alternate })
}
