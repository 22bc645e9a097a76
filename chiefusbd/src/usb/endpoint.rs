use plain::Plain;
use static_assertions::const_assert_eq;

/// The descriptor for a USB endpoint, returned as part of the configuration
/// block and never requested on its own.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub kind: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

unsafe impl Plain for EndpointDescriptor {}

const_assert_eq!(core::mem::size_of::<EndpointDescriptor>(), 7);

/// Mask ANDed with [`EndpointDescriptor`]`.attributes` to get the endpoint
/// type.
pub const ENDP_ATTR_TY_MASK: u8 = 0x3;

const ENDP_ADDR_DIR_IN: u8 = 0x80;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointTy {
    Ctrl = 0,
    Isoch = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl EndpointDescriptor {
    pub fn ty(self) -> EndpointTy {
        match self.attributes & ENDP_ATTR_TY_MASK {
            0 => EndpointTy::Ctrl,
            1 => EndpointTy::Isoch,
            2 => EndpointTy::Bulk,
            3 => EndpointTy::Interrupt,
            _ => unreachable!(),
        }
    }

    pub fn is_in_endpoint(self) -> bool {
        self.address & ENDP_ADDR_DIR_IN != 0
    }
}
