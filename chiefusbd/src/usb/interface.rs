use static_assertions::const_assert_eq;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub kind: u8,
    pub number: u8,
    pub alternate_setting: u8,
    pub endpoints: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub interface_str: u8,
}

unsafe impl plain::Plain for InterfaceDescriptor {}

const_assert_eq!(core::mem::size_of::<InterfaceDescriptor>(), 9);
