use static_assertions::const_assert_eq;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub kind: u8,
    /// Length of the whole configuration block, trailing interface and
    /// endpoint descriptors included.
    pub total_length: u16,
    pub interfaces: u8,
    pub configuration_value: u8,
    pub configuration_str: u8,
    pub attributes: u8,
    pub max_power: u8,
}

unsafe impl plain::Plain for ConfigDescriptor {}

const_assert_eq!(core::mem::size_of::<ConfigDescriptor>(), 9);
