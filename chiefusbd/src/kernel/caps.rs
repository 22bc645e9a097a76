/// System power states, ordered from fully working to fully off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SystemPowerState {
    #[default]
    Unspecified = 0,
    Working = 1,
    Sleeping1 = 2,
    Sleeping2 = 3,
    Sleeping3 = 4,
    Hibernate = 5,
    Shutdown = 6,
    Maximum = 7,
}

/// Device power states. `D0` is fully on, `D3` is the deepest sleep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DevicePowerState {
    #[default]
    Unspecified = 0,
    D0 = 1,
    D1 = 2,
    D2 = 3,
    D3 = 4,
    Maximum = 5,
}

/// Number of entries in the system-to-device power mapping table.
pub const POWER_MAP_ENTRIES: usize = 32;

/// Capabilities reported by the bus for the device, obtained once through a
/// query-capabilities round-trip during add-device.
#[derive(Clone, Debug)]
pub struct DeviceCapabilities {
    pub version: u32,
    pub address: u32,
    pub ui_number: u32,
    /// Maps each system power state to the device power state the device
    /// should assume for it.
    pub device_state: [DevicePowerState; POWER_MAP_ENTRIES],
    pub device_wake: DevicePowerState,
    pub surprise_removal_ok: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            version: 1,
            address: u32::MAX,
            ui_number: u32::MAX,
            device_state: [DevicePowerState::Unspecified; POWER_MAP_ENTRIES],
            device_wake: DevicePowerState::Unspecified,
            surprise_removal_ok: false,
        }
    }
}
