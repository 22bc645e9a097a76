//! Upper function driver core for the Chief USB peripheral.
//!
//! The driver sits above the USB bus driver in a layered stack. It exposes a
//! named device object and a user-visible symbolic link, and brokers opens,
//! bulk/interrupt reads and writes, vendor control requests, power
//! transitions and PnP life-cycle events between user mode and the bus
//! driver below.
//!
//! The host OS, the bus driver and the power framework are reached only
//! through the traits in [`kernel`], so the whole state machine runs and
//! tests anywhere. Four subsystems carry the weight:
//!
//! - request dispatch and forwarding ([`ChiefDevice::dispatch`]),
//! - the reference-counted device lock gating teardown,
//! - the power machine mapping system transitions to device transitions,
//! - the PnP machine owning configuration and removal.

pub mod kernel;
pub mod usb;

mod device;
mod dispatch;
mod driver;
mod lock;
mod pnp;
mod power;
mod transfer;

pub use device::{ChiefDevice, DeviceFlags};
pub use dispatch::{
    IOCTL_READ_BCD_USB, IOCTL_SELECT_ALTERNATE_SETTING, IOCTL_VENDOR_REQUEST_IN,
    IOCTL_VENDOR_REQUEST_OUT, MAX_TRANSFER_SIZE,
};
pub use driver::{Driver, DEVICE_NAME, SYMBOLIC_LINK_NAME};
pub use transfer::SUPPORTED_ALT_SETTINGS;
