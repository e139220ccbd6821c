//! Device identification and HID access
//!
//! [`DeviceIdentity`] parses what the user typed, [`DeviceResolver`] turns it into a
//! configuration plus the identifiers to open, and [`hid`] provides the transport.

pub mod hid;
pub mod identity;
pub mod resolver;

pub use hid::{DeviceError, DeviceGuard, HidApiBackend, HidBackend, HidDeviceInfo, ReportSource};
pub use identity::{DeviceIdentity, IdentityError};
pub use resolver::{DeviceDescriptor, DeviceResolver, IdOverrides, Resolution, ResolveError};
