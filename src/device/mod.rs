//! Host device classification.
//!
//! Turns a host path into the `(type, major, minor)` triple the device cgroup
//! controllers key their rules on.
mod error;
mod inspect;

pub use error::{Error, Result};
pub use inspect::{DeviceIdentity, DeviceInspector, DeviceType, HostDevices, decode, inspect};
