//! Environment detection module.
//!
//! Determines whether this process runs on the host or inside a container, and
//! therefore where the host's root filesystem (cgroupfs included) is reachable.
mod checks;
mod detect;
mod error;

pub use detect::{Detector, RuntimeEnvironment, detect_runtime_environment, resolve_host_root};
pub use error::{Error, Result};
