//! Device cgroup control plane.
//!
//! Grants device access by adding allow rules to a process's device cgroup. The two
//! cgroup generations expose this very differently:
//!
//! - v1 has a `devices` controller; a rule is a line written to `devices.allow`.
//! - v2 has no device controller file; access is decided by `BPF_CGROUP_DEVICE`
//!   programs attached to the cgroup, so granting means patching those programs.
//!
//! Both are hidden behind [`DeviceController`]. Which one applies to a process is
//! decided by [`detect_version`], and [`CgroupBackend`] ties both together so callers
//! can substitute the whole control plane.
mod bpf;
mod error;
mod program;
pub mod v1;
pub mod v2;
mod version;

use std::fmt;
use std::path::{Component, Path, PathBuf};

pub use bpf::{Attached, BpfError, BpfOps, LibBpf};
pub use error::{Error, Result};
pub use program::ProgramError;
pub use version::{CgroupLine, CgroupLineError, CgroupVersion, detect_version, parse_cgroup_line};

use crate::device::{DeviceIdentity, DeviceType};
use crate::mountinfo::CgroupMount;

/// Default root of procfs.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Rejects mounts whose cgroup root climbs above the mount point.
///
/// Such roots (e.g. `/../docker-abc.scope`) show up when this process lives in a
/// cgroup namespace of its own, the container's cgroup is then not reachable
/// through the mount.
pub(crate) fn checked_mount(pid: u32, mount: CgroupMount) -> Result<CgroupMount> {
    if mount
        .root
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::OutsideCgroupNamespace {
            pid,
            root: mount.root,
        });
    }
    Ok(mount)
}

/// Access modes of a device rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAccess {
    pub read: bool,
    pub write: bool,
    pub mknod: bool,
}

impl DeviceAccess {
    /// `rwm`, the only access this crate ever grants.
    pub const ALL: DeviceAccess = DeviceAccess {
        read: true,
        write: true,
        mknod: true,
    };

    pub fn is_all(&self) -> bool {
        *self == Self::ALL
    }
}

impl fmt::Display for DeviceAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (enabled, flag) in [(self.read, "r"), (self.write, "w"), (self.mknod, "m")] {
            if enabled {
                f.write_str(flag)?;
            }
        }
        Ok(())
    }
}

/// A device cgroup rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRule {
    pub access: DeviceAccess,
    pub kind: DeviceType,
    pub major: u32,
    pub minor: u32,
    pub allow: bool,
}

impl DeviceRule {
    /// Rule granting full (`rwm`) access to `device`.
    pub fn allow_all(device: DeviceIdentity) -> Self {
        Self {
            access: DeviceAccess::ALL,
            kind: device.kind,
            major: device.major,
            minor: device.minor,
            allow: true,
        }
    }
}

/// Formats the rule in the cgroup v1 `devices.allow` syntax, e.g. `c 188:0 rwm`.
impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} {}",
            self.kind.as_char(),
            self.major,
            self.minor,
            self.access
        )
    }
}

/// Where the device rules of one container go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupTarget {
    pub version: CgroupVersion,
    /// Absolute path of the container's cgroup directory, as reachable from this process.
    pub path: PathBuf,
}

/// Version specific device access operations.
pub trait DeviceController: Send + Sync {
    fn version(&self) -> CgroupVersion;

    /// Finds the cgroup filesystem mount holding the device cgroup of `pid`.
    fn resolve_mount(&self, pid: u32) -> Result<CgroupMount>;

    /// Adds `rules` to the cgroup at `cgroup_path`.
    fn add_device_rules(&self, cgroup_path: &Path, rules: &[DeviceRule]) -> Result<()>;
}

/// Entry point to the cgroup control plane.
pub trait CgroupBackend: Send + Sync {
    fn detect_version(&self, pid: u32) -> Result<CgroupVersion>;

    fn controller(&self, version: CgroupVersion) -> Box<dyn DeviceController>;
}

/// [`CgroupBackend`] operating on the real procfs and cgroupfs.
#[derive(Debug, Clone)]
pub struct HostCgroups {
    proc_root: PathBuf,
}

impl Default for HostCgroups {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl HostCgroups {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl CgroupBackend for HostCgroups {
    fn detect_version(&self, pid: u32) -> Result<CgroupVersion> {
        detect_version(&self.proc_root, pid)
    }

    fn controller(&self, version: CgroupVersion) -> Box<dyn DeviceController> {
        match version {
            CgroupVersion::V1 => Box::new(v1::Devices::new(&self.proc_root)),
            CgroupVersion::V2 => Box::new(v2::Devices::new(&self.proc_root)),
        }
    }
}
