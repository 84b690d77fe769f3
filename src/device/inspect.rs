use std::fmt;
use std::fs::FileType;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use super::{Error, Result};

/// Kind of a device special file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Block,
    Character,
}

impl DeviceType {
    /// Single letter used by the cgroup v1 `devices.allow` format.
    pub fn as_char(&self) -> char {
        match self {
            DeviceType::Block => 'b',
            DeviceType::Character => 'c',
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Block => f.write_str("block"),
            DeviceType::Character => f.write_str("character"),
        }
    }
}

/// Kernel identity of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub kind: DeviceType,
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.major, self.minor)
    }
}

/// Classifies host paths as devices.
///
/// The production implementation is [`HostDevices`]; the pipeline only relies on this
/// trait so it can be driven with synthetic devices.
pub trait DeviceInspector: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<DeviceIdentity>;
}

/// [`DeviceInspector`] backed by `stat(2)` on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevices;

impl DeviceInspector for HostDevices {
    fn inspect(&self, path: &Path) -> Result<DeviceIdentity> {
        inspect(path)
    }
}

/// Stats `path` (following symlinks) and returns its device identity.
///
/// # Errors
///
/// - [`Error::Stat`] if the path cannot be stat'ed.
/// - [`Error::UnsupportedDeviceType`] if the path is neither a block nor a character device.
/// - [`Error::DeviceNumberOutOfRange`] if major or minor exceed 32 bits.
pub fn inspect(path: impl AsRef<Path>) -> Result<DeviceIdentity> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|source| Error::Stat {
        path: path.to_path_buf(),
        source,
    })?;

    let file_type = metadata.file_type();
    let kind = if file_type.is_block_device() {
        DeviceType::Block
    } else if file_type.is_char_device() {
        DeviceType::Character
    } else {
        return Err(Error::UnsupportedDeviceType {
            path: path.to_path_buf(),
            kind: describe(&file_type),
        });
    };

    let (major, minor) = decode(metadata.rdev());
    let narrow = |number: u64| {
        u32::try_from(number).map_err(|_| Error::DeviceNumberOutOfRange {
            path: path.to_path_buf(),
            number,
        })
    };
    let identity = DeviceIdentity {
        kind,
        major: narrow(major)?,
        minor: narrow(minor)?,
    };
    log::debug!("Found device: {} {}", path.display(), identity);

    Ok(identity)
}

/// Splits a raw `st_rdev` value into `(major, minor)`.
pub fn decode(rdev: u64) -> (u64, u64) {
    let rdev = rdev as libc::dev_t;
    (nix::sys::stat::major(rdev), nix::sys::stat::minor(rdev))
}

fn describe(file_type: &FileType) -> &'static str {
    if file_type.is_dir() {
        "directory"
    } else if file_type.is_file() {
        "regular file"
    } else if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else {
        "special file"
    }
}
