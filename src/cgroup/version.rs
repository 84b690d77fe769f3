use std::fmt;
use std::io::BufRead;
use std::path::Path;

use crate::fsutil;

use super::{Error, Result};

/// Generation of the cgroup hierarchy holding a process's device controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CgroupVersion {
    /// Legacy hierarchy with a dedicated `devices` controller.
    V1,
    /// Unified hierarchy, device access is filtered by eBPF programs.
    V2,
}

impl CgroupVersion {
    pub fn as_number(&self) -> u8 {
        match self {
            CgroupVersion::V1 => 1,
            CgroupVersion::V2 => 2,
        }
    }
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_number())
    }
}

/// Detects which cgroup version governs device access of `pid`.
///
/// Reads `<proc_root>/<pid>/cgroup`. A line listing the `devices` controller selects
/// v1, otherwise a unified (`0::`) line selects v2. On hybrid hosts the v1 devices
/// hierarchy therefore wins wherever it is listed.
///
/// # Errors
///
/// - [`Error::FileOpen`] / [`Error::ReadLine`] if the file cannot be read.
/// - [`Error::CgroupLine`] if a line is malformed.
/// - [`Error::NoDeviceCgroup`] if neither kind of line is present.
pub fn detect_version(proc_root: impl AsRef<Path>, pid: u32) -> Result<CgroupVersion> {
    let path = proc_root.as_ref().join(pid.to_string()).join("cgroup");
    let reader = fsutil::open_file_reader(&path)?;

    detect_version_from_reader(reader, &path)
}

fn detect_version_from_reader<R: BufRead>(mut reader: R, origin: &Path) -> Result<CgroupVersion> {
    let mut line = String::with_capacity(255);
    let mut unified = false;

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        let cgl = parse_cgroup_line(line.trim_end()).map_err(|source| Error::CgroupLine {
            path: origin.to_path_buf(),
            source,
        })?;

        if cgl.controller_list.contains(&"devices") {
            return Ok(CgroupVersion::V1);
        }
        unified |= cgl.hierarchy_id == 0 && cgl.controller_list.is_empty();

        line.clear();
    }

    if unified {
        return Ok(CgroupVersion::V2);
    }
    Err(Error::NoDeviceCgroup {
        path: origin.to_path_buf(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum CgroupLineError {
    #[error("invalid cgroup line format: {0}")]
    InvalidFormat(String),
    #[error("invalid hierarchy id in cgroup line: {0}")]
    InvalidHierarchyID(String),
}

/// One `<hierarchy-id>:<controller-list>:<cgroup-path>` line of `/proc/<pid>/cgroup`.
///
/// - v1: arbitrary hierarchy id, comma separated controllers.
/// - v2: hierarchy id `0`, empty controller list.
#[derive(Debug)]
pub struct CgroupLine<'a> {
    pub hierarchy_id: u32,
    pub controller_list: Vec<&'a str>,
    pub cgroup_path: &'a str,
}

pub fn parse_cgroup_line(line: &str) -> std::result::Result<CgroupLine<'_>, CgroupLineError> {
    let mut it = line.splitn(3, ':');
    let hierarchy_id = it
        .next()
        .ok_or_else(|| CgroupLineError::InvalidFormat(line.to_owned()))?
        .parse::<u32>()
        .map_err(|_| CgroupLineError::InvalidHierarchyID(line.to_owned()))?;
    let controller_list = it
        .next()
        .ok_or_else(|| CgroupLineError::InvalidFormat(line.to_owned()))?;
    let controller_list: Vec<&str> = if controller_list.is_empty() {
        Vec::default()
    } else {
        controller_list.split(',').collect()
    };
    // cgroup paths may legally contain ':', hence `splitn`
    let cgroup_path = it
        .next()
        .ok_or_else(|| CgroupLineError::InvalidFormat(line.to_owned()))?;

    Ok(CgroupLine {
        hierarchy_id,
        controller_list,
        cgroup_path: cgroup_path.trim(),
    })
}
