use super::{Error, Result};
use crate::cgroup::parse_cgroup_line;
use crate::fsutil;
use std::fs;
use std::io::BufRead;
use std::path::Path;

/// Cgroup path fragments left behind by common container runtimes.
const CONTAINER_CGROUP_MARKERS: [&str; 4] = ["docker", "kubepods", "containerd", "libpod"];

/// Returns true if `rootfs` contains a mounted `/proc`.
///
/// # Errors
///
/// Returns [`Error::ExistenceCheck`] if checking the existence of the `/proc` directory fails.
pub fn contains_proc_mount(rootfs: impl AsRef<Path>) -> Result<bool> {
    let path = rootfs.as_ref().join("proc");

    path.try_exists()
        .map_err(|source| Error::ExistenceCheck { path, source })
}

/// Returns true if the pid namespace of this process differs from the one of pid 1
/// under `rootfs`.
///
/// # Errors
///
/// Returns [`Error::ReadSymlink`] if reading either namespace link fails.
pub fn is_pid_namespace_isolated(
    proc_root: impl AsRef<Path>,
    rootfs: impl AsRef<Path>,
) -> Result<bool> {
    let self_ns_path = proc_root.as_ref().join("self/ns/pid");
    let self_ns = fs::read_link(&self_ns_path).map_err(|source| Error::ReadSymlink {
        path: self_ns_path.clone(),
        source,
    })?;

    let root_ns_path = rootfs.as_ref().join("proc/1/ns/pid");
    let root_ns = fs::read_link(&root_ns_path).map_err(|source| Error::ReadSymlink {
        path: root_ns_path.clone(),
        source,
    })?;

    Ok(self_ns != root_ns)
}

/// Returns true if a cgroup path in `cgroup_file` (usually `/proc/self/cgroup`)
/// looks like it belongs to a container.
///
/// # Errors
///
/// * [`Error::FileOpen`] if the file cannot be opened.
/// * [`Error::ReadLine`] if a line cannot be read.
/// * [`Error::CgroupLine`] if a line is malformed.
pub fn matches_container_cgroup(cgroup_file: impl AsRef<Path>) -> Result<bool> {
    let path = cgroup_file.as_ref();
    let mut buf = fsutil::open_file_reader(path)?;

    let mut line = String::with_capacity(256);

    while buf.read_line(&mut line).map_err(|source| Error::ReadLine {
        path: path.to_path_buf(),
        source,
    })? != 0
    {
        let cgl = parse_cgroup_line(line.trim_end()).map_err(|source| Error::CgroupLine {
            path: path.to_path_buf(),
            source,
        })?;

        if is_container_cgroup_path(cgl.cgroup_path) {
            return Ok(true);
        }

        line.clear();
    }

    Ok(false)
}

fn is_container_cgroup_path(cgroup_path: &str) -> bool {
    if CONTAINER_CGROUP_MARKERS
        .iter()
        .any(|marker| cgroup_path.contains(marker))
    {
        return true;
    }

    cgroup_path
        .split('/')
        .any(|part| part.len() >= 32 && is_non_empty_hex_string(part))
}

/// Returns true if marker files below `root` suggest a containerized environment.
pub fn has_container_marker_files(root: impl AsRef<Path>) -> bool {
    let root = root.as_ref();
    [".dockerenv", "run/.containerenv"]
        .iter()
        .any(|marker| fs::symlink_metadata(root.join(marker)).is_ok())
}

/// Returns true if the input string is not empty and contains only ASCII hex digits.
pub fn is_non_empty_hex_string(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.chars().all(|c| c.is_ascii_hexdigit())
}
