use crate::fsutil;

use super::parser::parse_mount_info_line;
use super::{Error, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// A cgroup filesystem mount as seen in a process's mountinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMount {
    /// The cgroup exposed by the mount, i.e. the cgroup of the inspected process
    /// when read from the host's cgroup namespace.
    pub root: PathBuf,
    /// Where the cgroup filesystem is mounted.
    pub mount_point: PathBuf,
}

impl CgroupMount {
    /// Joins `host_root`, the mount point and the cgroup root into the absolute
    /// path of the cgroup directory as reachable from this process.
    ///
    /// # Example
    ///
    /// ```
    /// # use std::path::{Path, PathBuf};
    /// # use device_mapping_manager::mountinfo::CgroupMount;
    /// let mount = CgroupMount {
    ///     root: PathBuf::from("/system.slice/docker-abc.scope"),
    ///     mount_point: PathBuf::from("/sys/fs/cgroup"),
    /// };
    /// assert_eq!(
    ///     mount.path_under("/host"),
    ///     Path::new("/host/sys/fs/cgroup/system.slice/docker-abc.scope")
    /// );
    /// ```
    pub fn path_under(&self, host_root: impl AsRef<Path>) -> PathBuf {
        host_root
            .as_ref()
            .join(strip_root(&self.mount_point))
            .join(strip_root(&self.root))
    }
}

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Finds the first mount of filesystem type `fs_type` in the given `mountinfo` file.
///
/// If `controller` is set, only mounts whose super options list that controller are
/// considered, which is how cgroup v1 hierarchies are told apart.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::ReadLine`] if reading from the file fails.
/// - [`Error::Parse`] if parsing any line fails.
/// - [`Error::MissingMount`] if no matching mount is found.
///
/// # Example
///
/// ```no_run
/// use device_mapping_manager::mountinfo::detect_cgroup_mount;
///
/// let mount = detect_cgroup_mount("/proc/self/mountinfo", "cgroup2", None).unwrap();
/// println!("cgroup2 root: {}", mount.mount_point.display());
/// ```
pub fn detect_cgroup_mount(
    path: impl AsRef<Path>,
    fs_type: &'static str,
    controller: Option<&'static str>,
) -> Result<CgroupMount> {
    let path = path.as_ref();
    let buf = fsutil::open_file_reader(path)?;

    detect_cgroup_mount_from_reader(buf, path, fs_type, controller)
}

fn detect_cgroup_mount_from_reader<R: BufRead>(
    mut reader: R,
    origin: &Path,
    fs_type: &'static str,
    controller: Option<&'static str>,
) -> Result<CgroupMount> {
    let mut line = String::with_capacity(256);

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        let mount_info = parse_mount_info_line(line.trim_end()).map_err(|source| Error::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        if mount_info.fs_type == fs_type
            && controller.is_none_or(|controller| mount_info.has_super_option(controller))
        {
            log::debug!(
                "Found `{}` mount point with root `{}`: {}",
                fs_type,
                mount_info.root,
                mount_info.mount_point
            );
            return Ok(CgroupMount {
                root: PathBuf::from(mount_info.root.as_ref()),
                mount_point: PathBuf::from(mount_info.mount_point.as_ref()),
            });
        }

        line.clear();
    }

    Err(Error::MissingMount {
        path: origin.to_path_buf(),
        fs_type,
        controller,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HYBRID: &str = "\
25 1 0:24 / /proc rw,relatime - proc proc rw
31 24 0:27 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
32 31 0:28 /system.slice/docker-abc.scope /sys/fs/cgroup/unified rw,nosuid,nodev,noexec,relatime shared:10 - cgroup2 cgroup2 rw
40 31 0:35 /docker/abc /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:20 - cgroup cgroup rw,cpu,cpuacct
41 31 0:36 /docker/abc /sys/fs/cgroup/devices rw,nosuid,nodev,noexec,relatime shared:21 - cgroup cgroup rw,devices
";

    fn cursor(contents: &str) -> Cursor<Vec<u8>> {
        Cursor::new(contents.as_bytes().to_vec())
    }

    #[test]
    fn test_detect_v1_devices_mount() {
        let mount = detect_cgroup_mount_from_reader(
            cursor(HYBRID),
            Path::new("/dummy"),
            "cgroup",
            Some("devices"),
        )
        .unwrap();
        assert_eq!(mount.root, PathBuf::from("/docker/abc"));
        assert_eq!(mount.mount_point, PathBuf::from("/sys/fs/cgroup/devices"));
    }

    #[test]
    fn test_detect_cgroup2_mount() {
        let mount =
            detect_cgroup_mount_from_reader(cursor(HYBRID), Path::new("/dummy"), "cgroup2", None)
                .unwrap();
        assert_eq!(mount.root, PathBuf::from("/system.slice/docker-abc.scope"));
        assert_eq!(mount.mount_point, PathBuf::from("/sys/fs/cgroup/unified"));
    }

    #[test]
    fn test_detect_missing_mount() {
        let input = "25 1 0:24 / /proc rw,relatime - proc proc rw\n";
        let err = detect_cgroup_mount_from_reader(
            cursor(input),
            Path::new("/dummy"),
            "cgroup",
            Some("devices"),
        )
        .unwrap_err();
        match err {
            Error::MissingMount {
                path, controller, ..
            } => {
                assert_eq!(path, Path::new("/dummy"));
                assert_eq!(controller, Some("devices"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_detect_invalid_line() {
        let err = detect_cgroup_mount_from_reader(
            cursor("invalid mountinfo line"),
            Path::new("/dummy"),
            "cgroup2",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_detect_from_tempfile() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            "42 35 0:39 /kubepods/pod1/ctr /sys/fs/cgroup rw,nosuid,nodev,noexec,relatime - cgroup2 cgroup rw"
        )
        .unwrap();

        let mount = detect_cgroup_mount(tmp.path(), "cgroup2", None).unwrap();
        assert_eq!(mount.root, PathBuf::from("/kubepods/pod1/ctr"));
        assert_eq!(
            mount.path_under("/"),
            PathBuf::from("/sys/fs/cgroup/kubepods/pod1/ctr")
        );
    }

    #[test]
    fn test_detect_missing_file() {
        let err = detect_cgroup_mount("/definitely/does/not/exist", "cgroup2", None).unwrap_err();
        assert!(matches!(err, Error::FileOpen(_)));
    }

    #[test]
    fn test_path_under_root_cgroup() {
        let mount = CgroupMount {
            root: PathBuf::from("/"),
            mount_point: PathBuf::from("/sys/fs/cgroup/devices"),
        };
        assert_eq!(
            mount.path_under("/host"),
            PathBuf::from("/host/sys/fs/cgroup/devices")
        );
    }
}
