//! Mountinfo line parser for Linux systems.
//!
//! Parses lines in `/proc/[pid]/mountinfo` format. See
//! [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html)
//! for details on the structure.
use std::borrow::Cow;

/// Represents a parsed mountinfo line.
#[derive(Debug, PartialEq, Eq)]
pub struct MountInfo<'a> {
    /// Root of the mount within the filesystem. For cgroup filesystems this is the
    /// cgroup the mount exposes, relative to the reader's cgroup namespace.
    pub root: Cow<'a, str>,
    /// Mount point relative to the process's root.
    pub mount_point: Cow<'a, str>,
    /// Per-mount options (e.g. `rw,nosuid`).
    pub mount_options: &'a str,
    /// Optional tagged fields (e.g. `shared:20`), possibly empty.
    pub optional_fields: Vec<&'a str>,
    /// Filesystem type (e.g. `cgroup`, `cgroup2`).
    pub fs_type: &'a str,
    /// Source of the mount.
    pub source: &'a str,
    /// Superblock options. For cgroup v1 mounts this lists the attached controllers.
    pub super_options: &'a str,
}

impl MountInfo<'_> {
    /// Returns `true` if `option` appears in the comma separated super options.
    pub fn has_super_option(&self, option: &str) -> bool {
        self.super_options.split(',').any(|opt| opt == option)
    }
}

/// Named fields in a mountinfo line.
#[derive(Debug, PartialEq, Eq)]
pub enum MountInfoField {
    MountId,
    ParentId,
    MajorMinor,
    Root,
    MountPoint,
    MountOptions,
    FsType,
    Source,
    SuperOptions,
}

impl std::fmt::Display for MountInfoField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MountInfoField::MountId => "mount_id",
            MountInfoField::ParentId => "parent_id",
            MountInfoField::MajorMinor => "major:minor",
            MountInfoField::Root => "root",
            MountInfoField::MountPoint => "mount_point",
            MountInfoField::MountOptions => "mount_options",
            MountInfoField::FsType => "fs_type",
            MountInfoField::Source => "source",
            MountInfoField::SuperOptions => "super_options",
        };
        write!(f, "{name}")
    }
}

/// Errors that may occur when parsing a mountinfo line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing separator ` - ` in line: `{0}`")]
    MissingSeparator(String),

    #[error("missing `{field}` in line: `{line}`")]
    MissingField { field: MountInfoField, line: String },
}

/// Parses a single line of mountinfo data.
///
/// Octal escapes the kernel uses for whitespace in paths (`\040`, `\011`, `\012`,
/// `\134`) are decoded in `root` and `mount_point`.
///
/// # Errors
///
/// Returns [`ParseError`] variants for a missing separator or missing required fields.
pub fn parse_mount_info_line(line: &str) -> Result<MountInfo<'_>, ParseError> {
    let (pre, post) = line
        .split_once(" - ")
        .ok_or_else(|| ParseError::MissingSeparator(line.to_owned()))?;

    let missing = |field| ParseError::MissingField {
        field,
        line: line.to_owned(),
    };

    let mut pre_fields = pre.split_whitespace();
    pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::MountId))?;
    pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::ParentId))?;
    pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::MajorMinor))?;
    let root = pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::Root))?;
    let mount_point = pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::MountPoint))?;
    let mount_options = pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::MountOptions))?;
    let optional_fields: Vec<&str> = pre_fields.collect();

    let mut post_fields = post.split_whitespace();
    let fs_type = post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::FsType))?;
    let source = post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::Source))?;
    let super_options = post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::SuperOptions))?;

    Ok(MountInfo {
        root: unescape(root),
        mount_point: unescape(mount_point),
        mount_options,
        optional_fields,
        fs_type,
        source,
        super_options,
    })
}

fn unescape(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value =
                (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cgroup2_line() {
        let line = "33 24 0:28 / /sys/fs/cgroup rw,nosuid,nodev,noexec,relatime shared:9 - cgroup2 cgroup2 rw,nsdelegate,memory_recursiveprot";
        let result = parse_mount_info_line(line).unwrap();

        assert_eq!(result.root, "/");
        assert_eq!(result.mount_point, "/sys/fs/cgroup");
        assert_eq!(result.mount_options, "rw,nosuid,nodev,noexec,relatime");
        assert_eq!(result.optional_fields, vec!["shared:9"]);
        assert_eq!(result.fs_type, "cgroup2");
        assert_eq!(result.source, "cgroup2");
        assert!(result.has_super_option("nsdelegate"));
    }

    #[test]
    fn parses_cgroup_v1_devices_line() {
        let line = "40 31 0:35 /docker/4f3c2b1a /sys/fs/cgroup/devices rw,nosuid,nodev,noexec,relatime shared:20 - cgroup cgroup rw,devices";
        let result = parse_mount_info_line(line).unwrap();

        assert_eq!(result.root, "/docker/4f3c2b1a");
        assert_eq!(result.mount_point, "/sys/fs/cgroup/devices");
        assert_eq!(result.fs_type, "cgroup");
        assert!(result.has_super_option("devices"));
        assert!(!result.has_super_option("dev"));
    }

    #[test]
    fn parses_line_without_optional_fields() {
        let line = "36 25 0:32 / /sys rw - sysfs sysfs rw";
        let result = parse_mount_info_line(line).unwrap();
        assert!(result.optional_fields.is_empty());
        assert_eq!(result.fs_type, "sysfs");
    }

    #[test]
    fn decodes_escaped_whitespace() {
        let line = r"70 56 0:45 / /mnt/with\040space rw - ext4 /dev/sdb1 rw";
        let result = parse_mount_info_line(line).unwrap();
        assert_eq!(result.mount_point, "/mnt/with space");
    }

    #[test]
    fn keeps_trailing_backslash() {
        assert_eq!(unescape(r"/odd\04"), r"/odd\04");
        assert_eq!(unescape(r"/odd\"), r"/odd\");
    }

    #[test]
    fn error_on_missing_separator() {
        let line = "42 35 0:22 / /mnt rw,nosuid ext4 /dev/sda1 rw";
        assert!(matches!(
            parse_mount_info_line(line).unwrap_err(),
            ParseError::MissingSeparator(_)
        ));
    }

    #[test]
    fn error_on_missing_mount_point() {
        let line = "42 35 0:22 / - ext4 /dev/sda1 rw";
        match parse_mount_info_line(line).unwrap_err() {
            ParseError::MissingField { field, .. } => {
                assert_eq!(field, MountInfoField::MountPoint);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_on_missing_super_options() {
        let line = "42 35 0:22 / /mnt rw - ext4 /dev/sda1";
        match parse_mount_info_line(line).unwrap_err() {
            ParseError::MissingField { field, .. } => {
                assert_eq!(field.to_string(), "super_options");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_on_empty_line() {
        assert!(matches!(
            parse_mount_info_line("").unwrap_err(),
            ParseError::MissingSeparator(_)
        ));
    }
}
