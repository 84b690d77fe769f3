//! Environment driven configuration.
use std::ffi::OsString;
use std::path::PathBuf;

use crate::cgroup::DEFAULT_PROC_ROOT;
use crate::docker::DEFAULT_DOCKER_HOST;
use crate::mounts::DEFAULT_DEVICE_ROOT;

/// Where the host root filesystem is expected when running inside a container.
pub const DEFAULT_ROOTFS_MOUNT_PATH: &str = "/host";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("environment variable `{name}` is not valid unicode")]
    NotUnicode { name: &'static str },
    #[error("environment variable `{name}` must not be empty")]
    Empty { name: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `DOCKER_HOST`
    pub docker_host: String,
    /// `DOCKER_API_VERSION`
    pub docker_api_version: Option<String>,
    /// `ROOTFS_MOUNT_PATH`
    pub rootfs: PathBuf,
    /// `DEVICE_ROOT`
    pub device_root: PathBuf,
    /// `PROC_ROOT`
    pub proc_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_DOCKER_HOST.to_owned(),
            docker_api_version: None,
            rootfs: PathBuf::from(DEFAULT_ROOTFS_MOUNT_PATH),
            device_root: PathBuf::from(DEFAULT_DEVICE_ROOT),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Builds the configuration from `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, Error> {
        let mut config = Config::default();

        if let Some(host) = string_var(&lookup, "DOCKER_HOST")? {
            config.docker_host = host;
        }
        config.docker_api_version = string_var(&lookup, "DOCKER_API_VERSION")?;
        if let Some(rootfs) = path_var(&lookup, "ROOTFS_MOUNT_PATH")? {
            config.rootfs = rootfs;
        }
        if let Some(device_root) = path_var(&lookup, "DEVICE_ROOT")? {
            config.device_root = device_root;
        }
        if let Some(proc_root) = path_var(&lookup, "PROC_ROOT")? {
            config.proc_root = proc_root;
        }

        Ok(config)
    }
}

fn string_var(
    lookup: &impl Fn(&str) -> Option<OsString>,
    name: &'static str,
) -> Result<Option<String>, Error> {
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value
            .into_string()
            .map(Some)
            .map_err(|_| Error::NotUnicode { name }),
    }
}

fn path_var(
    lookup: &impl Fn(&str) -> Option<OsString>,
    name: &'static str,
) -> Result<Option<PathBuf>, Error> {
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.is_empty() => Err(Error::Empty { name }),
        Some(value) => Ok(Some(PathBuf::from(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.docker_host, "unix:///var/run/docker.sock");
        assert_eq!(config.rootfs, PathBuf::from("/host"));
        assert_eq!(config.device_root, PathBuf::from("/dev"));
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DOCKER_HOST", "unix:///run/user/1000/docker.sock"),
            ("DOCKER_API_VERSION", "1.43"),
            ("ROOTFS_MOUNT_PATH", "/rootfs"),
            ("DEVICE_ROOT", "/host/dev"),
            ("PROC_ROOT", "/host/proc"),
        ]))
        .unwrap();

        assert_eq!(config.docker_host, "unix:///run/user/1000/docker.sock");
        assert_eq!(config.docker_api_version.as_deref(), Some("1.43"));
        assert_eq!(config.rootfs, PathBuf::from("/rootfs"));
        assert_eq!(config.device_root, PathBuf::from("/host/dev"));
        assert_eq!(config.proc_root, PathBuf::from("/host/proc"));
    }

    #[test]
    fn test_empty_values() {
        let config = Config::from_lookup(lookup(&[("DOCKER_HOST", ""), ("DOCKER_API_VERSION", "")])).unwrap();
        assert_eq!(config.docker_host, DEFAULT_DOCKER_HOST);
        assert!(config.docker_api_version.is_none());

        let err = Config::from_lookup(lookup(&[("PROC_ROOT", "")])).unwrap_err();
        assert!(matches!(err, Error::Empty { name: "PROC_ROOT" }));
    }

    #[test]
    fn test_non_unicode_value() {
        use std::os::unix::ffi::OsStringExt;

        let err = Config::from_lookup(|name| {
            (name == "DOCKER_HOST").then(|| OsString::from_vec(vec![0x75, 0xff, 0xfe]))
        })
        .unwrap_err();
        assert!(matches!(err, Error::NotUnicode { name: "DOCKER_HOST" }));
    }
}
