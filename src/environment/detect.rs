use std::path::{Path, PathBuf};

use super::checks::{
    contains_proc_mount, has_container_marker_files, is_pid_namespace_isolated,
    matches_container_cgroup,
};
use super::{Error, Result};

/// Where this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    /// Running directly on the host.
    Host,
    /// Running inside a containerized environment (e.g., Docker, Kubernetes, Podman).
    Container,
}

/// Locations inspected by the environment heuristics.
#[derive(Debug, Clone)]
pub struct Detector {
    /// procfs of this process, usually `/proc`.
    pub proc_root: PathBuf,
    /// Root of this process's filesystem, usually `/`.
    pub root: PathBuf,
    /// Whether the `container` environment variable is set.
    pub container_env: bool,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            root: PathBuf::from("/"),
            container_env: std::env::var_os("container").is_some(),
        }
    }
}

impl Detector {
    /// Runs the heuristics against the host root mounted at `rootfs`:
    ///
    /// 1. pid 1 under `rootfs` lives in a different pid namespace.
    /// 2. this process's cgroup path carries container runtime markers.
    /// 3. container marker files or the `container` variable are present.
    ///
    /// Failing checks are logged as warnings and count as "not detected".
    pub fn detect(&self, rootfs: &Path) -> RuntimeEnvironment {
        match contains_proc_mount(rootfs) {
            Ok(true) => match is_pid_namespace_isolated(&self.proc_root, rootfs) {
                Ok(true) => return RuntimeEnvironment::Container,
                Ok(false) => {}
                Err(err) => log::warn!(
                    "Namespace check failed when detecting runtime environment: {}",
                    err
                ),
            },
            Ok(false) => {}
            Err(err) => log::warn!("Failed to determine presence of /proc in rootfs: {}", err),
        }

        match matches_container_cgroup(self.proc_root.join("self/cgroup")) {
            Ok(true) => return RuntimeEnvironment::Container,
            Ok(false) => {}
            Err(err) => log::warn!("Cgroup analysis failed during runtime detection: {}", err),
        }

        if self.container_env || has_container_marker_files(&self.root) {
            return RuntimeEnvironment::Container;
        }

        RuntimeEnvironment::Host
    }

    /// Returns where the host root filesystem is reachable: `rootfs` inside a
    /// container, `/` on the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHostRoot`] if running in a container without `rootfs`.
    pub fn resolve_host_root(&self, rootfs: &Path) -> Result<PathBuf> {
        match self.detect(rootfs) {
            RuntimeEnvironment::Container => {
                if !rootfs.is_dir() {
                    return Err(Error::MissingHostRoot {
                        path: rootfs.to_path_buf(),
                    });
                }
                log::info!("Running in a container, host root at {}", rootfs.display());
                Ok(rootfs.to_path_buf())
            }
            RuntimeEnvironment::Host => {
                log::info!("Running on the host");
                Ok(PathBuf::from("/"))
            }
        }
    }
}

/// [`Detector::detect`] with the default locations.
pub fn detect_runtime_environment(rootfs: impl AsRef<Path>) -> RuntimeEnvironment {
    Detector::default().detect(rootfs.as_ref())
}

/// [`Detector::resolve_host_root`] with the default locations.
pub fn resolve_host_root(rootfs: impl AsRef<Path>) -> Result<PathBuf> {
    Detector::default().resolve_host_root(rootfs.as_ref())
}
