//! Per-container processing pass.
//!
//! One pass inspects a container, locates the device cgroup of its primary process
//! and grants access to every device mounted into it. Only runtime failures abort
//! the caller; everything else either abandons the container or skips a device.
use std::fmt;
use std::path::PathBuf;

use crate::cgroup::{self, CgroupBackend, CgroupTarget};
use crate::container::{Container, ContainerID};
use crate::device::DeviceInspector;
use crate::docker::{self, ContainerRuntime};
use crate::error::ResultOkLogExt;
use crate::grant::{Grant, GrantLedger, RuleApplier};
use crate::mounts::MountResolver;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to inspect container `{id}`: {source}")]
    Inspect {
        id: ContainerID,
        #[source]
        source: docker::Error,
    },
}

/// Device counts of a completed pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GrantStats {
    pub granted: usize,
    pub already_granted: usize,
    pub failed: usize,
}

impl fmt::Display for GrantStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} granted, {} already granted, {} failed",
            self.granted, self.already_granted, self.failed
        )
    }
}

/// Why a container was given up on.
#[derive(Debug)]
pub enum Abandon {
    /// The container no longer exists.
    Vanished,
    /// The runtime reports no running primary process.
    NotRunning,
    /// The device cgroup of the primary process could not be located.
    Cgroup(cgroup::Error),
}

impl fmt::Display for Abandon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abandon::Vanished => f.write_str("container no longer exists"),
            Abandon::NotRunning => f.write_str("container is not running"),
            Abandon::Cgroup(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Debug)]
pub enum Report {
    Completed(GrantStats),
    Abandoned(Abandon),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Completed(stats) => write!(f, "{stats}"),
            Report::Abandoned(reason) => write!(f, "abandoned: {reason}"),
        }
    }
}

pub struct Processor<C, I> {
    cgroups: C,
    applier: RuleApplier<I>,
    resolver: MountResolver,
    host_root: PathBuf,
}

impl<C, I> Processor<C, I>
where
    C: CgroupBackend,
    I: DeviceInspector,
{
    /// `host_root` is where the host's root filesystem is reachable from this
    /// process, `/` when running on the host.
    pub fn new(cgroups: C, inspector: I, resolver: MountResolver, host_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroups,
            applier: RuleApplier::new(inspector),
            resolver,
            host_root: host_root.into(),
        }
    }

    pub fn ledger(&self) -> &GrantLedger {
        self.applier.ledger()
    }

    /// Grants the container `id` access to all devices mounted into it.
    ///
    /// Blocking filesystem and cgroup work runs via [`tokio::task::block_in_place`],
    /// so this must be called from a multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inspect`] if the runtime failed for any reason other than
    /// the container being gone.
    pub async fn process<R: ContainerRuntime>(&self, runtime: &R, id: &ContainerID) -> Result<Report, Error> {
        let container = match runtime.inspect(id).await {
            Ok(container) => container,
            Err(err) if err.is_not_found() => {
                log::warn!("Container {} no longer exists, skipping", id.short());
                return Ok(Report::Abandoned(Abandon::Vanished));
            }
            Err(source) => {
                return Err(Error::Inspect {
                    id: id.clone(),
                    source,
                });
            }
        };

        if !container.is_running() {
            log::info!("Container {} is not running, skipping", id.short());
            return Ok(Report::Abandoned(Abandon::NotRunning));
        }

        Ok(tokio::task::block_in_place(|| self.grant_devices(&container)))
    }

    fn grant_devices(&self, container: &Container) -> Report {
        let pid = container.pid;

        let version = match self.cgroups.detect_version(pid) {
            Ok(version) => version,
            Err(err) => {
                log::error!("failed to detect cgroup version of process {pid}: {err}");
                return Report::Abandoned(Abandon::Cgroup(err));
            }
        };
        log::info!("The cgroup version for process {pid} is: {version}");

        let controller = self.cgroups.controller(version);
        let mount = match controller.resolve_mount(pid) {
            Ok(mount) => mount,
            Err(err) => {
                log::error!("failed to resolve device cgroup of process {pid}: {err}");
                return Report::Abandoned(Abandon::Cgroup(err));
            }
        };
        let target = CgroupTarget {
            version,
            path: mount.path_under(&self.host_root),
        };
        log::info!(
            "The cgroup path for process {pid} is at {}",
            target.path.display()
        );

        let mut stats = GrantStats::default();
        for path in self.resolver.resolve(&container.mounts) {
            match self
                .applier
                .apply(&container.id, &path, controller.as_ref(), &target, pid)
                .ok_log()
            {
                Some(Grant::Added(_)) => stats.granted += 1,
                Some(Grant::AlreadyGranted(_)) => stats.already_granted += 1,
                None => stats.failed += 1,
            }
        }
        Report::Completed(stats)
    }
}
