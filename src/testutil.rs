//! In-memory stand-ins for the host and the container runtime.
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cgroup::{self, CgroupBackend, CgroupVersion, DeviceController, DeviceRule};
use crate::container::{Container, ContainerID, Mount};
use crate::device::{self, DeviceIdentity, DeviceInspector, DeviceType};
use crate::docker::{self, ContainerEvent, ContainerRuntime, ContainerSummary, EventAction, EventSource};
use crate::fsutil::FileWriteError;
use crate::mountinfo::{self, CgroupMount};

/// Device nodes keyed by path; every other path fails to stat.
#[derive(Debug, Default)]
pub struct FakeDevices {
    devices: HashMap<PathBuf, DeviceIdentity>,
    inspected: Mutex<Vec<PathBuf>>,
}

impl FakeDevices {
    pub fn new(entries: &[(&str, DeviceType, u32, u32)]) -> Self {
        Self {
            devices: entries
                .iter()
                .map(|&(path, kind, major, minor)| {
                    (PathBuf::from(path), DeviceIdentity { kind, major, minor })
                })
                .collect(),
            inspected: Mutex::default(),
        }
    }

    pub fn with_device(mut self, path: impl Into<PathBuf>, kind: DeviceType, major: u32, minor: u32) -> Self {
        self.devices
            .insert(path.into(), DeviceIdentity { kind, major, minor });
        self
    }

    pub fn inspected(&self) -> Vec<PathBuf> {
        self.inspected.lock().unwrap().clone()
    }
}

impl DeviceInspector for FakeDevices {
    fn inspect(&self, path: &Path) -> device::Result<DeviceIdentity> {
        self.inspected.lock().unwrap().push(path.to_path_buf());
        self.devices
            .get(path)
            .copied()
            .ok_or_else(|| device::Error::Stat {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
    }
}

impl DeviceInspector for Arc<FakeDevices> {
    fn inspect(&self, path: &Path) -> device::Result<DeviceIdentity> {
        self.as_ref().inspect(path)
    }
}

#[derive(Debug)]
struct CgroupState {
    version: Option<CgroupVersion>,
    mount: Option<CgroupMount>,
    fail_submissions: bool,
    submissions: Mutex<Vec<(PathBuf, DeviceRule)>>,
}

/// Cgroup control plane that records submitted rules.
#[derive(Debug, Clone)]
pub struct FakeCgroups {
    state: Arc<CgroupState>,
}

impl FakeCgroups {
    fn new(version: Option<CgroupVersion>, mount: Option<CgroupMount>, fail: bool) -> Self {
        Self {
            state: Arc::new(CgroupState {
                version,
                mount,
                fail_submissions: fail,
                submissions: Mutex::default(),
            }),
        }
    }

    /// v1 host with the container's devices cgroup at `/docker/abc`.
    pub fn v1() -> Self {
        Self::new(
            Some(CgroupVersion::V1),
            Some(CgroupMount {
                root: PathBuf::from("/docker/abc"),
                mount_point: PathBuf::from("/sys/fs/cgroup/devices"),
            }),
            false,
        )
    }

    /// Version detection fails for every pid.
    pub fn undetectable() -> Self {
        Self::new(None, None, false)
    }

    /// Version is detected, but no cgroup mount is found.
    pub fn unmounted() -> Self {
        Self::new(Some(CgroupVersion::V2), None, false)
    }

    pub fn failing_submissions(self) -> Self {
        Self::new(self.state.version, self.state.mount.clone(), true)
    }

    pub fn submissions(&self) -> Vec<(PathBuf, DeviceRule)> {
        self.state.submissions.lock().unwrap().clone()
    }
}

impl CgroupBackend for FakeCgroups {
    fn detect_version(&self, pid: u32) -> cgroup::Result<CgroupVersion> {
        self.state.version.ok_or_else(|| cgroup::Error::NoDeviceCgroup {
            path: PathBuf::from(format!("/proc/{pid}/cgroup")),
        })
    }

    fn controller(&self, version: CgroupVersion) -> Box<dyn DeviceController> {
        Box::new(FakeController {
            version,
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeController {
    version: CgroupVersion,
    state: Arc<CgroupState>,
}

impl DeviceController for FakeController {
    fn version(&self) -> CgroupVersion {
        self.version
    }

    fn resolve_mount(&self, pid: u32) -> cgroup::Result<CgroupMount> {
        self.state.mount.clone().ok_or_else(|| {
            cgroup::Error::Mount(mountinfo::Error::MissingMount {
                path: PathBuf::from(format!("/proc/{pid}/mountinfo")),
                fs_type: "cgroup",
                controller: Some("devices"),
            })
        })
    }

    fn add_device_rules(&self, cgroup_path: &Path, rules: &[DeviceRule]) -> cgroup::Result<()> {
        if self.state.fail_submissions {
            return Err(cgroup::Error::Write(FileWriteError {
                path: cgroup_path.join("devices.allow"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            }));
        }
        let mut submissions = self.state.submissions.lock().unwrap();
        for rule in rules {
            submissions.push((cgroup_path.to_path_buf(), *rule));
        }
        Ok(())
    }
}

/// Container runtime serving a fixed set of containers and events.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: HashMap<ContainerID, (String, Container)>,
    events: Mutex<VecDeque<ContainerEvent>>,
    /// What happens after the last event: `true` fails the stream, `false` ends it.
    fail_stream: bool,
    fail_list: bool,
    unreachable: bool,
    inspected: Mutex<Vec<ContainerID>>,
}

impl FakeRuntime {
    pub fn with_container<S: AsRef<Path>>(
        mut self,
        id: &str,
        image: &str,
        pid: u32,
        mounts: &[(S, &str)],
    ) -> Self {
        let id = ContainerID::new(id).unwrap();
        let container = Container {
            id: id.clone(),
            pid,
            mounts: mounts
                .iter()
                .map(|(s, d)| Mount::new(s.as_ref(), *d))
                .collect(),
        };
        self.containers.insert(id, (image.to_owned(), container));
        self
    }

    pub fn with_event(self, action: EventAction, id: &str) -> Self {
        self.events.lock().unwrap().push_back(ContainerEvent {
            action,
            id: ContainerID::new(id).unwrap(),
        });
        self
    }

    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn inspected(&self) -> Vec<ContainerID> {
        self.inspected.lock().unwrap().clone()
    }
}

fn daemon_error() -> docker::Error {
    docker::Error::Api {
        status: 500,
        message: "daemon on fire".to_owned(),
    }
}

impl ContainerRuntime for FakeRuntime {
    type Events = FakeEvents;

    async fn list_containers(&self) -> docker::Result<Vec<ContainerSummary>> {
        if self.fail_list || self.unreachable {
            return Err(daemon_error());
        }
        let mut summaries: Vec<ContainerSummary> = self
            .containers
            .iter()
            .filter(|(_, (_, c))| c.is_running())
            .map(|(id, (image, _))| ContainerSummary {
                id: id.clone(),
                image: image.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.as_ref().cmp(b.id.as_ref()));
        Ok(summaries)
    }

    async fn inspect(&self, id: &ContainerID) -> docker::Result<Container> {
        self.inspected.lock().unwrap().push(id.clone());
        if self.unreachable {
            return Err(daemon_error());
        }
        self.containers
            .get(id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| docker::Error::NotFound(id.to_string()))
    }

    async fn subscribe(&self) -> docker::Result<FakeEvents> {
        if self.unreachable {
            return Err(daemon_error());
        }
        Ok(FakeEvents {
            events: std::mem::take(&mut *self.events.lock().unwrap()),
            fail: self.fail_stream,
        })
    }
}

pub struct FakeEvents {
    events: VecDeque<ContainerEvent>,
    fail: bool,
}

impl EventSource for FakeEvents {
    async fn next_event(&mut self) -> docker::Result<Option<ContainerEvent>> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.fail => Err(daemon_error()),
            None => Ok(None),
        }
    }
}
