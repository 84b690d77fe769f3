//! Applying device rules for single device paths.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::cgroup::{self, CgroupTarget, DeviceController, DeviceRule};
use crate::container::ContainerID;
use crate::device::{self, DeviceIdentity, DeviceInspector};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Inspect(#[from] device::Error),
    #[error("failed to add rule `{rule}` for `{path}`: {source}")]
    Submit {
        path: PathBuf,
        rule: DeviceRule,
        #[source]
        source: cgroup::Error,
    },
}

/// Result of a successful [`RuleApplier::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// The rule was submitted to the cgroup.
    Added(DeviceRule),
    /// The device was already granted to this incarnation of the container.
    AlreadyGranted(DeviceIdentity),
}

#[derive(Debug)]
struct ContainerGrants {
    pid: u32,
    devices: HashSet<DeviceIdentity>,
}

/// Devices granted per container, scoped to the container's current pid.
///
/// A container restart yields a new pid and a fresh cgroup, so a pid change drops
/// everything recorded for the previous incarnation.
#[derive(Debug, Default)]
pub struct GrantLedger {
    grants: DashMap<ContainerID, ContainerGrants>,
}

impl GrantLedger {
    pub fn is_granted(&self, id: &ContainerID, pid: u32, device: &DeviceIdentity) -> bool {
        self.grants
            .get(id)
            .is_some_and(|g| g.pid == pid && g.devices.contains(device))
    }

    /// Records a grant, returns `false` if it was already recorded.
    pub fn record(&self, id: &ContainerID, pid: u32, device: DeviceIdentity) -> bool {
        let mut entry = self
            .grants
            .entry(id.clone())
            .or_insert_with(|| ContainerGrants {
                pid,
                devices: HashSet::new(),
            });
        if entry.pid != pid {
            log::debug!(
                "container {} changed pid {} -> {}, dropping previous grants",
                id.short(),
                entry.pid,
                pid
            );
            entry.pid = pid;
            entry.devices.clear();
        }
        entry.devices.insert(device)
    }

    /// Drops all grants of a container, returns how many devices were recorded.
    pub fn forget(&self, id: &ContainerID) -> usize {
        self.grants
            .remove(id)
            .map_or(0, |(_, grants)| grants.devices.len())
    }

    /// Number of containers with recorded grants.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Turns device paths into submitted device rules.
#[derive(Debug)]
pub struct RuleApplier<I> {
    inspector: I,
    ledger: GrantLedger,
}

impl<I: DeviceInspector> RuleApplier<I> {
    pub fn new(inspector: I) -> Self {
        Self {
            inspector,
            ledger: GrantLedger::default(),
        }
    }

    pub fn ledger(&self) -> &GrantLedger {
        &self.ledger
    }

    /// Grants `rwm` access to the device at `device_path` for the container whose
    /// primary process is `pid`.
    ///
    /// # Errors
    ///
    /// - [`Error::Inspect`] if the path is not a block or character device.
    /// - [`Error::Submit`] if the controller rejected the rule.
    pub fn apply(
        &self,
        container: &ContainerID,
        device_path: &Path,
        controller: &dyn DeviceController,
        target: &CgroupTarget,
        pid: u32,
    ) -> Result<Grant, Error> {
        let device = self.inspector.inspect(device_path)?;

        if self.ledger.is_granted(container, pid, &device) {
            log::debug!(
                "{} ({}) already granted to process {}",
                device_path.display(),
                device,
                pid
            );
            return Ok(Grant::AlreadyGranted(device));
        }

        let rule = DeviceRule::allow_all(device);
        log::info!(
            "Adding device rule `{}` for {} to process {} at {}",
            rule,
            device_path.display(),
            pid,
            target.path.display()
        );
        controller
            .add_device_rules(&target.path, &[rule])
            .map_err(|source| Error::Submit {
                path: device_path.to_path_buf(),
                rule,
                source,
            })?;

        self.ledger.record(container, pid, device);
        Ok(Grant::Added(rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::{CgroupBackend, CgroupVersion, DeviceAccess};
    use crate::device::DeviceType;
    use crate::testutil::{FakeCgroups, FakeDevices};

    fn id(s: &str) -> ContainerID {
        ContainerID::new(s).unwrap()
    }

    fn target() -> CgroupTarget {
        CgroupTarget {
            version: CgroupVersion::V1,
            path: PathBuf::from("/host/sys/fs/cgroup/devices/docker/abc"),
        }
    }

    fn tty_usb0() -> DeviceIdentity {
        DeviceIdentity {
            kind: DeviceType::Character,
            major: 188,
            minor: 0,
        }
    }

    #[test]
    fn test_apply_submits_rule() {
        let cgroups = FakeCgroups::v1();
        let applier = RuleApplier::new(FakeDevices::new(&[(
            "/dev/ttyUSB0",
            DeviceType::Character,
            188,
            0,
        )]));
        let controller = cgroups.controller(CgroupVersion::V1);

        let grant = applier
            .apply(
                &id("abc"),
                Path::new("/dev/ttyUSB0"),
                controller.as_ref(),
                &target(),
                42,
            )
            .unwrap();

        let expected = DeviceRule {
            access: DeviceAccess::ALL,
            kind: DeviceType::Character,
            major: 188,
            minor: 0,
            allow: true,
        };
        assert_eq!(grant, Grant::Added(expected));
        assert_eq!(cgroups.submissions(), vec![(target().path, expected)]);
    }

    #[test]
    fn test_apply_twice_is_deduplicated() {
        let cgroups = FakeCgroups::v1();
        let applier = RuleApplier::new(FakeDevices::new(&[(
            "/dev/ttyUSB0",
            DeviceType::Character,
            188,
            0,
        )]));
        let controller = cgroups.controller(CgroupVersion::V1);
        let path = Path::new("/dev/ttyUSB0");

        applier
            .apply(&id("abc"), path, controller.as_ref(), &target(), 42)
            .unwrap();
        let second = applier
            .apply(&id("abc"), path, controller.as_ref(), &target(), 42)
            .unwrap();
        assert_eq!(second, Grant::AlreadyGranted(tty_usb0()));
        assert_eq!(cgroups.submissions().len(), 1);

        // restarted container: new pid, new cgroup
        let third = applier
            .apply(&id("abc"), path, controller.as_ref(), &target(), 43)
            .unwrap();
        assert!(matches!(third, Grant::Added(_)));
        assert_eq!(cgroups.submissions().len(), 2);
    }

    #[test]
    fn test_apply_rejects_non_device() {
        let cgroups = FakeCgroups::v1();
        let applier = RuleApplier::new(FakeDevices::new(&[]));
        let controller = cgroups.controller(CgroupVersion::V1);

        let err = applier
            .apply(
                &id("abc"),
                Path::new("/dev/missing"),
                controller.as_ref(),
                &target(),
                42,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Inspect(device::Error::Stat { .. })));
        assert!(cgroups.submissions().is_empty());
    }

    #[test]
    fn test_failed_submission_is_not_recorded() {
        let cgroups = FakeCgroups::v1().failing_submissions();
        let applier = RuleApplier::new(FakeDevices::new(&[(
            "/dev/ttyUSB0",
            DeviceType::Character,
            188,
            0,
        )]));
        let controller = cgroups.controller(CgroupVersion::V1);

        let err = applier
            .apply(
                &id("abc"),
                Path::new("/dev/ttyUSB0"),
                controller.as_ref(),
                &target(),
                42,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Submit { .. }));
        assert!(!applier.ledger().is_granted(&id("abc"), 42, &tty_usb0()));
    }

    #[test]
    fn test_ledger_forget() {
        let ledger = GrantLedger::default();
        assert!(ledger.is_empty());
        assert!(ledger.record(&id("abc"), 1, tty_usb0()));
        assert!(!ledger.record(&id("abc"), 1, tty_usb0()));
        assert!(ledger.record(&id("def"), 2, tty_usb0()));
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.forget(&id("abc")), 1);
        assert_eq!(ledger.forget(&id("abc")), 0);
        assert!(!ledger.is_granted(&id("abc"), 1, &tty_usb0()));
        assert!(ledger.is_granted(&id("def"), 2, &tty_usb0()));
    }

    #[test]
    fn test_ledger_pid_change_resets() {
        let ledger = GrantLedger::default();
        ledger.record(&id("abc"), 1, tty_usb0());
        assert!(ledger.is_granted(&id("abc"), 1, &tty_usb0()));
        assert!(!ledger.is_granted(&id("abc"), 2, &tty_usb0()));

        let other = DeviceIdentity {
            kind: DeviceType::Block,
            major: 8,
            minor: 0,
        };
        ledger.record(&id("abc"), 2, other);
        assert!(!ledger.is_granted(&id("abc"), 1, &tty_usb0()));
        assert!(ledger.is_granted(&id("abc"), 2, &other));
    }
}
