//! cgroup v1 `devices` controller.
use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::mountinfo::{self, CgroupMount};

use super::{CgroupVersion, DeviceController, DeviceRule, Result, checked_mount};

pub struct Devices {
    proc_root: PathBuf,
}

impl Devices {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn apply_rule(rule: &DeviceRule, cgroup_path: &Path) -> Result<()> {
        let path = if rule.allow {
            cgroup_path.join("devices.allow")
        } else {
            cgroup_path.join("devices.deny")
        };

        fsutil::write_existing_file(path, &rule.to_string())?;
        Ok(())
    }
}

impl DeviceController for Devices {
    fn version(&self) -> CgroupVersion {
        CgroupVersion::V1
    }

    fn resolve_mount(&self, pid: u32) -> Result<CgroupMount> {
        let path = self.proc_root.join(pid.to_string()).join("mountinfo");
        checked_mount(
            pid,
            mountinfo::detect_cgroup_mount(path, "cgroup", Some("devices"))?,
        )
    }

    fn add_device_rules(&self, cgroup_path: &Path, rules: &[DeviceRule]) -> Result<()> {
        for rule in rules {
            log::debug!("writing `{}` to {}", rule, cgroup_path.display());
            Self::apply_rule(rule, cgroup_path)?;
        }
        Ok(())
    }
}
