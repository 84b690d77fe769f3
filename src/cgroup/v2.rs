//! cgroup v2 device access.
//!
//! The unified hierarchy has no device controller file. Runtimes attach
//! `BPF_CGROUP_DEVICE` programs to the container's cgroup instead, and a device is
//! accessible only if every attached program returns 1. Granting access therefore
//! means prepending allow blocks to each attached program and swapping the patched
//! program in for the original one.
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::mountinfo::{self, CgroupMount};

use super::bpf::{self, BpfError, BpfOps, LibBpf};
use super::program::{INSN_SIZE, RulePrelude};
use super::{CgroupVersion, DeviceController, DeviceRule, Error, Result, checked_mount};

pub struct Devices<B = LibBpf> {
    proc_root: PathBuf,
    bpf: B,
}

impl Devices {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self::with_bpf(proc_root, LibBpf)
    }
}

impl<B> Devices<B> {
    pub fn with_bpf(proc_root: impl Into<PathBuf>, bpf: B) -> Self {
        Self {
            proc_root: proc_root.into(),
            bpf,
        }
    }
}

fn open_cgroup(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(path)
        .map_err(|source| Error::OpenCgroup {
            path: path.to_path_buf(),
            source,
        })
}

/// Swaps every device program attached to `cgroup` for a copy starting with
/// `prelude`, returns how many programs were patched.
///
/// In multi mode the patched copy is attached next to the original, which is then
/// detached. Otherwise attaching with the same flags replaces the original.
fn patch_programs<B: BpfOps>(
    bpf: &B,
    cgroup: BorrowedFd<'_>,
    prelude: &RulePrelude,
) -> std::result::Result<usize, PatchError> {
    let attached = bpf.query(cgroup)?;
    if attached.ids.is_empty() {
        return Ok(0);
    }

    bpf.bump_memlock_rlimit()?;

    for &id in &attached.ids {
        let old = bpf.get_fd_by_id(id)?;
        let insns = bpf.prog_instructions(id, old.as_fd())?;
        let patched = prelude.prepend_to(&insns)?;
        let new = bpf.load(&patched)?;

        bpf.attach(cgroup, new.as_fd(), attached.attach_flags)?;
        if attached.is_multi() {
            bpf.detach(cgroup, old.as_fd())?;
        }
        log::debug!(
            "replaced device program {id} ({} instructions)",
            insns.len() / INSN_SIZE
        );
    }

    Ok(attached.ids.len())
}

#[derive(Debug, thiserror::Error)]
enum PatchError {
    #[error(transparent)]
    Bpf(#[from] BpfError),
    #[error(transparent)]
    Program(#[from] super::ProgramError),
}

impl<B: BpfOps + Send + Sync> DeviceController for Devices<B> {
    fn version(&self) -> CgroupVersion {
        CgroupVersion::V2
    }

    fn resolve_mount(&self, pid: u32) -> Result<CgroupMount> {
        let path = self.proc_root.join(pid.to_string()).join("mountinfo");
        checked_mount(pid, mountinfo::detect_cgroup_mount(path, "cgroup2", None)?)
    }

    fn add_device_rules(&self, cgroup_path: &Path, rules: &[DeviceRule]) -> Result<()> {
        // validate before touching the kernel
        let prelude = RulePrelude::from_rules(rules)?;
        let cgroup = open_cgroup(cgroup_path)?;

        match patch_programs(&self.bpf, cgroup.as_fd(), &prelude) {
            Ok(0) => {
                log::info!(
                    "no device program attached to {}, device access is unrestricted",
                    cgroup_path.display()
                );
                Ok(())
            }
            Ok(n) => {
                log::debug!(
                    "patched {n} device program(s) of {} with {} rule(s)",
                    cgroup_path.display(),
                    rules.len()
                );
                Ok(())
            }
            Err(PatchError::Bpf(source)) => Err(Error::Bpf {
                path: cgroup_path.to_path_buf(),
                source,
            }),
            Err(PatchError::Program(e)) => Err(Error::Program(e)),
        }
    }
}
