//! `libbpf` calls needed to patch device programs.
//!
//! Everything goes through [`BpfOps`] so the patching sequence in [`super::v2`] can be
//! driven without touching the kernel.
use std::ffi::c_void;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr;

use libbpf_sys::{BPF_CGROUP_DEVICE, BPF_F_ALLOW_MULTI, BPF_PROG_TYPE_CGROUP_DEVICE, bpf_insn};

const LICENSE: &std::ffi::CStr = c"Apache";

#[derive(thiserror::Error, Debug)]
pub enum BpfError {
    #[error("failed to query attached device programs: {0}")]
    Query(#[source] errno::Errno),
    #[error("failed to open device program {id}: {source}")]
    OpenProgram {
        id: u32,
        #[source]
        source: errno::Errno,
    },
    #[error("failed to read instructions of device program {id}: {source}")]
    ProgramInfo {
        id: u32,
        #[source]
        source: errno::Errno,
    },
    #[error("kernel rejected the patched device program: {0}")]
    Load(#[source] errno::Errno),
    #[error("failed to attach device program: {0}")]
    Attach(#[source] errno::Errno),
    #[error("failed to detach device program: {0}")]
    Detach(#[source] errno::Errno),
    #[error("failed to increase the memlock rlimit: {0}")]
    RLimit(#[source] errno::Errno),
}

pub type Result<T> = std::result::Result<T, BpfError>;

/// Device programs attached to a cgroup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Attached {
    pub attach_flags: u32,
    pub ids: Vec<u32>,
}

impl Attached {
    pub fn is_multi(&self) -> bool {
        self.attach_flags & BPF_F_ALLOW_MULTI != 0
    }
}

/// The `bpf(2)` operations used on a cgroup's device programs.
pub trait BpfOps {
    /// Lists the device programs attached to `cgroup`.
    fn query(&self, cgroup: BorrowedFd<'_>) -> Result<Attached>;

    fn get_fd_by_id(&self, id: u32) -> Result<OwnedFd>;

    /// Returns the translated instructions of a loaded program.
    fn prog_instructions(&self, id: u32, prog: BorrowedFd<'_>) -> Result<Vec<u8>>;

    /// Loads `insns` as a `BPF_PROG_TYPE_CGROUP_DEVICE` program.
    fn load(&self, insns: &[u8]) -> Result<OwnedFd>;

    fn attach(&self, cgroup: BorrowedFd<'_>, prog: BorrowedFd<'_>, flags: u32) -> Result<()>;

    fn detach(&self, cgroup: BorrowedFd<'_>, prog: BorrowedFd<'_>) -> Result<()>;

    /// Raises `RLIMIT_MEMLOCK`, older kernels account program memory against it.
    fn bump_memlock_rlimit(&self) -> Result<()>;
}

/// [`BpfOps`] backed by `libbpf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibBpf;

impl BpfOps for LibBpf {
    fn query(&self, cgroup: BorrowedFd<'_>) -> Result<Attached> {
        let mut ids = vec![0_u32; 64];
        let mut attach_flags = 0_u32;
        loop {
            let mut prog_cnt = ids.len() as u32;
            // SAFETY: `ids` holds `prog_cnt` writable slots, the other pointers are locals.
            let ret = unsafe {
                libbpf_sys::bpf_prog_query(
                    cgroup.as_raw_fd(),
                    BPF_CGROUP_DEVICE,
                    0,
                    &mut attach_flags,
                    ids.as_mut_ptr(),
                    &mut prog_cnt,
                )
            };
            if ret == 0 {
                ids.truncate(prog_cnt as usize);
                return Ok(Attached { attach_flags, ids });
            }

            let err = errno::errno();
            if err.0 == libc::ENOSPC && prog_cnt as usize > ids.len() {
                ids.resize(prog_cnt as usize, 0);
                continue;
            }
            return Err(BpfError::Query(err));
        }
    }

    fn get_fd_by_id(&self, id: u32) -> Result<OwnedFd> {
        // SAFETY: plain FFI call without pointers.
        let fd = unsafe { libbpf_sys::bpf_prog_get_fd_by_id(id) };
        if fd < 0 {
            return Err(BpfError::OpenProgram {
                id,
                source: errno::errno(),
            });
        }
        // SAFETY: libbpf just returned this descriptor and nothing else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn prog_instructions(&self, id: u32, prog: BorrowedFd<'_>) -> Result<Vec<u8>> {
        let info_error = |source| BpfError::ProgramInfo { id, source };

        let mut info = libbpf_sys::bpf_prog_info::default();
        let mut info_len = mem::size_of::<libbpf_sys::bpf_prog_info>() as u32;
        // SAFETY: `info` is a zeroed `bpf_prog_info` of `info_len` bytes.
        let ret = unsafe {
            libbpf_sys::bpf_obj_get_info_by_fd(
                prog.as_raw_fd(),
                &mut info as *mut _ as *mut c_void,
                &mut info_len,
            )
        };
        if ret != 0 {
            return Err(info_error(errno::errno()));
        }

        let mut insns = vec![0_u8; info.xlated_prog_len as usize];
        let mut info = libbpf_sys::bpf_prog_info {
            xlated_prog_len: insns.len() as u32,
            xlated_prog_insns: insns.as_mut_ptr() as u64,
            ..Default::default()
        };
        let mut info_len = mem::size_of::<libbpf_sys::bpf_prog_info>() as u32;
        // SAFETY: the kernel writes at most `xlated_prog_len` bytes into `insns`.
        let ret = unsafe {
            libbpf_sys::bpf_obj_get_info_by_fd(
                prog.as_raw_fd(),
                &mut info as *mut _ as *mut c_void,
                &mut info_len,
            )
        };
        if ret != 0 {
            return Err(info_error(errno::errno()));
        }

        insns.truncate(info.xlated_prog_len as usize);
        Ok(insns)
    }

    fn load(&self, insns: &[u8]) -> Result<OwnedFd> {
        let insn_cnt = insns.len() / mem::size_of::<bpf_insn>();
        // SAFETY: `insns` holds `insn_cnt` instructions, `LICENSE` is NUL terminated.
        let fd = unsafe {
            libbpf_sys::bpf_prog_load(
                BPF_PROG_TYPE_CGROUP_DEVICE,
                ptr::null(),
                LICENSE.as_ptr(),
                insns.as_ptr() as *const bpf_insn,
                insn_cnt as _,
                ptr::null_mut(),
            )
        };
        if fd < 0 {
            return Err(BpfError::Load(errno::errno()));
        }
        // SAFETY: libbpf just returned this descriptor and nothing else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn attach(&self, cgroup: BorrowedFd<'_>, prog: BorrowedFd<'_>, flags: u32) -> Result<()> {
        // SAFETY: plain FFI call without pointers.
        let ret = unsafe {
            libbpf_sys::bpf_prog_attach(prog.as_raw_fd(), cgroup.as_raw_fd(), BPF_CGROUP_DEVICE, flags)
        };
        if ret != 0 {
            return Err(BpfError::Attach(errno::errno()));
        }
        Ok(())
    }

    fn detach(&self, cgroup: BorrowedFd<'_>, prog: BorrowedFd<'_>) -> Result<()> {
        // SAFETY: plain FFI call without pointers.
        let ret = unsafe {
            libbpf_sys::bpf_prog_detach2(prog.as_raw_fd(), cgroup.as_raw_fd(), BPF_CGROUP_DEVICE)
        };
        if ret != 0 {
            return Err(BpfError::Detach(errno::errno()));
        }
        Ok(())
    }

    fn bump_memlock_rlimit(&self) -> Result<()> {
        let rlimit = libc::rlimit {
            rlim_cur: 128 << 20,
            rlim_max: 128 << 20,
        };
        // SAFETY: plain FFI call with a valid pointer to a local.
        if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
            return Err(BpfError::RLimit(errno::errno()));
        }
        Ok(())
    }
}
