use std::path::PathBuf;

use crate::{fsutil, mountinfo};

use super::bpf::BpfError;
use super::program::ProgramError;
use super::version::CgroupLineError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error("failed to read line for file `{path}`: {source}")]
    ReadLine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid cgroup file `{path}`: {source}")]
    CgroupLine {
        path: PathBuf,
        #[source]
        source: CgroupLineError,
    },
    #[error("no device cgroup entry found in `{path}`")]
    NoDeviceCgroup { path: PathBuf },
    #[error("failed to resolve cgroup mount: {0}")]
    Mount(#[from] mountinfo::Error),
    #[error(
        "cgroup `{root}` of process {pid} is outside the visible hierarchy, \
         run with the host's cgroup namespace"
    )]
    OutsideCgroupNamespace { pid: u32, root: PathBuf },
    #[error(transparent)]
    Write(#[from] fsutil::FileWriteError),
    #[error("failed to open cgroup directory `{path}`: {source}")]
    OpenCgroup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bpf operation on cgroup `{path}` failed: {source}")]
    Bpf {
        path: PathBuf,
        #[source]
        source: BpfError,
    },
    #[error("failed to build device program: {0}")]
    Program(#[from] ProgramError),
}

pub type Result<T> = std::result::Result<T, Error>;
