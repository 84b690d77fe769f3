use std::path::PathBuf;

use crate::cgroup::CgroupLineError;
use crate::fsutil;

/// Errors that may occur during environment detection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to check if path `{path}` exists: {source}")]
    ExistenceCheck {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read symlink `{path}`: {source}")]
    ReadSymlink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
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
    #[error("running inside a container, but the host root is not mounted at `{path}`")]
    MissingHostRoot { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;
