use std::path::PathBuf;

/// Errors that may occur while classifying a host device path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to stat device `{path}`: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{path}` is a {kind}, neither a character nor a block device")]
    UnsupportedDeviceType { path: PathBuf, kind: &'static str },
    #[error("device number {number} of `{path}` does not fit into 32 bits")]
    DeviceNumberOutOfRange { path: PathBuf, number: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
