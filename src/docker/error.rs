use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported docker host `{0}`, only unix:// sockets are supported")]
    InvalidHost(String),
    #[error("invalid request uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("failed to connect to docker daemon at `{path}`: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    #[error("request to docker daemon failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("docker daemon responded with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
