use std::path::PathBuf;

use crate::fsutil;

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
    #[error("no `{fs_type}` mount{} found in file `{path}`", controller_hint(.controller))]
    MissingMount {
        path: PathBuf,
        fs_type: &'static str,
        controller: Option<&'static str>,
    },
    #[error("failed to parse line in file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: super::parser::ParseError,
    },
}

fn controller_hint(controller: &Option<&'static str>) -> String {
    controller
        .map(|c| format!(" with controller `{c}`"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;
