use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Error that occurs when writing to an existing file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to write to file `{path}`: {source}")]
pub struct FileWriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use device_mapping_manager::fsutil;
/// let reader = fsutil::open_file_reader("/proc/self/cgroup")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Writes `data` into an already existing file with a single `write` call.
///
/// Kernel interface files (cgroupfs, sysfs) interpret each write as one command, so
/// the file is neither created nor truncated.
///
/// # Errors
///
/// Returns a [`FileWriteError`] if the file cannot be opened or written.
pub fn write_existing_file(path: impl AsRef<Path>, data: &str) -> Result<(), FileWriteError> {
    let path = path.as_ref();
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|mut file| file.write_all(data.as_bytes()))
        .map_err(|source| FileWriteError {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_open_file_reader_success() {
        let tmp = tempfile::NamedTempFile::new().expect("failed to create temp file");
        let reader = open_file_reader(tmp.path()).expect("should open test file");
        let metadata = reader.get_ref().metadata().unwrap();
        assert!(metadata.is_file());
    }

    #[test]
    fn test_open_file_reader_error() {
        let err = open_file_reader("/definitely/does/not/exist").unwrap_err();
        assert_eq!(err.path, PathBuf::from("/definitely/does/not/exist"));
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_write_existing_file_overwrites_from_start() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "c 1:3 rwm").unwrap();

        write_existing_file(tmp.path(), "b 8:0").unwrap();
        assert_eq!(std::fs::read_to_string(tmp.path()).unwrap(), "b 8:0 rwm");
    }

    #[test]
    fn test_write_existing_file_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.allow");

        let err = write_existing_file(&path, "c 1:3 rwm").unwrap_err();
        assert_eq!(err.path, path);
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
        assert!(!path.exists());
    }
}
