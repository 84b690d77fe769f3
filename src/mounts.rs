//! Resolution of container mounts into host device paths.
//!
//! Only mounts sourced from the host device tree are considered. A mounted device
//! directory (e.g. all of `/dev/input`) is expanded into every non-directory entry
//! beneath it so each device node gets its own rule.
use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use crate::container::Mount;

/// Default prefix of the host device tree.
pub const DEFAULT_DEVICE_ROOT: &str = "/dev";

/// Filters and expands mounts into candidate device paths.
#[derive(Debug, Clone)]
pub struct MountResolver {
    device_root: PathBuf,
}

impl Default for MountResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_ROOT)
    }
}

impl MountResolver {
    pub fn new(device_root: impl Into<PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
        }
    }

    pub fn device_root(&self) -> &Path {
        &self.device_root
    }

    /// Returns `true` if `source` lies within the device tree.
    pub fn is_device_source(&self, source: &Path) -> bool {
        source.starts_with(&self.device_root)
    }

    /// Lazily yields every candidate device path of `mounts`, in mount order.
    pub fn resolve<'a>(&'a self, mounts: &'a [Mount]) -> DevicePaths<'a> {
        DevicePaths {
            resolver: self,
            mounts: mounts.iter(),
            walk: Vec::new(),
        }
    }
}

/// Iterator returned by [`MountResolver::resolve`].
///
/// Directory mounts are walked depth-first with one open directory handle per level.
/// Entries that fail to be read are logged and skipped.
#[derive(Debug)]
pub struct DevicePaths<'a> {
    resolver: &'a MountResolver,
    mounts: std::slice::Iter<'a, Mount>,
    walk: Vec<ReadDir>,
}

impl DevicePaths<'_> {
    fn descend(&mut self, dir: &Path) {
        match std::fs::read_dir(dir) {
            Ok(entries) => self.walk.push(entries),
            Err(err) => log::warn!("failed to read directory `{}`: {}", dir.display(), err),
        }
    }

    fn next_walked(&mut self) -> Option<PathBuf> {
        while let Some(entries) = self.walk.last_mut() {
            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    log::warn!("failed to read directory entry: {}", err);
                    continue;
                }
                None => {
                    self.walk.pop();
                    continue;
                }
            };

            let path = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => self.descend(&path),
                Ok(_) => return Some(path),
                Err(err) => {
                    log::warn!("failed to read file type of `{}`: {}", path.display(), err)
                }
            }
        }

        None
    }
}

impl Iterator for DevicePaths<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(path) = self.next_walked() {
                return Some(path);
            }

            let mount = self.mounts.next()?;
            if !self.resolver.is_device_source(&mount.source) {
                log::info!("{} is not a device... skipping", mount.source.display());
                continue;
            }

            match std::fs::metadata(&mount.source) {
                Ok(metadata) if metadata.is_dir() => self.descend(&mount.source),
                Ok(_) => return Some(mount.source.clone()),
                Err(err) => {
                    log::warn!("failed to stat `{}`: {}", mount.source.display(), err)
                }
            }
        }
    }
}
