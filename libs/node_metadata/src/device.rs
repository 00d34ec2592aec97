use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, error, warn};

use crate::source::{DEFAULT_METADATA_VERSION, MetadataSource};
use crate::types::DeviceMetadata;

pub const DISK_BY_PATH_DIR: &str = "/dev/disk/by-path";

/// Outcome of looking up the block device of an attached volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLookup {
    Found(Utf8PathBuf),
    /// No disk with that serial, or no by-path entry for it.
    NotFound,
    /// More than one by-path entry matched the disk's bus and address.
    Ambiguous(Vec<Utf8PathBuf>),
    MetadataUnavailable,
}

impl DeviceLookup {
    pub fn into_path(self) -> Option<Utf8PathBuf> {
        match self {
            DeviceLookup::Found(path) => Some(path),
            _ => None,
        }
    }
}

/// Finds the host device node of a volume by correlating the instance's
/// device metadata with the entries udev creates under `/dev/disk/by-path`.
pub struct DeviceMatcher {
    source: Arc<dyn MetadataSource>,
    by_path_dir: Utf8PathBuf,
}

impl DeviceMatcher {
    /// `source` is queried on every lookup. Attachments change at runtime, so
    /// the cached node metadata cannot be used here.
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            by_path_dir: Utf8PathBuf::from(DISK_BY_PATH_DIR),
        }
    }

    pub fn with_by_path_dir(mut self, by_path_dir: impl Into<Utf8PathBuf>) -> Self {
        self.by_path_dir = by_path_dir.into();
        self
    }

    pub async fn locate(&self, volume_id: &str) -> DeviceLookup {
        let metadata = match self.source.fetch(DEFAULT_METADATA_VERSION).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("failed to get metadata while looking up volume {volume_id}: {e}");
                return DeviceLookup::MetadataUnavailable;
            }
        };

        let disks = metadata
            .devices
            .iter()
            .filter(|device| device.is_disk() && device.serial == volume_id);

        // A disk resolving to exactly one entry wins; otherwise keep looking.
        let mut attached = false;
        let mut ambiguous = None;
        for device in disks {
            attached = true;
            let mut candidates = match list_candidates(&self.by_path_dir, device).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!("failed to list {}: {e}", self.by_path_dir);
                    continue;
                }
            };

            match candidates.len() {
                0 => warn!(
                    "no device under {} for volume {volume_id} ({}-{})",
                    self.by_path_dir, device.bus, device.address
                ),
                1 => {
                    let path = candidates.swap_remove(0);
                    debug!("volume {volume_id} is at {path}");
                    return DeviceLookup::Found(path);
                }
                _ => {
                    warn!("volume {volume_id} matches several devices: {candidates:?}");
                    ambiguous.get_or_insert(candidates);
                }
            }
        }

        if !attached {
            warn!("volume {volume_id} is not attached to instance {}", metadata.instance_id);
        }
        match ambiguous {
            Some(candidates) => DeviceLookup::Ambiguous(candidates),
            None => DeviceLookup::NotFound,
        }
    }
}

/// Entries of `dir` named `*-<bus>-<address>`, sorted. A missing directory has no entries.
async fn list_candidates(
    dir: &Utf8Path,
    device: &DeviceMetadata,
) -> std::io::Result<Vec<Utf8PathBuf>> {
    let suffix = format!("-{}-{}", device.bus, device.address);

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(&suffix) || name.len() == suffix.len() {
            continue;
        }
        candidates.push(dir.join(name));
    }
    candidates.sort();
    Ok(candidates)
}
