//! Reads instance metadata from the config drive.
//!
//! The config drive is an iso9660 (or, on older deployments, vfat) filesystem
//! labelled `config-2`. It is mounted read-only on a fresh temporary
//! directory for the duration of a single read.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::error::MetadataError;
use crate::mount::{CommandRunner, Mounter};
use crate::search_order::MetadataSourceKind;
use crate::source::MetadataSource;
use crate::types::Metadata;

pub const CONFIG_DRIVE_LABEL: &str = "config-2";
pub const DISK_BY_LABEL_DIR: &str = "/dev/disk/by-label";

/// Tried in this order; vfat is the legacy format.
const CONFIG_DRIVE_FS_TYPES: [&str; 2] = ["iso9660", "vfat"];

pub fn config_drive_path(version: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("openstack/{version}/meta_data.json"))
}

pub struct ConfigDriveSource {
    mounter: Arc<dyn Mounter>,
    commands: Arc<dyn CommandRunner>,
    by_label_dir: Utf8PathBuf,
}

impl ConfigDriveSource {
    pub fn new(mounter: Arc<dyn Mounter>, commands: Arc<dyn CommandRunner>) -> Self {
        Self {
            mounter,
            commands,
            by_label_dir: Utf8PathBuf::from(DISK_BY_LABEL_DIR),
        }
    }

    pub fn with_by_label_dir(mut self, by_label_dir: impl Into<Utf8PathBuf>) -> Self {
        self.by_label_dir = by_label_dir.into();
        self
    }

    /// The labelled device node if udev created one, otherwise whatever `blkid` finds.
    async fn find_device(&self) -> Result<String, MetadataError> {
        let device = self.by_label_dir.join(CONFIG_DRIVE_LABEL);
        match tokio::fs::metadata(&device).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            _ => return Ok(device.into_string()),
        }

        debug!("{device} does not exist, looking the config drive up with blkid");
        let label = format!("LABEL={CONFIG_DRIVE_LABEL}");
        let output = self
            .commands
            .run("blkid", &["-l", "-t", &label, "-o", "device"])
            .await
            .map_err(|e| MetadataError::DeviceNotFound(format!("unable to run blkid: {e:#}")))?;

        let device = output.trim();
        if device.is_empty() {
            return Err(MetadataError::DeviceNotFound(format!(
                "no block device labelled {CONFIG_DRIVE_LABEL}"
            )));
        }
        Ok(device.to_string())
    }

    async fn mount_read_only(&self, device: &str, target: &Utf8Path) -> Result<(), MetadataError> {
        let mut last_error = None;
        for fs_type in CONFIG_DRIVE_FS_TYPES {
            match self.mounter.mount(device, target, fs_type, &["ro"]).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("mounting {device} as {fs_type} failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }
        Err(MetadataError::Mount {
            device: device.to_string(),
            source: last_error.unwrap_or_else(|| anyhow!("no filesystem type to try")),
        })
    }

    async fn read_metadata(
        &self,
        mount_point: &Utf8Path,
        version: &str,
    ) -> Result<Metadata, MetadataError> {
        let relative_path = config_drive_path(version);
        let document = tokio::fs::read(mount_point.join(&relative_path))
            .await
            .map_err(|source| MetadataError::Read {
                path: relative_path,
                source,
            })?;
        Metadata::parse(&document)
    }
}

#[async_trait]
impl MetadataSource for ConfigDriveSource {
    fn kind(&self) -> MetadataSourceKind {
        MetadataSourceKind::ConfigDrive
    }

    async fn fetch(&self, version: &str) -> Result<Metadata, MetadataError> {
        let device = self.find_device().await?;

        let mount_dir = camino_tempfile::Builder::new()
            .prefix("configdrive")
            .tempdir()
            .map_err(|e| MetadataError::Mount {
                device: device.clone(),
                source: anyhow!(e).context("failed to create mount point"),
            })?;

        info!("Attempting to mount configdrive {device} on {}", mount_dir.path());
        self.mount_read_only(&device, mount_dir.path()).await?;
        info!("Configdrive mounted on {}", mount_dir.path());

        // Nothing between the mount above and the unmount below may return early.
        let result = self.read_metadata(mount_dir.path(), version).await;

        match self.mounter.unmount(mount_dir.path()).await {
            Ok(()) => {
                let path = mount_dir.path().to_owned();
                if let Err(e) = mount_dir.close() {
                    warn!("failed to remove configdrive mount point {path}: {e}");
                }
            }
            Err(e) => {
                // Leave the directory in place rather than recursively deleting
                // through a filesystem that may still be mounted.
                warn!("failed to unmount configdrive from {}: {e:#}", mount_dir.path());
                let _ = mount_dir.into_path();
            }
        }

        result
    }
}
