use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::cache::MetadataCache;
use crate::config::MetadataOpts;
use crate::config_drive::ConfigDriveSource;
use crate::device::{DeviceLookup, DeviceMatcher};
use crate::error::MetadataError;
use crate::metadata_service::MetadataServiceSource;
use crate::mount::{SystemCommandRunner, SystemMounter};
use crate::search_order::{MetadataSourceKind, SearchOrder};
use crate::source::{DEFAULT_METADATA_VERSION, MetadataSource};
use crate::types::Metadata;

/// Answers questions about the local node from the first metadata source, in
/// the configured order, that can be read.
pub struct MetadataResolver {
    search_order: SearchOrder,
    sources: HashMap<MetadataSourceKind, Arc<dyn MetadataSource>>,
    cache: Arc<MetadataCache>,
    device_matcher: Option<DeviceMatcher>,
}

impl MetadataResolver {
    pub fn new(search_order: SearchOrder, cache: Arc<MetadataCache>) -> Self {
        Self {
            search_order,
            sources: HashMap::new(),
            cache,
            device_matcher: None,
        }
    }

    /// Registers the reader for `source.kind()`, replacing any earlier one.
    pub fn with_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.sources.insert(source.kind(), source);
        self
    }

    pub fn with_device_matcher(mut self, device_matcher: DeviceMatcher) -> Self {
        self.device_matcher = Some(device_matcher);
        self
    }

    /// A resolver reading from the real host: the link-local metadata service
    /// and the config drive, mounted with the system `mount`.
    pub fn from_config(opts: &MetadataOpts, cache: Arc<MetadataCache>) -> anyhow::Result<Self> {
        let metadata_service = Arc::new(MetadataServiceSource::new(opts.request_timeout)?);
        let config_drive = Arc::new(ConfigDriveSource::new(
            Arc::new(SystemMounter),
            Arc::new(SystemCommandRunner),
        ));

        Ok(Self::new(opts.search_order.clone(), cache)
            .with_source(config_drive)
            .with_source(metadata_service.clone())
            .with_device_matcher(DeviceMatcher::new(metadata_service)))
    }

    pub fn search_order(&self) -> &SearchOrder {
        &self.search_order
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Returns the cached metadata if there is any, ignoring `order`.
    /// Otherwise validates `order` and tries its sources in sequence.
    pub async fn resolve(&self, order: &str) -> Result<Arc<Metadata>, MetadataError> {
        if let Some(metadata) = self.cache.get() {
            return Ok(metadata);
        }
        let order: SearchOrder = order.parse()?;
        self.resolve_order(&order).await
    }

    pub async fn resolve_order(&self, order: &SearchOrder) -> Result<Arc<Metadata>, MetadataError> {
        if let Some(metadata) = self.cache.get() {
            return Ok(metadata);
        }

        let mut last_error = None;
        for kind in order.iter() {
            let Some(source) = self.sources.get(&kind) else {
                warn!("no reader for metadata source {kind}, trying next source");
                last_error = Some(MetadataError::SourceNotConfigured(kind));
                continue;
            };

            match source.fetch(DEFAULT_METADATA_VERSION).await {
                Ok(metadata) => {
                    info!("resolved metadata for instance {} from {kind}", metadata.instance_id);
                    return Ok(self.cache.set(metadata));
                }
                Err(e) => {
                    warn!("failed to read metadata from {kind}: {e}");
                    last_error = Some(e);
                }
            }
        }

        // A validated order is never empty, so some error was recorded.
        Err(last_error.unwrap_or_else(|| {
            MetadataError::InvalidSearchOrder("value cannot be empty".to_string())
        }))
    }

    pub async fn metadata(&self) -> Result<Arc<Metadata>, MetadataError> {
        self.resolve_order(&self.search_order).await
    }

    pub async fn instance_id(&self) -> Result<String, MetadataError> {
        Ok(self.metadata().await?.instance_id.clone())
    }

    pub async fn availability_zone(&self) -> Result<String, MetadataError> {
        Ok(self.metadata().await?.availability_zone.clone())
    }

    pub async fn locate_device(&self, volume_id: &str) -> DeviceLookup {
        match &self.device_matcher {
            Some(matcher) => matcher.locate(volume_id).await,
            None => {
                warn!("no device matcher configured, cannot look up volume {volume_id}");
                DeviceLookup::MetadataUnavailable
            }
        }
    }

    /// The block device of `volume_id`, or `None` if it cannot be determined.
    pub async fn device_path(&self, volume_id: &str) -> Option<Utf8PathBuf> {
        self.locate_device(volume_id).await.into_path()
    }
}
