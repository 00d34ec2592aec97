use async_trait::async_trait;

use crate::error::MetadataError;
use crate::search_order::MetadataSourceKind;
use crate::types::Metadata;

/// Version of the `meta_data.json` layout requested from every source.
pub const DEFAULT_METADATA_VERSION: &str = "latest";

/// One place instance metadata can be read from.
///
/// A fetch is a single attempt: readers do not retry, the resolver's
/// fallback over the search order is the retry boundary.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn kind(&self) -> MetadataSourceKind;

    async fn fetch(&self, version: &str) -> Result<Metadata, MetadataError>;
}
