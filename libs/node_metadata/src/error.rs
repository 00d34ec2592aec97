use camino::Utf8PathBuf;

use crate::search_order::MetadataSourceKind;

/// Error type for instance metadata resolution.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The `search-order` option failed validation. Raised before any source is queried.
    #[error("invalid value in section [Metadata] with key `search-order`: {0}")]
    InvalidSearchOrder(String),

    /// The search order names a source the resolver has no reader for.
    #[error("no reader registered for metadata source {0}")]
    SourceNotConfigured(MetadataSourceKind),

    #[error("error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code when reading metadata from {url}: {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode instance metadata: {0}")]
    Parse(#[source] serde_json::Error),

    /// The document decoded, but the required instance identifier is empty.
    #[error("invalid OpenStack metadata, got empty uuid")]
    Malformed,

    #[error("config drive device not found: {0}")]
    DeviceNotFound(String),

    #[error("error mounting configdrive {device}: {source:#}")]
    Mount {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error reading {path} on config drive: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<MetadataError> for tonic::Status {
    fn from(err: MetadataError) -> Self {
        let code = match &err {
            MetadataError::InvalidSearchOrder(_) | MetadataError::SourceNotConfigured(_) => {
                tonic::Code::InvalidArgument
            }
            _ => tonic::Code::Internal,
        };
        tonic::Status::new(code, err.to_string())
    }
}
