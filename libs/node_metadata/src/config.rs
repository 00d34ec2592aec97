use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::search_order::SearchOrder;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The `[metadata]` section of the cloud configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MetadataOpts {
    #[serde(default)]
    pub search_order: SearchOrder,
    /// Timeout for a single request to the metadata service.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl Default for MetadataOpts {
    fn default() -> Self {
        Self {
            search_order: SearchOrder::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
