use std::fmt::Debug;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_BUCKET_STORAGE_CONCURRENCY_LIMIT, DEFAULT_MAX_KEYS_PER_LIST_RESPONSE};

/// Where the object storage service is and how to authenticate against it.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct S3Config {
    /// The region buckets are created in.
    pub region: String,
    /// A base URL to send requests to, e.g. `https://obs.cn-north-4.myhuaweicloud.com`.
    /// By default, the endpoint is derived from the region name by the SDK.
    pub endpoint: Option<String>,
    /// Static credentials. When unset, credentials come from the environment or instance metadata.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: NonZeroUsize,
    #[serde(default = "default_max_keys_per_list_response")]
    pub max_keys_per_list_response: Option<i32>,
}

fn default_concurrency_limit() -> NonZeroUsize {
    DEFAULT_BUCKET_STORAGE_CONCURRENCY_LIMIT
}

fn default_max_keys_per_list_response() -> Option<i32> {
    DEFAULT_MAX_KEYS_PER_LIST_RESPONSE
}

impl Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("concurrency_limit", &self.concurrency_limit)
            .field(
                "max_keys_per_list_response",
                &self.max_keys_per_list_response,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_defaults() {
        let config: S3Config = toml::from_str(
            r#"
            region = "cn-north-4"
            endpoint = "https://obs.cn-north-4.myhuaweicloud.com"
            access_key = "AK"
            secret_key = "SK"
            "#,
        )
        .unwrap();
        assert_eq!(config.region, "cn-north-4");
        assert_eq!(config.concurrency_limit.get(), 100);
        assert_eq!(config.max_keys_per_list_response, None);
        assert_eq!(config.access_key.as_deref(), Some("AK"));
    }

    #[test]
    fn debug_hides_credentials() {
        let config = S3Config {
            region: "cn-north-4".to_string(),
            endpoint: None,
            access_key: Some("very-secret-access".to_string()),
            secret_key: Some("very-secret-key".to_string()),
            concurrency_limit: NonZeroUsize::new(10).unwrap(),
            max_keys_per_list_response: Some(100),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"), "{debug}");
        assert!(debug.contains("cn-north-4"), "{debug}");
    }
}
