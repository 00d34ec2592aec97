//! The cloud configuration file shared by the plugin's components.
//!
//! ```toml
//! [global]
//! region = "cn-north-4"
//! cloud = "myhuaweicloud.com"
//! access_key = "..."
//! secret_key = "..."
//! project_id = "..."
//!
//! [metadata]
//! search-order = "configDrive,metadataService"
//! request-timeout = "10s"
//!
//! [object_storage]
//! endpoint = "https://obs.cn-north-4.myhuaweicloud.com"
//! concurrency_limit = 100
//! ```

use std::num::NonZeroUsize;

use anyhow::Context;
use bucket_storage::{
    DEFAULT_BUCKET_STORAGE_CONCURRENCY_LIMIT, DEFAULT_MAX_KEYS_PER_LIST_RESPONSE, S3Config,
};
use camino::Utf8Path;
use node_metadata::MetadataOpts;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/obs-csi/cloud-config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    pub global: GlobalOpts,
    #[serde(default)]
    pub metadata: MetadataOpts,
    #[serde(default)]
    pub object_storage: ObjectStorageOpts,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalOpts {
    pub region: String,
    /// Domain of the cloud, used to derive the default object storage endpoint.
    #[serde(default)]
    pub cloud: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Enterprise project new buckets are assigned to.
    #[serde(default)]
    pub project_id: String,
}

impl std::fmt::Debug for GlobalOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalOpts")
            .field("region", &self.region)
            .field("cloud", &self.cloud)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStorageOpts {
    pub endpoint: Option<String>,
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

impl Default for ObjectStorageOpts {
    fn default() -> Self {
        Self {
            endpoint: None,
            concurrency_limit: DEFAULT_BUCKET_STORAGE_CONCURRENCY_LIMIT,
            max_keys_per_list_response: DEFAULT_MAX_KEYS_PER_LIST_RESPONSE,
        }
    }
}

impl CloudConfig {
    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cloud config {path}"))?;
        Self::parse(&contents).with_context(|| format!("failed to parse cloud config {path}"))
    }

    pub fn parse(toml: &str) -> anyhow::Result<Self> {
        let config: CloudConfig = toml::from_str(toml)?;
        if config.global.region.is_empty() {
            anyhow::bail!("`region` in section [global] cannot be empty");
        }
        Ok(config)
    }

    /// The configured endpoint, or `https://obs.<region>.<cloud>` when a cloud domain is set.
    pub fn object_storage_endpoint(&self) -> Option<String> {
        match &self.object_storage.endpoint {
            Some(endpoint) => Some(endpoint.clone()),
            None if !self.global.cloud.is_empty() => Some(format!(
                "https://obs.{}.{}",
                self.global.region, self.global.cloud
            )),
            None => None,
        }
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            region: self.global.region.clone(),
            endpoint: self.object_storage_endpoint(),
            access_key: self.global.access_key.clone(),
            secret_key: self.global.secret_key.clone(),
            concurrency_limit: self.object_storage.concurrency_limit,
            max_keys_per_list_response: self.object_storage.max_keys_per_list_response,
        }
    }
}
