//! Lifecycle management of the object storage buckets that back parallel
//! filesystem volumes.
//!
//! [`ObjectStorage`] is the backend seam, a thin CRUD-like abstraction over the
//! bucket-level API of the object storage service, with two implementations:
//!   * [`s3_bucket`] talks to OBS through its S3-compatible API
//!   * [`in_memory`] keeps buckets in process memory, for tests and local runs
//!
//! [`BucketManager`] builds the provisioning operations on top of it and
//! classifies every backend failure into a [`BucketError`].
mod config;
mod error;
pub mod in_memory;
mod manager;
mod metrics;
mod obs_api;
pub mod s3_bucket;

use std::num::NonZeroUsize;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, VariantNames};

pub use self::{
    config::S3Config,
    error::{BackendError, BucketError, BucketOp, classify},
    in_memory::InMemoryStorage,
    manager::BucketManager,
    s3_bucket::S3Bucket,
};

/// OBS, like S3, throttles by request rate per bucket; keep well below it.
pub const DEFAULT_BUCKET_STORAGE_CONCURRENCY_LIMIT: NonZeroUsize = NonZeroUsize::new(100).unwrap();
/// No limit on the number of keys per list response, the service maximum applies.
pub const DEFAULT_MAX_KEYS_PER_LIST_RESPONSE: Option<i32> = None;
/// The maximum number of keys a single multi-object delete request may carry.
pub const MAX_DELETE_OBJECTS_REQUEST_SIZE: usize = 1000;

/// Canned access control applied to a bucket on creation.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display, VariantNames, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BucketAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

/// Whether a bucket exposes the parallel filesystem interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum FsStatus {
    Enabled,
    Disabled,
}

impl FsStatus {
    /// Parses the `x-obs-fs-file-interface` response header; anything but `Enabled` is `Disabled`.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.eq_ignore_ascii_case("enabled") => FsStatus::Enabled,
            _ => FsStatus::Disabled,
        }
    }
}

/// The backend's view of a bucket, as returned by a HEAD bucket request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMetadata {
    pub location: String,
    pub az_redundancy: String,
    pub enterprise_project_id: String,
    pub fs_status: FsStatus,
}

impl BucketMetadata {
    pub fn is_parallel_fs(&self) -> bool {
        self.fs_status == FsStatus::Enabled
    }
}

/// A bucket backing a parallel filesystem volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    pub az_redundancy: String,
    pub enterprise_project_id: String,
    /// Bucket quota, 0 when unlimited.
    pub capacity_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub size_bytes: i64,
    pub object_count: u64,
}

/// An upload started but neither completed nor aborted. Its parts are billed until it is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
}

/// How a new bucket is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    pub acl: BucketAcl,
    /// Region constraint, empty for the endpoint's default.
    pub location: String,
    /// Enterprise project the bucket is billed to, empty for the default project.
    pub enterprise_project_id: String,
    /// Create the bucket with the parallel filesystem interface enabled.
    pub parallel_fs: bool,
}

/// Bucket-level API of an object storage service. Implementations report
/// failures as-is, with the HTTP status when there is one; classification
/// into [`BucketError`] is left to the caller.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn bucket_metadata(&self, bucket: &str) -> Result<BucketMetadata, BackendError>;

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &BucketOptions,
    ) -> Result<(), BackendError>;

    /// Fails with a conflict if the bucket still holds objects.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), BackendError>;

    /// Replaces the whole tag set of the bucket.
    async fn set_bucket_tags(&self, bucket: &str, tags: &[Tag]) -> Result<(), BackendError>;

    async fn bucket_tags(&self, bucket: &str) -> Result<Vec<Tag>, BackendError>;

    async fn bucket_storage_info(&self, bucket: &str) -> Result<StorageUsage, BackendError>;

    /// Quota in bytes, 0 if there is none.
    async fn bucket_quota(&self, bucket: &str) -> Result<i64, BackendError>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<MultipartUpload>, BackendError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), BackendError>;

    /// Lists every object key in the bucket, following pagination.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, BackendError>;

    /// Deletes `keys`, in requests of at most [`MAX_DELETE_OBJECTS_REQUEST_SIZE`] keys.
    /// Keys that do not exist are not an error.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_names() {
        assert_eq!(BucketAcl::default().to_string(), "private");
        assert_eq!(
            "public-read-write".parse::<BucketAcl>().unwrap(),
            BucketAcl::PublicReadWrite
        );
        assert_eq!(
            BucketAcl::BucketOwnerFullControl.to_string(),
            "bucket-owner-full-control"
        );
        assert!("everyone".parse::<BucketAcl>().is_err());
    }

    #[test]
    fn fs_status_header() {
        assert_eq!(FsStatus::from_header(Some("Enabled")), FsStatus::Enabled);
        assert_eq!(FsStatus::from_header(Some("Disabled")), FsStatus::Disabled);
        assert_eq!(FsStatus::from_header(None), FsStatus::Disabled);
    }
}
