//! An [`ObjectStorage`] keeping buckets in memory.
//!
//! Reports the same statuses the real service does: 404 for a missing bucket,
//! 409 when creating a bucket that exists or deleting one that still holds
//! objects. Faults can be injected per operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;

use crate::{
    BackendError, BucketMetadata, BucketOp, BucketOptions, FsStatus, MultipartUpload,
    ObjectStorage, StorageUsage, Tag,
};

const DEFAULT_LOCATION: &str = "local";

#[derive(Debug)]
struct BucketState {
    metadata: BucketMetadata,
    tags: Vec<Tag>,
    /// Object sizes by key.
    objects: BTreeMap<String, i64>,
    uploads: Vec<MultipartUpload>,
    quota: i64,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, BucketState>,
    faults: HashMap<BucketOp, StatusCode>,
    requests: Vec<(BucketOp, String)>,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `op` fail with `status` until [`Self::stop_failing`] is called.
    pub fn fail_on(&self, op: BucketOp, status: StatusCode) {
        self.state.lock().unwrap().faults.insert(op, status);
    }

    pub fn stop_failing(&self, op: BucketOp) {
        self.state.lock().unwrap().faults.remove(&op);
    }

    /// Every request received so far, in order, with the bucket it targeted.
    pub fn requests(&self) -> Vec<(BucketOp, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn put_object(&self, bucket: &str, key: &str, size: i64) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.bucket_mut(bucket)?.objects.insert(key.to_string(), size);
        Ok(())
    }

    pub fn start_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<MultipartUpload, BackendError> {
        let mut state = self.state.lock().unwrap();
        let bucket = state.bucket_mut(bucket)?;
        let upload = MultipartUpload {
            key: key.to_string(),
            upload_id: format!("upload-{}", bucket.uploads.len() + 1),
        };
        bucket.uploads.push(upload.clone());
        Ok(upload)
    }

    pub fn set_quota(&self, bucket: &str, quota: i64) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.bucket_mut(bucket)?.quota = quota;
        Ok(())
    }

    pub fn object_keys(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.bucket_mut(bucket)?.objects.keys().cloned().collect())
    }

    /// Records the request and runs `f` on the state, unless a fault is injected for `op`.
    fn request<T>(
        &self,
        op: BucketOp,
        bucket: &str,
        f: impl FnOnce(&mut State) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((op, bucket.to_string()));
        if let Some(status) = state.faults.get(&op) {
            return Err(BackendError::with_status(
                *status,
                format!("injected failure for {op:?}"),
            ));
        }
        f(&mut state)
    }
}

impl State {
    fn bucket_mut(&mut self, bucket: &str) -> Result<&mut BucketState, BackendError> {
        self.buckets.get_mut(bucket).ok_or_else(|| {
            BackendError::with_status(
                StatusCode::NOT_FOUND,
                format!("NoSuchBucket: the specified bucket {bucket} does not exist"),
            )
        })
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn bucket_metadata(&self, bucket: &str) -> Result<BucketMetadata, BackendError> {
        self.request(BucketOp::GetMetadata, bucket, |state| {
            Ok(state.bucket_mut(bucket)?.metadata.clone())
        })
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &BucketOptions,
    ) -> Result<(), BackendError> {
        self.request(BucketOp::Create, bucket, |state| {
            if state.buckets.contains_key(bucket) {
                return Err(BackendError::with_status(
                    StatusCode::CONFLICT,
                    format!("BucketAlreadyExists: {bucket}"),
                ));
            }
            let location = if options.location.is_empty() {
                DEFAULT_LOCATION.to_string()
            } else {
                options.location.clone()
            };
            let fs_status = if options.parallel_fs {
                FsStatus::Enabled
            } else {
                FsStatus::Disabled
            };
            state.buckets.insert(
                bucket.to_string(),
                BucketState {
                    metadata: BucketMetadata {
                        location,
                        az_redundancy: String::new(),
                        enterprise_project_id: options.enterprise_project_id.clone(),
                        fs_status,
                    },
                    tags: Vec::new(),
                    objects: BTreeMap::new(),
                    uploads: Vec::new(),
                    quota: 0,
                },
            );
            Ok(())
        })
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        self.request(BucketOp::Delete, bucket, |state| {
            let existing = state.bucket_mut(bucket)?;
            if !existing.objects.is_empty() || !existing.uploads.is_empty() {
                return Err(BackendError::with_status(
                    StatusCode::CONFLICT,
                    format!("BucketNotEmpty: {bucket}"),
                ));
            }
            state.buckets.remove(bucket);
            Ok(())
        })
    }

    async fn set_bucket_tags(&self, bucket: &str, tags: &[Tag]) -> Result<(), BackendError> {
        self.request(BucketOp::SetTags, bucket, |state| {
            state.bucket_mut(bucket)?.tags = tags.to_vec();
            Ok(())
        })
    }

    async fn bucket_tags(&self, bucket: &str) -> Result<Vec<Tag>, BackendError> {
        self.request(BucketOp::ListTags, bucket, |state| {
            Ok(state.bucket_mut(bucket)?.tags.clone())
        })
    }

    async fn bucket_storage_info(&self, bucket: &str) -> Result<StorageUsage, BackendError> {
        self.request(BucketOp::StorageInfo, bucket, |state| {
            let objects = &state.bucket_mut(bucket)?.objects;
            Ok(StorageUsage {
                size_bytes: objects.values().sum(),
                object_count: objects.len() as u64,
            })
        })
    }

    async fn bucket_quota(&self, bucket: &str) -> Result<i64, BackendError> {
        self.request(BucketOp::Quota, bucket, |state| {
            Ok(state.bucket_mut(bucket)?.quota)
        })
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<MultipartUpload>, BackendError> {
        self.request(BucketOp::ListUploads, bucket, |state| {
            Ok(state.bucket_mut(bucket)?.uploads.clone())
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), BackendError> {
        self.request(BucketOp::AbortUpload, bucket, |state| {
            let uploads = &mut state.bucket_mut(bucket)?.uploads;
            let before = uploads.len();
            uploads.retain(|u| u != upload);
            if uploads.len() == before {
                return Err(BackendError::with_status(
                    StatusCode::NOT_FOUND,
                    format!("NoSuchUpload: {}", upload.upload_id),
                ));
            }
            Ok(())
        })
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        self.request(BucketOp::ListObjects, bucket, |state| {
            Ok(state.bucket_mut(bucket)?.objects.keys().cloned().collect())
        })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BackendError> {
        self.request(BucketOp::DeleteObjects, bucket, |state| {
            let objects = &mut state.bucket_mut(bucket)?.objects;
            for key in keys {
                objects.remove(key);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BucketAcl;

    fn options() -> BucketOptions {
        BucketOptions {
            acl: BucketAcl::Private,
            location: "cn-north-4".to_string(),
            enterprise_project_id: "0".to_string(),
            parallel_fs: true,
        }
    }

    #[tokio::test]
    async fn statuses_match_the_service() {
        let storage = InMemoryStorage::new();

        let err = storage.bucket_metadata("b1").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::NOT_FOUND));

        storage.create_bucket("b1", &options()).await.unwrap();
        let err = storage.create_bucket("b1", &options()).await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::CONFLICT));

        storage.put_object("b1", "dir/file", 10).unwrap();
        let err = storage.delete_bucket("b1").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::CONFLICT));

        storage
            .delete_objects("b1", &["dir/file".to_string(), "missing".to_string()])
            .await
            .unwrap();
        storage.delete_bucket("b1").await.unwrap();
        let err = storage.delete_bucket("b1").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn metadata_reflects_creation_options() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("b1", &options()).await.unwrap();
        storage
            .create_bucket(
                "b2",
                &BucketOptions {
                    location: String::new(),
                    parallel_fs: false,
                    ..options()
                },
            )
            .await
            .unwrap();

        let metadata = storage.bucket_metadata("b1").await.unwrap();
        assert_eq!(metadata.location, "cn-north-4");
        assert_eq!(metadata.enterprise_project_id, "0");
        assert!(metadata.is_parallel_fs());

        let metadata = storage.bucket_metadata("b2").await.unwrap();
        assert_eq!(metadata.location, DEFAULT_LOCATION);
        assert!(!metadata.is_parallel_fs());
    }

    #[tokio::test]
    async fn injected_faults() {
        let storage = InMemoryStorage::new();
        storage.create_bucket("b1", &options()).await.unwrap();

        storage.fail_on(BucketOp::ListTags, StatusCode::INTERNAL_SERVER_ERROR);
        let err = storage.bucket_tags("b1").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::INTERNAL_SERVER_ERROR));

        storage.stop_failing(BucketOp::ListTags);
        assert!(storage.bucket_tags("b1").await.unwrap().is_empty());

        assert_eq!(
            storage.requests(),
            vec![
                (BucketOp::Create, "b1".to_string()),
                (BucketOp::ListTags, "b1".to_string()),
                (BucketOp::ListTags, "b1".to_string()),
            ]
        );
    }
}
