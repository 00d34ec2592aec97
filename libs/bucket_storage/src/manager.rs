use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{BucketError, BucketOp, classify};
use crate::{Bucket, BucketAcl, BucketMetadata, BucketOptions, ObjectStorage, StorageUsage, Tag};

/// Provisioning operations on parallel filesystem buckets.
///
/// Every failure is classified into a [`BucketError`]; nothing is retried here,
/// the provisioning control loop calling in does that.
pub struct BucketManager {
    storage: Arc<dyn ObjectStorage>,
    region: String,
    enterprise_project_id: String,
}

impl BucketManager {
    /// `region` and `enterprise_project_id` apply to the buckets this manager creates.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        region: impl Into<String>,
        enterprise_project_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            region: region.into(),
            enterprise_project_id: enterprise_project_id.into(),
        }
    }

    pub async fn bucket_metadata(&self, name: &str) -> Result<BucketMetadata, BucketError> {
        self.storage
            .bucket_metadata(name)
            .await
            .map_err(|e| classify(BucketOp::GetMetadata, name, e))
    }

    /// The bucket, provided it exists and has the parallel filesystem interface enabled.
    pub async fn get_parallel_fs_bucket(&self, name: &str) -> Result<Bucket, BucketError> {
        let metadata = self.bucket_metadata(name).await?;
        if !metadata.is_parallel_fs() {
            return Err(BucketError::Unavailable(format!(
                "OBS instance {name} is not a parallel file system"
            )));
        }
        let capacity_bytes = self.capacity(name).await?;

        Ok(Bucket {
            name: name.to_string(),
            region: metadata.location,
            az_redundancy: metadata.az_redundancy,
            enterprise_project_id: metadata.enterprise_project_id,
            capacity_bytes,
        })
    }

    pub async fn check_exists(&self, name: &str) -> Result<bool, BucketError> {
        match self.bucket_metadata(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, name: &str, acl: BucketAcl) -> Result<(), BucketError> {
        let options = BucketOptions {
            acl,
            location: self.region.clone(),
            enterprise_project_id: self.enterprise_project_id.clone(),
            parallel_fs: true,
        };
        self.storage
            .create_bucket(name, &options)
            .await
            .map_err(|e| classify(BucketOp::Create, name, e))?;
        info!("Created OBS instance {name}");
        Ok(())
    }

    /// Aborts every in-flight multipart upload, then deletes every object.
    /// Stops at the first failure.
    pub async fn clean(&self, name: &str) -> Result<(), BucketError> {
        let uploads = self
            .storage
            .list_multipart_uploads(name)
            .await
            .map_err(|e| classify(BucketOp::ListUploads, name, e))?;
        for upload in &uploads {
            self.storage
                .abort_multipart_upload(name, upload)
                .await
                .map_err(|e| classify(BucketOp::AbortUpload, name, e))?;
        }

        let keys = self
            .storage
            .list_objects(name)
            .await
            .map_err(|e| classify(BucketOp::ListObjects, name, e))?;
        if !keys.is_empty() {
            self.storage
                .delete_objects(name, &keys)
                .await
                .map_err(|e| classify(BucketOp::DeleteObjects, name, e))?;
        }

        info!(
            "Cleaned OBS instance {name}: aborted {} uploads, deleted {} objects",
            uploads.len(),
            keys.len()
        );
        Ok(())
    }

    /// Deletes an empty bucket. A bucket that still holds objects is [`BucketError::Unavailable`].
    pub async fn delete(&self, name: &str) -> Result<(), BucketError> {
        self.storage
            .delete_bucket(name)
            .await
            .map_err(|e| classify(BucketOp::Delete, name, e))?;
        info!("Deleted OBS instance {name}");
        Ok(())
    }

    /// Empties the bucket and deletes it.
    pub async fn teardown(&self, name: &str) -> Result<(), BucketError> {
        if let Err(e) = self.clean(name).await {
            warn!("failed to clean OBS instance {name} before deleting it: {e}");
            return Err(e);
        }
        self.delete(name).await
    }

    pub async fn set_tags(&self, name: &str, tags: &[Tag]) -> Result<(), BucketError> {
        self.storage
            .set_bucket_tags(name, tags)
            .await
            .map_err(|e| classify(BucketOp::SetTags, name, e))
    }

    pub async fn list_tags(&self, name: &str) -> Result<Vec<Tag>, BucketError> {
        self.storage
            .bucket_tags(name)
            .await
            .map_err(|e| classify(BucketOp::ListTags, name, e))
    }

    pub async fn storage_usage(&self, name: &str) -> Result<StorageUsage, BucketError> {
        self.storage
            .bucket_storage_info(name)
            .await
            .map_err(|e| classify(BucketOp::StorageInfo, name, e))
    }

    /// Bucket quota in bytes, 0 if unlimited.
    pub async fn capacity(&self, name: &str) -> Result<i64, BucketError> {
        self.storage
            .bucket_quota(name)
            .await
            .map_err(|e| classify(BucketOp::Quota, name, e))
    }
}
