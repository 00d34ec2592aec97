//! OBS bucket management through its S3-compatible API, on top of the `aws-sdk-s3` client.
//!
//! OBS extends the S3 protocol with `x-obs-*` headers: they are added to the
//! create request to enable the parallel filesystem interface and set the
//! enterprise project, and read back from the HEAD bucket response. Quota and
//! storage usage come from the OBS `?quota` and `?storageinfo` bucket sub-resources.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::meta::credentials::CredentialsProviderChain;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::interceptors::BeforeDeserializationInterceptorContextRef;
use aws_sdk_s3::config::{
    BehaviorVersion, Config, ConfigBag, Intercept, Region, RuntimeComponents,
};
use aws_sdk_s3::error::{BoxError, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration, Delete,
    ObjectIdentifier, Tagging,
};
use scopeguard::ScopeGuard;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::metrics::{BUCKET_METRICS, RequestKind, start_measuring_requests};
use crate::obs_api::{ObsApi, Subresource, parse_quota, parse_storage_info};
use crate::{
    BackendError, BucketMetadata, BucketOptions, FsStatus, MAX_DELETE_OBJECTS_REQUEST_SIZE,
    MultipartUpload, ObjectStorage, S3Config, StorageUsage, Tag,
};

const FS_FILE_INTERFACE_HEADER: &str = "x-obs-fs-file-interface";
const AZ_REDUNDANCY_HEADER: &str = "x-obs-az-redundancy";
const EPID_HEADER: &str = "x-obs-epid";
const BUCKET_LOCATION_HEADER: &str = "x-obs-bucket-location";

/// OBS bucket management.
pub struct S3Bucket {
    client: Client,
    obs: ObsApi,
    max_keys_per_list_response: Option<i32>,
    // Every request can be throttled if a certain number of requests per second is exceeded.
    concurrency_limiter: Arc<Semaphore>,
}

impl S3Bucket {
    /// Creates the client, errors if the configuration is incorrect.
    pub fn new(config: &S3Config) -> anyhow::Result<Self> {
        debug!(
            "Creating object storage client for region {} at {:?}",
            config.region, config.endpoint
        );

        let mut config_builder = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => SharedCredentialsProvider::new(
                Credentials::new(access_key, secret_key, None, None, "cloud-config"),
            ),
            (None, None) => {
                // uses "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"
                let chain = CredentialsProviderChain::first_try(
                    "env",
                    EnvironmentVariableCredentialsProvider::new(),
                )
                // uses imds v2
                .or_else("imds", ImdsCredentialsProvider::builder().build());
                SharedCredentialsProvider::new(chain)
            }
            _ => bail!("access_key and secret_key must be set together"),
        };
        config_builder = config_builder.credentials_provider(credentials.clone());

        if let Some(custom_endpoint) = config.endpoint.clone() {
            config_builder = config_builder
                .endpoint_url(custom_endpoint)
                .force_path_style(true);
        }

        let obs = ObsApi::new(config.endpoint.clone(), config.region.clone(), credentials)?;

        Ok(Self {
            client: Client::from_conf(config_builder.build()),
            obs,
            max_keys_per_list_response: config.max_keys_per_list_response,
            concurrency_limiter: Arc::new(Semaphore::new(config.concurrency_limit.get())),
        })
    }

    async fn permit(&self, kind: RequestKind) -> tokio::sync::SemaphorePermit<'_> {
        let started_at = std::time::Instant::now();
        let permit = self
            .concurrency_limiter
            .acquire()
            .await
            .expect("semaphore is never closed");

        BUCKET_METRICS
            .wait_seconds
            .with_label_values(&[kind.as_str()])
            .observe(started_at.elapsed().as_secs_f64());

        permit
    }

    /// Runs `request` under a concurrency limiter permit, recording its outcome.
    async fn timed<T, E>(
        &self,
        kind: RequestKind,
        request: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let _permit = self.permit(kind).await;
        let started_at = start_measuring_requests(kind);

        let res = request.await;

        let started_at = ScopeGuard::into_inner(started_at);
        BUCKET_METRICS.observe_elapsed(kind, &res, started_at);
        res
    }

    async fn bucket_location(&self, bucket: &str) -> Result<String, BackendError> {
        let response = self
            .timed(
                RequestKind::GetBucketLocation,
                self.client.get_bucket_location().bucket(bucket).send(),
            )
            .await
            .map_err(|e| backend_error("get bucket location", e))?;
        Ok(response
            .location_constraint()
            .map(|location| location.as_str().to_string())
            .unwrap_or_default())
    }

    async fn get_subresource(
        &self,
        bucket: &str,
        subresource: Subresource,
    ) -> Result<String, BackendError> {
        let kind = match subresource {
            Subresource::Quota => RequestKind::GetBucketQuota,
            Subresource::StorageInfo => RequestKind::GetBucketStorageInfo,
        };
        self.timed(kind, self.obs.get(bucket, subresource)).await
    }

    /// Every object key in the bucket.
    async fn list_all_objects(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        let kind = RequestKind::ListObjects;

        // The service may need to break the response into several parts
        let mut continuation_token = None;
        let mut all_objects = Vec::new();
        loop {
            let response = self
                .timed(
                    kind,
                    self.client
                        .list_objects_v2()
                        .bucket(bucket)
                        .set_continuation_token(continuation_token.take())
                        .set_max_keys(self.max_keys_per_list_response)
                        .send(),
                )
                .await
                .map_err(|e| backend_error("list objects", e))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    all_objects.push(key.to_string());
                }
            }

            match response.next_continuation_token {
                Some(new_token) => continuation_token = Some(new_token),
                None => break,
            }
        }
        Ok(all_objects)
    }
}

#[async_trait]
impl ObjectStorage for S3Bucket {
    async fn bucket_metadata(&self, bucket: &str) -> Result<BucketMetadata, BackendError> {
        let headers = CapturedHeaders::default();
        let response = self
            .timed(
                RequestKind::HeadBucket,
                self.client
                    .head_bucket()
                    .bucket(bucket)
                    .customize()
                    .config_override(Config::builder().interceptor(headers.clone()))
                    .send(),
            )
            .await
            .map_err(|e| backend_error("head bucket", e))?;

        let headers = headers.take();
        let mut metadata = metadata_from_headers(&headers);
        if metadata.location.is_empty() {
            metadata.location = match response.bucket_region() {
                Some(region) => region.to_string(),
                None => self.bucket_location(bucket).await?,
            };
        }
        Ok(metadata)
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &BucketOptions,
    ) -> Result<(), BackendError> {
        info!(
            "Creating bucket {bucket} in {:?}, acl {}, parallel fs {}",
            options.location, options.acl, options.parallel_fs
        );

        let mut request = self
            .client
            .create_bucket()
            .bucket(bucket)
            .acl(BucketCannedAcl::from(options.acl.to_string().as_str()));
        if !options.location.is_empty() {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(options.location.as_str()))
                    .build(),
            );
        }

        let obs_headers = create_headers(options);
        let request = request.customize().mutate_request(move |http_request| {
            for (name, value) in &obs_headers {
                http_request.headers_mut().insert(*name, value.clone());
            }
        });

        self.timed(RequestKind::CreateBucket, request.send())
            .await
            .map_err(|e| backend_error("create bucket", e))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        info!("Deleting bucket {bucket}");
        self.timed(
            RequestKind::DeleteBucket,
            self.client.delete_bucket().bucket(bucket).send(),
        )
        .await
        .map_err(|e| backend_error("delete bucket", e))?;
        Ok(())
    }

    async fn set_bucket_tags(&self, bucket: &str, tags: &[Tag]) -> Result<(), BackendError> {
        let kind = RequestKind::PutBucketTagging;

        // An empty tag set cannot be put, only deleted.
        if tags.is_empty() {
            self.timed(
                kind,
                self.client.delete_bucket_tagging().bucket(bucket).send(),
            )
            .await
            .map_err(|e| backend_error("delete bucket tagging", e))?;
            return Ok(());
        }

        let tag_set = tags
            .iter()
            .map(|tag| {
                aws_sdk_s3::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .context("invalid tag")
            .map_err(BackendError::other)?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .context("invalid tagging")
            .map_err(BackendError::other)?;

        self.timed(
            kind,
            self.client
                .put_bucket_tagging()
                .bucket(bucket)
                .tagging(tagging)
                .send(),
        )
        .await
        .map_err(|e| backend_error("put bucket tagging", e))?;
        Ok(())
    }

    async fn bucket_tags(&self, bucket: &str) -> Result<Vec<Tag>, BackendError> {
        let response = self
            .timed(
                RequestKind::GetBucketTagging,
                self.client.get_bucket_tagging().bucket(bucket).send(),
            )
            .await;

        match response {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|tag| Tag::new(tag.key(), tag.value()))
                .collect()),
            // A bucket that was never tagged has no tag set rather than an empty one.
            Err(e) if e.as_service_error().and_then(|e| e.code()) == Some("NoSuchTagSet") => {
                Ok(Vec::new())
            }
            Err(e) => Err(backend_error("get bucket tagging", e)),
        }
    }

    async fn bucket_storage_info(&self, bucket: &str) -> Result<StorageUsage, BackendError> {
        let body = self.get_subresource(bucket, Subresource::StorageInfo).await?;
        parse_storage_info(&body)
    }

    async fn bucket_quota(&self, bucket: &str) -> Result<i64, BackendError> {
        let body = self.get_subresource(bucket, Subresource::Quota).await?;
        parse_quota(&body)
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<MultipartUpload>, BackendError> {
        let kind = RequestKind::ListMultipartUploads;

        let mut key_marker = None;
        let mut upload_id_marker = None;
        let mut uploads = Vec::new();
        loop {
            let response = self
                .timed(
                    kind,
                    self.client
                        .list_multipart_uploads()
                        .bucket(bucket)
                        .set_key_marker(key_marker.take())
                        .set_upload_id_marker(upload_id_marker.take())
                        .send(),
                )
                .await
                .map_err(|e| backend_error("list multipart uploads", e))?;

            for upload in response.uploads() {
                if let (Some(key), Some(upload_id)) = (upload.key(), upload.upload_id()) {
                    uploads.push(MultipartUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    });
                }
            }

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            upload_id_marker = response.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }
        Ok(uploads)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), BackendError> {
        debug!(
            "Aborting multipart upload {} of {bucket}/{}",
            upload.upload_id, upload.key
        );
        self.timed(
            RequestKind::AbortMultipartUpload,
            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(&upload.key)
                .upload_id(&upload.upload_id)
                .send(),
        )
        .await
        .map_err(|e| backend_error("abort multipart upload", e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        self.list_all_objects(bucket).await
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BackendError> {
        let kind = RequestKind::DeleteObjects;

        for chunk in keys.chunks(MAX_DELETE_OBJECTS_REQUEST_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .context("invalid object key")
                .map_err(BackendError::other)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .context("invalid delete request")
                .map_err(BackendError::other)?;

            let response = self
                .timed(
                    kind,
                    self.client
                        .delete_objects()
                        .bucket(bucket)
                        .delete(delete)
                        .send(),
                )
                .await
                .map_err(|e| backend_error("delete objects", e))?;

            if let Some(first) = response.errors().first() {
                return Err(BackendError::other(anyhow!(
                    "failed to delete {} objects, first: {:?} {:?}",
                    response.errors().len(),
                    first.key(),
                    first.message()
                )));
            }
        }
        Ok(())
    }
}

/// Keeps the status of a failed call so it can be classified, and the SDK error as the cause.
fn backend_error<E>(what: &'static str, err: SdkError<E, HttpResponse>) -> BackendError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err
        .raw_response()
        .and_then(|response| http::StatusCode::from_u16(response.status().as_u16()).ok());
    BackendError::new(status, anyhow::Error::new(err).context(what))
}

/// The OBS extension headers of a create bucket request.
fn create_headers(options: &BucketOptions) -> Vec<(&'static str, String)> {
    let mut headers = Vec::new();
    if options.parallel_fs {
        headers.push((FS_FILE_INTERFACE_HEADER, "Enabled".to_string()));
    }
    if !options.enterprise_project_id.is_empty() {
        headers.push((EPID_HEADER, options.enterprise_project_id.clone()));
    }
    headers
}

fn metadata_from_headers(headers: &HashMap<String, String>) -> BucketMetadata {
    let header = |name: &str| headers.get(name).cloned().unwrap_or_default();
    BucketMetadata {
        location: header(BUCKET_LOCATION_HEADER),
        az_redundancy: header(AZ_REDUNDANCY_HEADER),
        enterprise_project_id: header(EPID_HEADER),
        fs_status: FsStatus::from_header(headers.get(FS_FILE_INTERFACE_HEADER).map(String::as_str)),
    }
}

/// Copies the OBS extension headers of a response, which the SDK does not model.
#[derive(Debug, Clone, Default)]
struct CapturedHeaders(Arc<Mutex<HashMap<String, String>>>);

impl CapturedHeaders {
    fn take(&self) -> HashMap<String, String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Intercept for CapturedHeaders {
    fn name(&self) -> &'static str {
        "CapturedHeaders"
    }

    fn read_before_deserialization(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let mut captured = self.0.lock().unwrap();
        for (name, value) in context.response().headers().iter() {
            let name = name.to_ascii_lowercase();
            if name.starts_with("x-obs-") {
                captured.insert(name, value.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::BucketAcl;

    fn config() -> S3Config {
        S3Config {
            region: "cn-north-4".to_string(),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            concurrency_limit: NonZeroUsize::new(10).unwrap(),
            max_keys_per_list_response: Some(5),
        }
    }

    #[tokio::test]
    async fn credentials_must_come_in_pairs() {
        assert!(S3Bucket::new(&config()).is_ok());
        assert!(
            S3Bucket::new(&S3Config {
                access_key: None,
                secret_key: None,
                ..config()
            })
            .is_ok()
        );
        assert!(
            S3Bucket::new(&S3Config {
                secret_key: None,
                ..config()
            })
            .is_err()
        );
    }

    /// Serves the quota and storage info sub-resources of `pvc-1` to signed requests.
    async fn serve_subresources() -> String {
        use axum::extract::{Path, RawQuery};
        use axum::http::{HeaderMap, StatusCode};

        async fn subresource(
            Path(bucket): Path<String>,
            RawQuery(query): RawQuery,
            headers: HeaderMap,
        ) -> (StatusCode, &'static str) {
            let signed = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.starts_with("AWS4-HMAC-SHA256 Credential=ak/"));
            if !signed {
                return (StatusCode::FORBIDDEN, "<Error><Code>AccessDenied</Code></Error>");
            }
            if bucket != "pvc-1" {
                return (
                    StatusCode::NOT_FOUND,
                    "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
                );
            }
            match query.as_deref() {
                Some("quota") => (
                    StatusCode::OK,
                    "<Quota><StorageQuota>1073741824</StorageQuota></Quota>",
                ),
                Some("storageinfo") => (
                    StatusCode::OK,
                    "<GetBucketStorageInfoResult><Size>42</Size><ObjectNumber>2</ObjectNumber></GetBucketStorageInfoResult>",
                ),
                _ => (StatusCode::BAD_REQUEST, ""),
            }
        }

        let app = axum::Router::new().route("/{bucket}", axum::routing::get(subresource));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn quota_and_storage_info_from_subresources() {
        let bucket = S3Bucket::new(&S3Config {
            endpoint: Some(serve_subresources().await),
            ..config()
        })
        .unwrap();

        assert_eq!(bucket.bucket_quota("pvc-1").await.unwrap(), 1 << 30);
        assert_eq!(
            bucket.bucket_storage_info("pvc-1").await.unwrap(),
            StorageUsage {
                size_bytes: 42,
                object_count: 2,
            }
        );

        let err = bucket.bucket_quota("absent").await.unwrap_err();
        assert_eq!(err.status, Some(http::StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("NoSuchBucket"), "{err}");
        assert!(crate::classify(crate::BucketOp::Quota, "absent", err).is_not_found());

        let err = bucket.bucket_storage_info("absent").await.unwrap_err();
        assert_eq!(err.status, Some(http::StatusCode::NOT_FOUND));
    }

    #[test]
    fn obs_create_headers() {
        let options = BucketOptions {
            acl: BucketAcl::Private,
            location: "cn-north-4".to_string(),
            enterprise_project_id: "0".to_string(),
            parallel_fs: true,
        };
        assert_eq!(
            create_headers(&options),
            vec![
                ("x-obs-fs-file-interface", "Enabled".to_string()),
                ("x-obs-epid", "0".to_string()),
            ]
        );

        let options = BucketOptions {
            enterprise_project_id: String::new(),
            parallel_fs: false,
            ..options
        };
        assert!(create_headers(&options).is_empty());
    }

    #[test]
    fn metadata_from_head_response() {
        let headers = HashMap::from([
            ("x-obs-fs-file-interface".to_string(), "Enabled".to_string()),
            ("x-obs-az-redundancy".to_string(), "3az".to_string()),
            ("x-obs-epid".to_string(), "epid-1".to_string()),
            ("x-obs-bucket-location".to_string(), "cn-north-4".to_string()),
        ]);
        assert_eq!(
            metadata_from_headers(&headers),
            BucketMetadata {
                location: "cn-north-4".to_string(),
                az_redundancy: "3az".to_string(),
                enterprise_project_id: "epid-1".to_string(),
                fs_status: FsStatus::Enabled,
            }
        );

        let metadata = metadata_from_headers(&HashMap::new());
        assert_eq!(metadata.fs_status, FsStatus::Disabled);
        assert!(metadata.location.is_empty());
    }
}
