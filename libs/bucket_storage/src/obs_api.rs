//! OBS bucket sub-resources the S3 API does not model: `?quota` and `?storageinfo`.
//!
//! The requests are plain GETs on the bucket, signed with SigV4 like the rest of the
//! S3-compatible API, and answered with small XML documents.

use std::time::SystemTime;

use anyhow::{Context, anyhow};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest, SigningParams,
    SigningSettings, UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use serde::Deserialize;

use crate::{BackendError, StorageUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Subresource {
    Quota,
    StorageInfo,
}

impl Subresource {
    const fn query(&self) -> &'static str {
        match self {
            Subresource::Quota => "quota",
            Subresource::StorageInfo => "storageinfo",
        }
    }
}

pub(crate) struct ObsApi {
    http: reqwest::Client,
    endpoint: Option<String>,
    region: String,
    credentials: SharedCredentialsProvider,
}

impl ObsApi {
    pub(crate) fn new(
        endpoint: Option<String>,
        region: String,
        credentials: SharedCredentialsProvider,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build the OBS http client")?;
        Ok(Self {
            http,
            endpoint,
            region,
            credentials,
        })
    }

    fn url(&self, bucket: &str, subresource: Subresource) -> Result<String, BackendError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            BackendError::other(anyhow!(
                "the {} sub-resource is only served by an OBS endpoint, none is configured",
                subresource.query()
            ))
        })?;
        Ok(format!(
            "{}/{bucket}?{}",
            endpoint.trim_end_matches('/'),
            subresource.query()
        ))
    }

    /// Fetches the sub-resource document of `bucket`.
    pub(crate) async fn get(
        &self,
        bucket: &str,
        subresource: Subresource,
    ) -> Result<String, BackendError> {
        let url = self.url(bucket, subresource)?;

        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .context("failed to load credentials")
            .map_err(BackendError::other)?;
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .context("invalid signing parameters")
            .map_err(BackendError::other)?
            .into();
        let signable =
            SignableRequest::new("GET", url.as_str(), std::iter::empty(), SignableBody::Bytes(&[]))
                .context("invalid request to sign")
                .map_err(BackendError::other)?;
        let (instructions, _signature) = sign(signable, &params)
            .context("failed to sign request")
            .map_err(BackendError::other)?
            .into_parts();

        let mut request = self.http.get(&url);
        for (name, value) in instructions.headers() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {url}"))
            .map_err(BackendError::other)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading the response of GET {url}"))
            .map_err(BackendError::other)?;
        if !status.is_success() {
            return Err(BackendError::new(
                Some(status),
                anyhow!("GET {url}: {}", error_message(&body)),
            ));
        }
        Ok(body)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuotaDocument {
    storage_quota: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StorageInfoDocument {
    size: i64,
    object_number: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDocument {
    code: String,
    #[serde(default)]
    message: String,
}

pub(crate) fn parse_quota(body: &str) -> Result<i64, BackendError> {
    quick_xml::de::from_str::<QuotaDocument>(body)
        .map(|document| document.storage_quota)
        .context("malformed bucket quota document")
        .map_err(BackendError::other)
}

pub(crate) fn parse_storage_info(body: &str) -> Result<StorageUsage, BackendError> {
    quick_xml::de::from_str::<StorageInfoDocument>(body)
        .map(|document| StorageUsage {
            size_bytes: document.size,
            object_count: document.object_number,
        })
        .context("malformed bucket storage info document")
        .map_err(BackendError::other)
}

/// `Code: Message` of an error document, or the raw body if it is not one.
fn error_message(body: &str) -> String {
    match quick_xml::de::from_str::<ErrorDocument>(body) {
        Ok(ErrorDocument { code, message }) if message.is_empty() => code,
        Ok(ErrorDocument { code, message }) => format!("{code}: {message}"),
        Err(_) => body.trim().to_string(),
    }
}
