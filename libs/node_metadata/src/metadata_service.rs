use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::info;

use crate::error::MetadataError;
use crate::search_order::MetadataSourceKind;
use crate::source::MetadataSource;
use crate::types::Metadata;

/// Link-local address of the OpenStack-compatible metadata service.
pub const METADATA_SERVICE_ADDR: &str = "http://169.254.169.254";

/// Reads `meta_data.json` over HTTP from the metadata service.
#[derive(Debug, Clone)]
pub struct MetadataServiceSource {
    client: Client,
    base_url: String,
}

impl MetadataServiceSource {
    /// `request_timeout` bounds the whole request, connect included.
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build metadata service http client")?;
        Ok(Self {
            client,
            base_url: METADATA_SERVICE_ADDR.to_string(),
        })
    }

    /// Points the source at another server, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn metadata_url(&self, version: &str) -> String {
        format!(
            "{}/openstack/{version}/meta_data.json",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl MetadataSource for MetadataServiceSource {
    fn kind(&self) -> MetadataSourceKind {
        MetadataSourceKind::MetadataService
    }

    async fn fetch(&self, version: &str) -> Result<Metadata, MetadataError> {
        let url = self.metadata_url(version);
        info!("Attempting to fetch metadata from {url}");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(source) => return Err(MetadataError::Network { url, source }),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(MetadataError::HttpStatus { url, status });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(source) => return Err(MetadataError::Network { url, source }),
        };
        Metadata::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_url() {
        let source = MetadataServiceSource::new(Duration::from_secs(1)).unwrap();
        assert_eq!(
            source.metadata_url("latest"),
            "http://169.254.169.254/openstack/latest/meta_data.json"
        );

        let source = source.with_base_url("http://127.0.0.1:8080/");
        assert_eq!(
            source.metadata_url("2012-08-10"),
            "http://127.0.0.1:8080/openstack/2012-08-10/meta_data.json"
        );
    }
}
