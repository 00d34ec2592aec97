//! Resolution against a local stand-in for the metadata service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use camino::Utf8Path;
use node_metadata::mount::{CommandRunner, SystemMounter};
use node_metadata::{
    ConfigDriveSource, DeviceLookup, DeviceMatcher, Metadata, MetadataCache, MetadataError,
    MetadataResolver, MetadataServiceSource,
};

/// `blkid` on a host without a config drive: exits cleanly, prints nothing.
struct NoConfigDrive;

#[async_trait]
impl CommandRunner for NoConfigDrive {
    async fn run(&self, _program: &str, _args: &[&str]) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn metadata_service(document: &'static str) -> MetadataServiceSource {
    let router = Router::new().route(
        "/openstack/latest/meta_data.json",
        get(move || async move { document }),
    );
    let addr = serve(router).await;
    MetadataServiceSource::new(Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("http://{addr}"))
}

fn absent_config_drive(by_label_dir: &Utf8Path) -> ConfigDriveSource {
    ConfigDriveSource::new(Arc::new(SystemMounter), Arc::new(NoConfigDrive))
        .with_by_label_dir(by_label_dir)
}

#[tokio::test]
async fn falls_back_to_metadata_service_without_config_drive() {
    let by_label = camino_tempfile::tempdir().unwrap();
    let service =
        metadata_service(r#"{"uuid":"abc-1","availability_zone":"az1","devices":[]}"#).await;

    let resolver = MetadataResolver::new(
        "configDrive,metadataService".parse().unwrap(),
        Arc::new(MetadataCache::new()),
    )
    .with_source(Arc::new(absent_config_drive(by_label.path())))
    .with_source(Arc::new(service));

    assert_eq!(resolver.instance_id().await.unwrap(), "abc-1");
    assert_eq!(resolver.availability_zone().await.unwrap(), "az1");
}

#[tokio::test]
async fn metadata_service_errors_surface_after_fallback() {
    let by_label = camino_tempfile::tempdir().unwrap();
    let router = Router::new().route(
        "/openstack/latest/meta_data.json",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
    );
    let addr = serve(router).await;
    let service = MetadataServiceSource::new(Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("http://{addr}"));

    let resolver = MetadataResolver::new(
        "configDrive,metadataService".parse().unwrap(),
        Arc::new(MetadataCache::new()),
    )
    .with_source(Arc::new(absent_config_drive(by_label.path())))
    .with_source(Arc::new(service));

    let err = resolver.instance_id().await.unwrap_err();
    assert!(
        matches!(err, MetadataError::HttpStatus { status, .. } if status.as_u16() == 503),
        "{err:?}"
    );
    assert!(resolver.cache().get().is_none());
}

#[tokio::test]
async fn empty_uuid_from_service_is_malformed() {
    let service = metadata_service(r#"{"uuid":"","availability_zone":"az1"}"#).await;
    let resolver = MetadataResolver::new(
        "metadataService".parse().unwrap(),
        Arc::new(MetadataCache::new()),
    )
    .with_source(Arc::new(service));

    let err = resolver.instance_id().await.unwrap_err();
    assert!(matches!(err, MetadataError::Malformed), "{err:?}");
}

#[tokio::test]
async fn device_path_of_attached_volume() {
    let by_path = camino_tempfile::tempdir().unwrap();
    std::fs::write(by_path.path().join("pci-0000:00:00.0-scsi-0:0:0:1"), b"").unwrap();

    let service = Arc::new(
        metadata_service(
            r#"{
                "uuid": "abc-1",
                "availability_zone": "az1",
                "devices": [
                    {"type": "disk", "bus": "scsi", "serial": "vol-123", "address": "0:0:0:1"}
                ]
            }"#,
        )
        .await,
    );

    let resolver = MetadataResolver::new(
        "metadataService".parse().unwrap(),
        Arc::new(MetadataCache::new()),
    )
    .with_source(service.clone())
    .with_device_matcher(DeviceMatcher::new(service).with_by_path_dir(by_path.path()));

    let expected = by_path.path().join("pci-0000:00:00.0-scsi-0:0:0:1");
    assert_eq!(
        resolver.locate_device("vol-123").await,
        DeviceLookup::Found(expected.clone())
    );
    assert_eq!(resolver.device_path("vol-123").await, Some(expected));
    assert_eq!(resolver.device_path("vol-404").await, None);
}

#[tokio::test]
async fn device_path_reads_fresh_metadata_past_the_cache() {
    let by_path = camino_tempfile::tempdir().unwrap();
    std::fs::write(by_path.path().join("pci-0000:00:00.0-virtio-0:0:0:2"), b"").unwrap();

    let service = Arc::new(
        metadata_service(
            r#"{
                "uuid": "abc-1",
                "availability_zone": "az1",
                "devices": [
                    {"type": "disk", "bus": "virtio", "serial": "vol-new", "address": "0:0:0:2"}
                ]
            }"#,
        )
        .await,
    );

    // Cached before the volume was attached.
    let cache = Arc::new(MetadataCache::new());
    cache.set(
        Metadata::parse(br#"{"uuid":"abc-1","availability_zone":"az1","devices":[]}"#).unwrap(),
    );

    let resolver = MetadataResolver::new("metadataService".parse().unwrap(), cache.clone())
        .with_source(service.clone())
        .with_device_matcher(DeviceMatcher::new(service).with_by_path_dir(by_path.path()));

    assert_eq!(
        resolver.device_path("vol-new").await,
        Some(by_path.path().join("pci-0000:00:00.0-virtio-0:0:0:2"))
    );
    assert!(cache.get().unwrap().devices.is_empty());
}
