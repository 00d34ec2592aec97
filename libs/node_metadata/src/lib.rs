//! Discovery of the local compute node: its instance id, availability zone and
//! the host paths of attached volumes.
//!
//! Metadata is read from one of two [`MetadataSource`]s, tried in the order the
//! `search-order` option lists them:
//!   * [`metadata_service`] fetches `meta_data.json` from the link-local metadata service
//!   * [`config_drive`] mounts the `config-2` labelled drive and reads the same document from it
//!
//! [`MetadataResolver`] drives the fallback and keeps the first result in a [`MetadataCache`].
//! [`DeviceMatcher`] maps a volume id to its `/dev/disk/by-path` entry.
mod cache;
mod config;
pub mod config_drive;
mod device;
mod error;
pub mod metadata_service;
pub mod mount;
mod resolver;
mod search_order;
mod source;
mod types;

pub use self::{
    cache::MetadataCache,
    config::{DEFAULT_REQUEST_TIMEOUT, MetadataOpts},
    config_drive::ConfigDriveSource,
    device::{DISK_BY_PATH_DIR, DeviceLookup, DeviceMatcher},
    error::MetadataError,
    metadata_service::MetadataServiceSource,
    resolver::MetadataResolver,
    search_order::{MetadataSourceKind, SearchOrder},
    source::{DEFAULT_METADATA_VERSION, MetadataSource},
    types::{DeviceMetadata, Metadata},
};
