//! Process-wide slot for the resolved instance metadata.
//!
//! The node identity does not change for the lifetime of the process, so the
//! first successful resolution is kept and served to every later caller.
//! Concurrent first-time resolutions are not serialized: each may query the
//! sources, and the last one to finish overwrites the slot. Since every
//! writer stores the same node identity, the race only costs duplicate I/O.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::types::Metadata;

static PROCESS_CACHE: Lazy<Arc<MetadataCache>> = Lazy::new(|| Arc::new(MetadataCache::new()));

#[derive(Debug, Default)]
pub struct MetadataCache {
    slot: RwLock<Option<Arc<Metadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by everything in this process.
    pub fn shared() -> Arc<MetadataCache> {
        Arc::clone(&PROCESS_CACHE)
    }

    pub fn get(&self) -> Option<Arc<Metadata>> {
        self.slot.read().unwrap().clone()
    }

    /// Stores `metadata`, replacing whatever was cached, and returns the stored value.
    pub fn set(&self, metadata: Metadata) -> Arc<Metadata> {
        let metadata = Arc::new(metadata);
        *self.slot.write().unwrap() = Some(Arc::clone(&metadata));
        metadata
    }

    pub fn clear(&self) {
        self.slot.write().unwrap().take();
    }
}
