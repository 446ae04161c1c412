//! In-memory block index and its persisted form.
//!
//! The index is published as an immutable snapshot. Writers build a complete
//! replacement map and swap it in under a short write lock, so a concurrent
//! lister sees every entry either entirely before or entirely after an update.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::info::{BlockId, BlockInfo};
use crate::blob::BlobId;

/// Blob holding the persisted index.
pub const INDEX_BLOB_ID: &str = "index";

const INDEX_FORMAT_VERSION: u32 = 1;

pub type IndexMap = BTreeMap<BlockId, BlockInfo>;

#[derive(Debug, Default)]
pub struct BlockIndex {
    entries: RwLock<Arc<IndexMap>>,
}

impl BlockIndex {
    pub fn new(entries: IndexMap) -> Self {
        Self {
            entries: RwLock::new(Arc::new(entries)),
        }
    }

    /// Returns the current snapshot. Later updates never modify it.
    pub fn snapshot(&self) -> Arc<IndexMap> {
        Arc::clone(&self.entries.read())
    }

    pub fn get(&self, id: &BlockId) -> Option<BlockInfo> {
        self.entries.read().get(id).cloned()
    }

    /// All entries whose id starts with `prefix`.
    pub fn list(&self, prefix: &str) -> Vec<BlockInfo> {
        let snapshot = self.snapshot();
        snapshot
            .range(BlockId::from(prefix)..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(_, info)| info.clone())
            .collect()
    }

    /// Atomically publishes a new set of entries.
    pub fn replace(&self, entries: IndexMap) {
        *self.entries.write() = Arc::new(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Number of entries in `entries` stored in `blob_id`, either as a pack or standalone.
pub fn references_to(entries: &IndexMap, blob_id: &BlobId) -> usize {
    entries
        .values()
        .filter(|info| &info.storage_blob_id() == blob_id)
        .count()
}

/// Serialized form of the index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexFile {
    pub version: u32,
    pub blocks: Vec<BlockInfo>,
}

impl IndexFile {
    pub fn from_entries(entries: &IndexMap) -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            blocks: entries.values().cloned().collect(),
        }
    }

    pub fn into_entries(self) -> Result<IndexMap, String> {
        if self.version != INDEX_FORMAT_VERSION {
            return Err(format!("unsupported index version {}", self.version));
        }

        let mut entries = IndexMap::new();
        for info in self.blocks {
            if entries.insert(info.block_id.clone(), info).is_some() {
                return Err("duplicate block id in index".to_string());
            }
        }
        Ok(entries)
    }
}
