use std::fmt;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::blob::BlobId;

/// Prefix of every pack blob id.
pub const PACK_BLOB_PREFIX: &str = "p";

/// Content-derived identifier of a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id of a block from its payload (lowercase hex MD5).
    pub fn from_content(data: &[u8]) -> Self {
        let hash = Md5::digest(data);
        Self(faster_hex::hex_string(&hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Blob holding the block when it is stored standalone.
    pub fn standalone_blob_id(&self) -> BlobId {
        BlobId::new(self.0.clone())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a packed block lives inside its pack blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackLocation {
    pub pack_blob_id: BlobId,
    pub offset: u64,
}

/// Index entry of a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_id: BlockId,
    /// Logical size of the block, never the size of its pack
    pub length: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` when the block is stored in its own blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<PackLocation>,
}

impl BlockInfo {
    pub fn standalone(block_id: BlockId, length: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            block_id,
            length,
            timestamp,
            pack: None,
        }
    }

    pub fn is_packed(&self) -> bool {
        self.pack.is_some()
    }

    pub fn pack_blob_id(&self) -> Option<&BlobId> {
        self.pack.as_ref().map(|p| &p.pack_blob_id)
    }

    /// The blob that currently holds this block's bytes.
    pub fn storage_blob_id(&self) -> BlobId {
        match &self.pack {
            Some(location) => location.pack_blob_id.clone(),
            None => self.block_id.standalone_blob_id(),
        }
    }

    /// Returns a copy of this entry relocated into `pack_blob_id` at `offset`.
    pub fn moved_to(&self, pack_blob_id: BlobId, offset: u64) -> Self {
        Self {
            pack: Some(PackLocation {
                pack_blob_id,
                offset,
            }),
            ..self.clone()
        }
    }
}
