use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::trace;

use super::{resolve_range, BlobId, BlobStorage, ListCallback, Metadata};
use crate::error::BlobError;
use crate::gather::{GatherBytes, WriteBuffer};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    timestamp: DateTime<Utc>,
}

/// In-memory [`BlobStorage`] for tests and local development.
///
/// Blob contents are immutable `Bytes` values replaced as a whole, so a reader
/// holding a clone keeps seeing the content that was current when it looked.
/// Deleting an absent blob returns `NotFound`.
#[derive(Debug, Default)]
pub struct MapStorage {
    blobs: RwLock<BTreeMap<BlobId, StoredBlob>>,
}

impl MapStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.blobs.read().contains_key(id)
    }
}

#[async_trait]
impl BlobStorage for MapStorage {
    async fn get_blob(
        &self,
        id: &BlobId,
        offset: u64,
        length: Option<u64>,
        output: &mut WriteBuffer,
    ) -> Result<(), BlobError> {
        let data = match self.blobs.read().get(id) {
            Some(blob) => blob.data.clone(),
            None => return Err(BlobError::NotFound(id.clone())),
        };

        let (start, end) = resolve_range(id, data.len() as u64, offset, length)?;
        output.reset();
        output.append(&data[start..end]);
        Ok(())
    }

    async fn put_blob(&self, id: &BlobId, data: GatherBytes<'_>) -> Result<(), BlobError> {
        let blob = StoredBlob {
            data: Bytes::from(data.to_vec()),
            timestamp: Utc::now(),
        };
        trace!(blob_id = %id, length = blob.data.len(), "put blob");
        self.blobs.write().insert(id.clone(), blob);
        Ok(())
    }

    async fn delete_blob(&self, id: &BlobId) -> Result<(), BlobError> {
        match self.blobs.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound(id.clone())),
        }
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        visit: &mut ListCallback<'_>,
    ) -> Result<(), BlobError> {
        // snapshot first so callbacks never run under the lock
        let matching: Vec<Metadata> = self
            .blobs
            .read()
            .range(BlobId::from(prefix)..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(id, blob)| Metadata {
                blob_id: id.clone(),
                length: blob.data.len() as u64,
                timestamp: blob.timestamp,
            })
            .collect();

        for metadata in matching {
            visit(metadata)?;
        }
        Ok(())
    }
}
