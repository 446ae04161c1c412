//! Block layer: maps block ids to their bytes, either stored in a blob of
//! their own or at an offset inside a pack blob.
//!
//! All index mutations (writes, deletes, repackaging) are serialized by a
//! single writer lock and published as whole snapshots. Readers never take
//! that lock.

pub mod index;
pub mod info;
pub mod listing;
pub mod repack;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::blob::{BlobId, BlobStorage};
use crate::error::{BlobError, BlockError, ErrorKind, Result};
use crate::gather::{default_allocator, ChunkAllocator, GatherBytes, WriteBuffer};
use crate::metrics::SharedMetrics;
use index::{references_to, BlockIndex, IndexFile, IndexMap, INDEX_BLOB_ID};

pub use info::{BlockId, BlockInfo, PackLocation, PACK_BLOB_PREFIX};

/// Number of block payloads read in parallel while assembling a pack.
pub const DEFAULT_READ_CONCURRENCY: usize = 8;

/// Tunables of a [`BlockManager`].
#[derive(Debug, Clone)]
pub struct BlockManagerOptions {
    /// Allocator backing the buffers the manager creates
    pub alloc: Arc<ChunkAllocator>,
    pub metrics: SharedMetrics,
    pub read_concurrency: usize,
}

impl Default for BlockManagerOptions {
    fn default() -> Self {
        Self {
            alloc: default_allocator(),
            metrics: SharedMetrics::default(),
            read_concurrency: DEFAULT_READ_CONCURRENCY,
        }
    }
}

/// Repository handle for blocks stored on a [`BlobStorage`].
#[derive(Debug)]
pub struct BlockManager {
    storage: Arc<dyn BlobStorage>,
    index: BlockIndex,
    options: BlockManagerOptions,
    write_lock: Mutex<()>,
}

impl BlockManager {
    /// Opens the block index persisted in `storage`. A storage without an
    /// index blob yields an empty repository.
    pub async fn open(storage: Arc<dyn BlobStorage>) -> Result<Self> {
        Self::open_with(storage, BlockManagerOptions::default()).await
    }

    pub async fn open_with(
        storage: Arc<dyn BlobStorage>,
        options: BlockManagerOptions,
    ) -> Result<Self> {
        let entries = load_index(storage.as_ref(), &options).await?;
        debug!(blocks = entries.len(), "opened block index");

        Ok(Self {
            storage,
            index: BlockIndex::new(entries),
            options,
            write_lock: Mutex::new(()),
        })
    }

    pub fn storage(&self) -> Arc<dyn BlobStorage> {
        Arc::clone(&self.storage)
    }

    /// Returns the entries whose id starts with `prefix`, in id order.
    ///
    /// The result reflects a single index snapshot: a concurrent repack is
    /// observed either entirely or not at all.
    pub async fn list_blocks(&self, prefix: &str) -> Result<Vec<BlockInfo>> {
        Ok(self.index.list(prefix))
    }

    pub fn block_info(&self, id: &BlockId) -> Option<BlockInfo> {
        self.index.get(id)
    }

    /// Stores `data` as a standalone block and returns its id. Writing content
    /// that is already present is a no-op.
    pub async fn write_block(&self, data: &[u8]) -> Result<BlockId> {
        let block_id = BlockId::from_content(data);
        let _guard = self.write_lock.lock().await;

        let current = self.index.snapshot();
        if current.contains_key(&block_id) {
            debug!(block_id = %block_id, "block already present");
            return Ok(block_id);
        }

        let blob_id = block_id.standalone_blob_id();
        self.storage
            .put_blob(&blob_id, GatherBytes::from_slice(data))
            .await?;
        self.options.metrics.blob_written(data.len());

        let mut next = (*current).clone();
        next.insert(
            block_id.clone(),
            BlockInfo::standalone(block_id.clone(), data.len() as u64, Utc::now()),
        );
        if let Err(e) = self.commit(next).await {
            warn!(blob_id = %blob_id, error = %e, "index commit failed, block blob is orphaned");
            return Err(e);
        }

        debug!(block_id = %block_id, length = data.len(), "wrote block");
        Ok(block_id)
    }

    /// Reads the payload of block `id` into `output`.
    ///
    /// An unknown id is `NotFound`. An entry whose backing blob is missing or
    /// too short is an invariant violation.
    pub async fn get_block(&self, id: &BlockId, output: &mut WriteBuffer) -> Result<()> {
        let mut info = self
            .index
            .get(id)
            .ok_or_else(|| BlockError::NotFound(id.clone()))?;

        loop {
            match self.read_block(&info, output).await {
                Err(e) if e.kind() == ErrorKind::InvariantViolation => {
                    // a concurrent repack may have moved the block and retired its old blob
                    match self.index.get(id) {
                        Some(current) if current != info => info = current,
                        Some(_) => return Err(e),
                        None => return Err(BlockError::NotFound(id.clone())),
                    }
                }
                outcome => return outcome,
            }
        }
    }

    /// Removes block `id` from the index, then deletes the blob that held it
    /// if no other block refers to that blob anymore.
    pub async fn delete_block(&self, id: &BlockId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let current = self.index.snapshot();
        let Some(info) = current.get(id) else {
            return Err(BlockError::NotFound(id.clone()));
        };

        let blob_id = info.storage_blob_id();
        let mut next = (*current).clone();
        next.remove(id);
        let unreferenced = references_to(&next, &blob_id) == 0;

        self.commit(next).await?;
        debug!(block_id = %id, "deleted block");

        if unreferenced {
            self.delete_blob_if_present(&blob_id).await?;
        }
        Ok(())
    }

    /// Reads exactly the bytes of `info` into `output` and verifies the length.
    pub(crate) async fn read_block(&self, info: &BlockInfo, output: &mut WriteBuffer) -> Result<()> {
        let blob_id = info.storage_blob_id();
        let offset = info.pack.as_ref().map_or(0, |p| p.offset);

        match self
            .storage
            .get_blob(&blob_id, offset, Some(info.length), output)
            .await
        {
            Ok(()) => {}
            Err(BlobError::NotFound(_)) => {
                return Err(BlockError::InvariantViolation(format!(
                    "block {} refers to missing blob {}",
                    info.block_id, blob_id
                )));
            }
            Err(e @ BlobError::InvalidRange { .. }) => {
                return Err(BlockError::InvariantViolation(format!(
                    "block {} lies outside its blob: {}",
                    info.block_id, e
                )));
            }
            Err(e) => return Err(e.into()),
        }

        if output.length() as u64 != info.length {
            return Err(BlockError::InvariantViolation(format!(
                "block {} has {} bytes, index says {}",
                info.block_id,
                output.length(),
                info.length
            )));
        }

        self.options.metrics.blob_read(output.length());
        Ok(())
    }

    /// Durably stores `next` as the index, then publishes it in memory.
    ///
    /// Callers must hold the writer lock. On failure neither the persisted nor
    /// the in-memory index changes.
    async fn commit(&self, next: IndexMap) -> Result<()> {
        let encoded = serde_json::to_vec(&IndexFile::from_entries(&next))
            .map_err(|e| BlockError::InvariantViolation(format!("cannot encode index: {e}")))?;

        self.storage
            .put_blob(&BlobId::from(INDEX_BLOB_ID), GatherBytes::from_slice(&encoded))
            .await?;
        self.options.metrics.blob_written(encoded.len());

        self.index.replace(next);
        Ok(())
    }

    /// Deletes `blob_id`, treating an already absent blob as success.
    async fn delete_blob_if_present(&self, blob_id: &BlobId) -> std::result::Result<(), BlobError> {
        match self.storage.delete_blob(blob_id).await {
            Ok(()) => {
                self.options.metrics.blob_deleted();
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn load_index(storage: &dyn BlobStorage, options: &BlockManagerOptions) -> Result<IndexMap> {
    let mut buf = WriteBuffer::with_allocator(Arc::clone(&options.alloc));
    match storage
        .get_blob(&BlobId::from(INDEX_BLOB_ID), 0, None, &mut buf)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(IndexMap::new()),
        Err(e) => return Err(e.into()),
    }
    options.metrics.blob_read(buf.length());

    let file: IndexFile = serde_json::from_slice(&buf.to_byte_slice())
        .map_err(|e| BlockError::InvariantViolation(format!("corrupt index blob: {e}")))?;
    file.into_entries().map_err(BlockError::InvariantViolation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MapStorage;
    use crate::blobtesting::{FaultyStorage, Operation};

    async fn manager() -> (Arc<MapStorage>, BlockManager) {
        let storage = Arc::new(MapStorage::new());
        let blocks = BlockManager::open(storage.clone()).await.unwrap();
        (storage, blocks)
    }

    async fn read(blocks: &BlockManager, id: &BlockId) -> Vec<u8> {
        let mut out = WriteBuffer::new();
        blocks.get_block(id, &mut out).await.unwrap();
        out.to_byte_slice().into_owned()
    }

    #[tokio::test]
    async fn test_open_empty_storage() {
        let (_, blocks) = manager().await;
        assert!(blocks.list_blocks("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_and_read_block() {
        let (storage, blocks) = manager().await;

        let id = blocks.write_block(b"hello").await.unwrap();
        assert_eq!(id.as_str(), "5d41402abc4b2a76b9719d911017c592");
        assert!(storage.contains(&id.standalone_blob_id()));
        assert!(storage.contains(&BlobId::from(INDEX_BLOB_ID)));
        assert_eq!(read(&blocks, &id).await, b"hello");

        let info = blocks.block_info(&id).unwrap();
        assert_eq!(info.length, 5);
        assert!(!info.is_packed());
    }

    #[tokio::test]
    async fn test_write_block_deduplicates() {
        let (_, blocks) = manager().await;

        let first = blocks.write_block(b"same").await.unwrap();
        let stamp = blocks.block_info(&first).unwrap().timestamp;
        let second = blocks.write_block(b"same").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(blocks.list_blocks("").await.unwrap().len(), 1);
        assert_eq!(blocks.block_info(&first).unwrap().timestamp, stamp);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let (storage, blocks) = manager().await;
        let a = blocks.write_block(b"alpha").await.unwrap();
        let b = blocks.write_block(b"beta").await.unwrap();
        let before = blocks.list_blocks("").await.unwrap();
        drop(blocks);

        let reopened = BlockManager::open(storage).await.unwrap();
        assert_eq!(reopened.list_blocks("").await.unwrap(), before);
        assert_eq!(read(&reopened, &a).await, b"alpha");
        assert_eq!(read(&reopened, &b).await, b"beta");
    }

    #[tokio::test]
    async fn test_list_blocks_by_prefix() {
        let (_, blocks) = manager().await;
        let id = blocks.write_block(b"hello").await.unwrap();
        blocks.write_block(b"world").await.unwrap();

        let listed = blocks.list_blocks(&id.as_str()[..6]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block_id, id);
        assert!(blocks.list_blocks("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_block_is_not_found() {
        let (_, blocks) = manager().await;
        let mut out = WriteBuffer::new();
        let err = blocks
            .get_block(&BlockId::from("0123"), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_backing_blob_is_invariant_violation() {
        let (storage, blocks) = manager().await;
        let id = blocks.write_block(b"hello").await.unwrap();
        storage.delete_blob(&id.standalone_blob_id()).await.unwrap();

        let mut out = WriteBuffer::new();
        let err = blocks.get_block(&id, &mut out).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn test_truncated_backing_blob_is_invariant_violation() {
        let (storage, blocks) = manager().await;
        let id = blocks.write_block(b"hello").await.unwrap();
        storage
            .put_blob(&id.standalone_blob_id(), GatherBytes::from_slice(b"he"))
            .await
            .unwrap();

        let mut out = WriteBuffer::new();
        let err = blocks.get_block(&id, &mut out).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn test_delete_block() {
        let (storage, blocks) = manager().await;
        let id = blocks.write_block(b"hello").await.unwrap();

        blocks.delete_block(&id).await.unwrap();
        assert!(blocks.block_info(&id).is_none());
        assert!(!storage.contains(&id.standalone_blob_id()));

        let err = blocks.delete_block(&id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_invariant_violation() {
        let storage = Arc::new(MapStorage::new());
        storage
            .put_blob(&BlobId::from(INDEX_BLOB_ID), GatherBytes::from_slice(b"{not json"))
            .await
            .unwrap();

        let err = BlockManager::open(storage).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn test_failed_index_commit_leaves_index_unchanged() {
        let inner = Arc::new(MapStorage::new());
        let faulty = Arc::new(FaultyStorage::new(inner.clone()));
        let blocks = BlockManager::open(faulty.clone()).await.unwrap();

        let kept = blocks.write_block(b"kept").await.unwrap();
        faulty.add_fault(Operation::Put, INDEX_BLOB_ID, Some(1));

        let err = blocks.write_block(b"lost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(blocks.list_blocks("").await.unwrap().len(), 1);

        let reopened = BlockManager::open(inner).await.unwrap();
        let listed = reopened.list_blocks("").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block_id, kept);
    }
}
