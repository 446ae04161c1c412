//! Repackaging: consolidates small blocks into freshly written packs.
//!
//! A pass selects every block below a size threshold, writes them into new
//! pack blobs, commits one index update that points the moved entries at the
//! new packs, and only then deletes the blobs nothing refers to anymore. A
//! failure before the commit leaves the index untouched; the packs written so
//! far are orphaned and never referenced.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::index::{references_to, IndexMap};
use super::info::{BlockInfo, PACK_BLOB_PREFIX};
use super::listing::compare_packs;
use super::BlockManager;
use crate::blob::BlobId;
use crate::error::{BlockError, Result};
use crate::gather::WriteBuffer;

/// Default pack size as a multiple of the repack threshold.
pub const DEFAULT_PACK_SIZE_MULTIPLIER: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepackOptions {
    /// Blocks strictly smaller than this are repacked
    pub max_block_size: u64,
    /// A new pack is closed as soon as its bytes reach this size, so the
    /// block that crosses it still lands in that pack
    pub target_pack_size: u64,
}

impl RepackOptions {
    pub fn new(max_block_size: u64) -> Self {
        Self {
            max_block_size,
            target_pack_size: max_block_size.saturating_mul(DEFAULT_PACK_SIZE_MULTIPLIER),
        }
    }

    pub fn with_target_pack_size(mut self, target_pack_size: u64) -> Self {
        self.target_pack_size = target_pack_size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 {
            return Err(BlockError::InvalidArgument(
                "repack threshold must be positive".to_string(),
            ));
        }
        if self.target_pack_size == 0 {
            return Err(BlockError::InvalidArgument(
                "target pack size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one repack pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepackStats {
    pub blocks_moved: u64,
    pub bytes_moved: u64,
    pub packs_written: u64,
    /// Old packs and standalone blobs deleted after the commit
    pub blobs_retired: u64,
}

impl BlockManager {
    /// Repackages every block smaller than `max_block_size` using the default
    /// pack size.
    pub async fn repackage(&self, max_block_size: u64) -> Result<RepackStats> {
        self.repackage_with(RepackOptions::new(max_block_size)).await
    }

    pub async fn repackage_with(&self, options: RepackOptions) -> Result<RepackStats> {
        options.validate()?;
        let _guard = self.write_lock.lock().await;

        let current = self.index.snapshot();
        let selected = select_blocks(&current, options.max_block_size);
        if !worth_repacking(&current, &selected) {
            debug!(
                selected = selected.len(),
                max_block_size = options.max_block_size,
                "nothing to repack"
            );
            return Ok(RepackStats::default());
        }

        let mut stats = RepackStats::default();
        let mut next: IndexMap = (*current).clone();
        let mut written: Vec<BlobId> = Vec::new();

        for group in group_blocks(&selected, options.target_pack_size) {
            let pack_id = new_pack_blob_id();
            let offsets = match self.write_pack(&pack_id, group).await {
                Ok(offsets) => offsets,
                Err(e) => {
                    if !written.is_empty() {
                        warn!(packs = ?written, "repack aborted, orphaning packs written so far");
                    }
                    return Err(e);
                }
            };

            for (info, offset) in group.iter().zip(offsets) {
                next.insert(info.block_id.clone(), info.moved_to(pack_id.clone(), offset));
                stats.blocks_moved += 1;
                stats.bytes_moved += info.length;
            }
            stats.packs_written += 1;
            written.push(pack_id);
        }

        // blobs that held the moved blocks and are no longer referenced
        let retired: BTreeSet<BlobId> = selected
            .iter()
            .map(BlockInfo::storage_blob_id)
            .filter(|blob_id| references_to(&next, blob_id) == 0)
            .collect();

        if let Err(e) = self.commit(next).await {
            warn!(packs = ?written, error = %e, "index commit failed, new packs are orphaned");
            return Err(e);
        }

        let mut first_error = None;
        for blob_id in &retired {
            match self.delete_blob_if_present(blob_id).await {
                Ok(()) => stats.blobs_retired += 1,
                Err(e) => {
                    warn!(blob_id = %blob_id, error = %e, "failed to retire blob");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.options.metrics.blocks_repacked(stats.blocks_moved);
        self.options.metrics.blobs_retired(stats.blobs_retired);
        info!(
            blocks = stats.blocks_moved,
            bytes = stats.bytes_moved,
            packs = stats.packs_written,
            retired = stats.blobs_retired,
            "repacked blocks"
        );

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(stats),
        }
    }

    /// Writes the payloads of `group` back to back into pack `pack_id` and
    /// returns the offset of each block, in group order.
    async fn write_pack(&self, pack_id: &BlobId, group: &[BlockInfo]) -> Result<Vec<u64>> {
        let mut pack = WriteBuffer::with_allocator(Arc::clone(&self.options.alloc));
        let mut offsets = Vec::with_capacity(group.len());

        let mut payloads = stream::iter(group.iter().map(|info| self.read_payload(info)))
            .buffered(self.options.read_concurrency.max(1));
        while let Some(payload) = payloads.next().await {
            let payload = payload?;
            offsets.push(pack.length() as u64);
            pack.append_bytes(&payload.bytes());
        }

        self.storage.put_blob(pack_id, pack.bytes()).await?;
        self.options.metrics.pack_written(pack.length());
        debug!(pack = %pack_id, blocks = group.len(), length = pack.length(), "wrote pack");

        Ok(offsets)
    }

    async fn read_payload(&self, info: &BlockInfo) -> Result<WriteBuffer> {
        let mut buf = WriteBuffer::with_allocator(Arc::clone(&self.options.alloc));
        self.read_block(info, &mut buf).await?;
        Ok(buf)
    }
}

fn new_pack_blob_id() -> BlobId {
    BlobId::from(format!("{}{}", PACK_BLOB_PREFIX, Uuid::new_v4().simple()))
}

/// Blocks below the threshold, ordered by current location then id so that
/// blocks sharing a pack stay adjacent.
fn select_blocks(entries: &IndexMap, max_block_size: u64) -> Vec<BlockInfo> {
    let mut selected: Vec<BlockInfo> = entries
        .values()
        .filter(|info| info.length < max_block_size)
        .cloned()
        .collect();
    selected.sort_by(|a, b| compare_packs(a, b).then_with(|| a.block_id.cmp(&b.block_id)));
    selected
}

/// A pass is pointless for fewer than two blocks, or when the selection is
/// already exactly the content of one pack.
fn worth_repacking(entries: &IndexMap, selected: &[BlockInfo]) -> bool {
    let Some(first) = selected.first() else {
        return false;
    };
    if selected.len() < 2 {
        return false;
    }

    match first.pack_blob_id() {
        Some(pack) => {
            let same_pack = selected.iter().all(|info| info.pack_blob_id() == Some(pack));
            !(same_pack && references_to(entries, pack) == selected.len())
        }
        None => true,
    }
}

/// Splits `blocks` into consecutive groups, each closed once its bytes reach
/// `target_pack_size`. The remainder forms the last group.
fn group_blocks(blocks: &[BlockInfo], target_pack_size: u64) -> Vec<&[BlockInfo]> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut size = 0u64;

    for (i, info) in blocks.iter().enumerate() {
        size = size.saturating_add(info.length);
        if size >= target_pack_size {
            groups.push(&blocks[start..=i]);
            start = i + 1;
            size = 0;
        }
    }
    if start < blocks.len() {
        groups.push(&blocks[start..]);
    }

    groups
}
