//! # Pack Storage Library
//!
//! The block-storage engine of a content-addressed backup repository: it maps
//! block identifiers to their stored bytes, packs small blocks into larger pack
//! blobs and periodically repackages small residual blocks into denser packs.
//!
//! ## Features
//!
//! - **Gather Buffers**: chunked, append-only buffers that grow without copying
//! - **Chunk Allocators**: reusable chunk pools with a contiguous allocation path
//! - **Blob Storage Contract**: async get/put/delete/list with well-defined clean errors
//! - **Pluggable Backends**: in-memory (`MapStorage`) and filesystem (`FilesystemStorage`)
//! - **Block Index**: copy-on-write index with prefix listing, sorting and summaries
//! - **Repackaging**: consolidates small blocks into new packs and retires old ones
//!
//! ## Example
//!
//! ```no_run
//! use pack_storage::{BlockManager, MapStorage, SortKey, sort_blocks};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(MapStorage::new());
//! let blocks = BlockManager::open(storage).await?;
//!
//! blocks.write_block(b"hello").await?;
//! blocks.write_block(b"world").await?;
//!
//! // Merge every block smaller than 100 bytes into a pack
//! blocks.repackage(100).await?;
//!
//! let mut listed = blocks.list_blocks("").await?;
//! sort_blocks(&mut listed, SortKey::Pack, false);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod blobtesting;
pub mod block;
pub mod error;
pub mod gather;
pub mod metrics;

// Re-export main types from gather
pub use gather::{
    contiguous_allocator, default_allocator, AllocatorStats, ChunkAllocator, GatherBytes,
    WriteBuffer,
};

// Re-export the storage contract and backends
pub use blob::{
    filesystem::FilesystemStorage, list_all, memory::MapStorage, BlobId, BlobStorage, Metadata,
};

// Re-export block types
pub use block::{
    listing::{sort_blocks, BlockSummary, SortKey},
    repack::{RepackOptions, RepackStats},
    BlockId, BlockInfo, BlockManager, BlockManagerOptions, PackLocation,
};

pub use error::{BlobError, BlockError, ErrorKind};

// Re-export metrics types
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
