//! Fixed-size chunk pools backing [`super::WriteBuffer`].
//!
//! A chunk is a `Vec<u8>` whose capacity equals the allocator's chunk size.
//! Chunks are moved out of the free list on allocation and moved back on
//! release, so at any instant a chunk is owned either by exactly one buffer or
//! by the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::trace;

/// Chunk size used by the default allocator.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest region the contiguous allocator serves from its pool.
pub const MAX_CONTIGUOUS_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_MAX_FREE_CHUNKS: usize = 256;
const CONTIGUOUS_MAX_FREE_CHUNKS: usize = 4;

lazy_static! {
    static ref DEFAULT_ALLOCATOR: Arc<ChunkAllocator> = Arc::new(ChunkAllocator::new(
        "default",
        DEFAULT_CHUNK_SIZE,
        DEFAULT_MAX_FREE_CHUNKS
    ));
    static ref CONTIGUOUS_ALLOCATOR: Arc<ChunkAllocator> = Arc::new(ChunkAllocator::new(
        "contiguous",
        MAX_CONTIGUOUS_CHUNK_SIZE,
        CONTIGUOUS_MAX_FREE_CHUNKS
    ));
}

/// Returns the process-wide allocator used by buffers built without an explicit one.
pub fn default_allocator() -> Arc<ChunkAllocator> {
    Arc::clone(&DEFAULT_ALLOCATOR)
}

/// Returns the process-wide allocator used for contiguous regions.
pub fn contiguous_allocator() -> Arc<ChunkAllocator> {
    Arc::clone(&CONTIGUOUS_ALLOCATOR)
}

/// Snapshot of allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub chunk_size: usize,
    /// Chunks created from scratch
    pub allocated: u64,
    /// Chunks served from the free list
    pub recycled: u64,
    /// Chunks handed back to the pool
    pub released: u64,
    /// Chunks currently sitting in the free list
    pub free: usize,
}

/// Pool of fixed-capacity byte chunks.
#[derive(Debug)]
pub struct ChunkAllocator {
    name: &'static str,
    chunk_size: usize,
    max_free_chunks: usize,
    free_list: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicU64,
    recycled: AtomicU64,
    released: AtomicU64,
}

impl ChunkAllocator {
    /// Creates an allocator handing out chunks of `chunk_size` bytes and keeping
    /// at most `max_free_chunks` released chunks for reuse.
    pub fn new(name: &'static str, chunk_size: usize, max_free_chunks: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            name,
            chunk_size,
            max_free_chunks,
            free_list: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns an empty chunk with a capacity of exactly `chunk_size` bytes.
    pub fn allocate(&self) -> Vec<u8> {
        if let Some(chunk) = self.free_list.lock().pop() {
            self.recycled.fetch_add(1, Ordering::Relaxed);
            return chunk;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.chunk_size)
    }

    /// Returns a single zero-filled region of exactly `n` bytes.
    ///
    /// Requests up to `chunk_size` are carved out of a pooled chunk. Larger
    /// requests get a dedicated region whose capacity is exactly `n`; such a
    /// region is dropped instead of pooled when released.
    pub fn allocate_contiguous(&self, n: usize) -> Vec<u8> {
        if n <= self.chunk_size {
            let mut chunk = self.allocate();
            chunk.resize(n, 0);
            return chunk;
        }

        trace!(allocator = self.name, size = n, "allocating custom contiguous region");
        self.allocated.fetch_add(1, Ordering::Relaxed);
        vec![0u8; n]
    }

    /// Hands a chunk back to the pool. Chunks that did not come from a pool of
    /// this size are dropped.
    pub fn release(&self, mut chunk: Vec<u8>) {
        if chunk.capacity() != self.chunk_size {
            return;
        }

        chunk.clear();
        self.released.fetch_add(1, Ordering::Relaxed);

        let mut free_list = self.free_list.lock();
        if free_list.len() < self.max_free_chunks {
            free_list.push(chunk);
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            chunk_size: self.chunk_size,
            allocated: self.allocated.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            free: self.free_list.lock().len(),
        }
    }
}
