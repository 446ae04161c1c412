use std::borrow::Cow;
use std::fmt;
use std::io;
use std::sync::Arc;

use super::allocator::{contiguous_allocator, default_allocator, ChunkAllocator};
use super::GatherBytes;

/// Append-only buffer made of a sequence of chunks.
///
/// Growing the buffer never copies existing data: once the tail chunk is full
/// a new one is requested from the allocator. All chunks go back to their
/// allocator on [`WriteBuffer::reset`], [`WriteBuffer::close`] or drop.
pub struct WriteBuffer {
    alloc: Arc<ChunkAllocator>,
    contiguous: Arc<ChunkAllocator>,
    slices: Vec<Vec<u8>>,
}

impl WriteBuffer {
    /// Creates an empty buffer backed by the process-wide allocators.
    pub fn new() -> Self {
        Self::with_allocators(default_allocator(), contiguous_allocator())
    }

    pub fn with_allocator(alloc: Arc<ChunkAllocator>) -> Self {
        Self::with_allocators(alloc, contiguous_allocator())
    }

    pub fn with_allocators(alloc: Arc<ChunkAllocator>, contiguous: Arc<ChunkAllocator>) -> Self {
        Self {
            alloc,
            contiguous,
            slices: Vec::new(),
        }
    }

    /// Appends `data`, splitting it across chunk boundaries as needed.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self
                .slices
                .last()
                .map_or(true, |tail| tail.len() == tail.capacity())
            {
                self.slices.push(self.alloc.allocate());
            }
            let Some(tail) = self.slices.last_mut() else {
                break;
            };

            let room = tail.capacity() - tail.len();
            let n = room.min(data.len());
            tail.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
    }

    pub fn append_bytes(&mut self, data: &GatherBytes<'_>) {
        for slice in data.slices() {
            self.append(slice);
        }
    }

    /// Total number of bytes appended since the last reset.
    pub fn length(&self) -> usize {
        self.slices.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Returns the content as one contiguous slice.
    ///
    /// This is zero-copy while the data fits in a single chunk. Otherwise the
    /// chunks are concatenated into a fresh allocation on every call
    /// (copy-on-read); the buffer itself is never rearranged.
    pub fn to_byte_slice(&self) -> Cow<'_, [u8]> {
        match self.slices.as_slice() {
            [] => Cow::Borrowed(&[]),
            [single] => Cow::Borrowed(single.as_slice()),
            _ => Cow::Owned(self.bytes().to_vec()),
        }
    }

    /// Zero-copy view over the chunks.
    pub fn bytes(&self) -> GatherBytes<'_> {
        GatherBytes::from_slices(self.slices.iter().map(Vec::as_slice).collect())
    }

    /// Discards the current content and returns a single unbroken region of
    /// exactly `n` bytes taken from the contiguous allocator.
    ///
    /// The region becomes the buffer's only content, so after filling it the
    /// buffer reads back exactly those `n` bytes.
    pub fn make_contiguous(&mut self, n: usize) -> &mut [u8] {
        self.reset();
        self.slices.push(self.contiguous.allocate_contiguous(n));
        self.slices[0].as_mut_slice()
    }

    /// Returns all chunks to their allocators and leaves the buffer empty.
    pub fn reset(&mut self) {
        for chunk in self.slices.drain(..) {
            if chunk.capacity() == self.alloc.chunk_size() {
                self.alloc.release(chunk);
            } else {
                self.contiguous.release(chunk);
            }
        }
    }

    /// Releases the buffer's chunks. Dropping the buffer has the same effect.
    pub fn close(self) {}

    pub(crate) fn chunk_count(&self) -> usize {
        self.slices.len()
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        self.reset();
    }
}

impl io::Write for WriteBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("allocator", &self.alloc.name())
            .field("chunks", &self.slices.len())
            .field("length", &self.length())
            .finish()
    }
}
