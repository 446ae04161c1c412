//! Chunked byte buffers used throughout the I/O path.

pub mod allocator;
pub mod write_buffer;

pub use allocator::{contiguous_allocator, default_allocator, AllocatorStats, ChunkAllocator};
pub use write_buffer::WriteBuffer;

/// Borrowed, possibly fragmented view of one logical byte stream.
///
/// This is what [`crate::BlobStorage::put_blob`] consumes, so a
/// [`WriteBuffer`] can be handed to a backend without first being flattened.
#[derive(Debug, Clone, Default)]
pub struct GatherBytes<'a> {
    slices: Vec<&'a [u8]>,
}

impl<'a> GatherBytes<'a> {
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self { slices: vec![data] }
    }

    pub fn from_slices(slices: Vec<&'a [u8]>) -> Self {
        Self { slices }
    }

    pub fn slices(&self) -> &[&'a [u8]] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.iter().all(|s| s.is_empty())
    }

    /// Copies the content into a single vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for slice in &self.slices {
            out.extend_from_slice(slice);
        }
        out
    }
}

impl<'a> From<&'a [u8]> for GatherBytes<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_bytes_concatenates() {
        let bytes = GatherBytes::from_slices(vec![&b"hello "[..], &b""[..], &b"world"[..]]);
        assert_eq!(bytes.len(), 11);
        assert!(!bytes.is_empty());
        assert_eq!(bytes.to_vec(), b"hello world");
    }

    #[test]
    fn test_gather_bytes_empty() {
        assert!(GatherBytes::default().is_empty());
        assert!(GatherBytes::from_slices(vec![&b""[..], &b""[..]]).is_empty());
    }
}
