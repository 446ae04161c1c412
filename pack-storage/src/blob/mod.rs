//! The blob storage contract every backend implements.
//!
//! All operations may be called concurrently, including for the same blob id.
//! A get that races with a put sees either the old or the new content in full.
//! `NotFound` from get or delete is a clean outcome and is always reported as
//! [`BlobError::NotFound`], never folded into another variant.

pub mod filesystem;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BlobError;
use crate::gather::{GatherBytes, WriteBuffer};

/// Opaque identifier of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BlobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What `list_blobs` reports for each blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub blob_id: BlobId,
    pub length: u64,
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked by [`BlobStorage::list_blobs`]; returning an error stops the listing.
pub type ListCallback<'a> = dyn FnMut(Metadata) -> Result<(), BlobError> + Send + 'a;

/// BlobStorage is the interface every storage backend implements.
///
/// Implementations must be safe to share between tasks and must classify a
/// missing blob as [`BlobError::NotFound`].
#[async_trait]
pub trait BlobStorage: Send + Sync + fmt::Debug {
    /// Reads bytes `[offset, offset + length)` of the blob into `output`,
    /// replacing its previous content. `length == None` reads to the end.
    async fn get_blob(
        &self,
        id: &BlobId,
        offset: u64,
        length: Option<u64>,
        output: &mut WriteBuffer,
    ) -> Result<(), BlobError>;

    /// Stores `data` under `id`, replacing any previous content.
    async fn put_blob(&self, id: &BlobId, data: GatherBytes<'_>) -> Result<(), BlobError>;

    /// Removes the blob. Whether removing an absent blob is `Ok` or `NotFound`
    /// is up to the backend; callers treat both as clean.
    async fn delete_blob(&self, id: &BlobId) -> Result<(), BlobError>;

    /// Invokes `visit` for every blob whose id starts with `prefix`.
    /// A prefix that matches nothing is not an error.
    async fn list_blobs(
        &self,
        prefix: &str,
        visit: &mut ListCallback<'_>,
    ) -> Result<(), BlobError>;
}

/// Collects the metadata of every blob matching `prefix`.
pub async fn list_all(
    storage: &dyn BlobStorage,
    prefix: &str,
) -> Result<Vec<Metadata>, BlobError> {
    let mut out = Vec::new();
    storage
        .list_blobs(prefix, &mut |m| {
            out.push(m);
            Ok(())
        })
        .await?;
    Ok(out)
}

/// Resolves a requested range against the blob length, returning `(start, end)`.
pub(crate) fn resolve_range(
    id: &BlobId,
    blob_length: u64,
    offset: u64,
    length: Option<u64>,
) -> Result<(usize, usize), BlobError> {
    let end = match length {
        Some(length) => offset.checked_add(length),
        None => Some(blob_length),
    };

    match end {
        Some(end) if offset <= end && end <= blob_length => Ok((offset as usize, end as usize)),
        _ => Err(BlobError::InvalidRange {
            id: id.clone(),
            offset,
            length,
            blob_length,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_range() {
        let id = BlobId::from("blob");
        assert_eq!(resolve_range(&id, 10, 0, None).unwrap(), (0, 10));
        assert_eq!(resolve_range(&id, 10, 4, None).unwrap(), (4, 10));
        assert_eq!(resolve_range(&id, 10, 4, Some(3)).unwrap(), (4, 7));
        assert_eq!(resolve_range(&id, 10, 10, Some(0)).unwrap(), (10, 10));

        assert!(matches!(
            resolve_range(&id, 10, 8, Some(3)),
            Err(BlobError::InvalidRange { .. })
        ));
        assert!(matches!(
            resolve_range(&id, 10, 11, None),
            Err(BlobError::InvalidRange { .. })
        ));
        assert!(resolve_range(&id, 10, u64::MAX, Some(2)).is_err());
    }
}
