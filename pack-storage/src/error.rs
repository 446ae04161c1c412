use thiserror::Error;

use crate::blob::BlobId;
use crate::block::BlockId;

/// Classification shared by every error in this crate.
///
/// `NotFound` is a clean, expected outcome. `Unexpected` covers backend and I/O
/// failures which are surfaced to the caller without retry. `InvariantViolation`
/// means the stored state is internally inconsistent and is always fatal to the
/// operation that detected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unexpected,
    InvariantViolation,
}

/// Errors returned by [`crate::BlobStorage`] implementations.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    #[error("invalid range for blob {id}: offset {offset}, length {length:?}, blob length {blob_length}")]
    InvalidRange {
        id: BlobId,
        offset: u64,
        length: Option<u64>,
        blob_length: u64,
    },

    #[error("invalid blob id: {0:?}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BlobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlobError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Returns true for the clean "blob does not exist" outcome.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Errors returned by the block layer.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block not found: {0}")]
    NotFound(BlockId),

    #[error("storage error: {0}")]
    Storage(#[from] BlobError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockError::NotFound(_) => ErrorKind::NotFound,
            BlockError::Storage(e) => e.kind(),
            BlockError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            BlockError::InvalidArgument(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;
