//! Test helpers for [`crate::BlobStorage`] implementations, usable from
//! integration tests of any backend.

pub mod concurrent;
pub mod faulty;

pub use concurrent::{verify_concurrent_access, ConcurrentAccessOptions};
pub use faulty::{FaultyStorage, Operation};
