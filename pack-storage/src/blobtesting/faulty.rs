use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::blob::{BlobId, BlobStorage, ListCallback};
use crate::error::BlobError;
use crate::gather::{GatherBytes, WriteBuffer};

/// Storage operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Put,
    Delete,
    List,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    prefix: String,
    remaining: Option<usize>,
}

/// Wraps a storage and fails selected operations with an unexpected error.
///
/// A fault matches calls of its operation whose blob id (or list prefix)
/// starts with the fault's prefix. `times == None` keeps failing forever.
#[derive(Debug)]
pub struct FaultyStorage {
    inner: Arc<dyn BlobStorage>,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn BlobStorage>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `times` matching calls, or every one when `None`.
    /// A fault with `Some(0)` never fires and is not recorded.
    pub fn add_fault(&self, operation: Operation, prefix: impl Into<String>, times: Option<usize>) {
        if times == Some(0) {
            return;
        }
        self.faults.lock().push(Fault {
            operation,
            prefix: prefix.into(),
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, operation: Operation, id: &str) -> Result<(), BlobError> {
        let mut faults = self.faults.lock();
        let Some(pos) = faults
            .iter()
            .position(|f| f.operation == operation && id.starts_with(&f.prefix))
        else {
            return Ok(());
        };

        let fault = &mut faults[pos];
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(pos);
            }
        }

        debug!(?operation, id, "injecting fault");
        Err(BlobError::Other(format!(
            "injected {operation:?} failure for {id:?}"
        )))
    }
}

#[async_trait]
impl BlobStorage for FaultyStorage {
    async fn get_blob(
        &self,
        id: &BlobId,
        offset: u64,
        length: Option<u64>,
        output: &mut WriteBuffer,
    ) -> Result<(), BlobError> {
        self.check(Operation::Get, id.as_str())?;
        self.inner.get_blob(id, offset, length, output).await
    }

    async fn put_blob(&self, id: &BlobId, data: GatherBytes<'_>) -> Result<(), BlobError> {
        self.check(Operation::Put, id.as_str())?;
        self.inner.put_blob(id, data).await
    }

    async fn delete_blob(&self, id: &BlobId) -> Result<(), BlobError> {
        self.check(Operation::Delete, id.as_str())?;
        self.inner.delete_blob(id).await
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        visit: &mut ListCallback<'_>,
    ) -> Result<(), BlobError> {
        self.check(Operation::List, prefix)?;
        self.inner.list_blobs(prefix, visit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MapStorage;

    #[tokio::test]
    async fn test_fault_is_limited() {
        let st = FaultyStorage::new(Arc::new(MapStorage::new()));
        st.add_fault(Operation::Put, "p", Some(1));

        let pack = BlobId::from("p1");
        let err = st
            .put_blob(&pack, GatherBytes::from_slice(b"x"))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());

        // the fault was consumed
        st.put_blob(&pack, GatherBytes::from_slice(b"x"))
            .await
            .unwrap();

        // other prefixes were never affected
        st.put_blob(&BlobId::from("q1"), GatherBytes::from_slice(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_found_passes_through() {
        let st = FaultyStorage::new(Arc::new(MapStorage::new()));
        st.add_fault(Operation::Delete, "zzz", None);

        let mut out = WriteBuffer::new();
        let err = st
            .get_blob(&BlobId::from("abc"), 0, None, &mut out)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_zero_count_fault_never_fires() {
        let st = FaultyStorage::new(Arc::new(MapStorage::new()));
        st.add_fault(Operation::Put, "", Some(0));

        st.put_blob(&BlobId::from("p1"), GatherBytes::from_slice(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counted_fault_fires_exactly_that_often() {
        let st = FaultyStorage::new(Arc::new(MapStorage::new()));
        st.add_fault(Operation::Put, "p", Some(2));

        let pack = BlobId::from("p1");
        for _ in 0..2 {
            assert!(st
                .put_blob(&pack, GatherBytes::from_slice(b"x"))
                .await
                .is_err());
        }
        st.put_blob(&pack, GatherBytes::from_slice(b"x"))
            .await
            .unwrap();
    }
}
