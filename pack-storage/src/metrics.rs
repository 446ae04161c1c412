use std::sync::Arc;

/// Shared metrics collector interface
///
/// This is a trait object that allows applications to plug in their own
/// metrics implementations (Prometheus, StatsD, etc.)
pub trait MetricsCollector: Send + Sync {
    fn blob_read(&self, bytes: usize);
    fn blob_written(&self, bytes: usize);
    fn blob_deleted(&self);
    fn blocks_repacked(&self, amount: u64);
    fn pack_written(&self, bytes: usize);
    fn blobs_retired(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn blob_read(&self, _bytes: usize) {}
    fn blob_written(&self, _bytes: usize) {}
    fn blob_deleted(&self) {}
    fn blocks_repacked(&self, _amount: u64) {}
    fn pack_written(&self, _bytes: usize) {}
    fn blobs_retired(&self, _amount: u64) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn blob_read(&self, bytes: usize) {
        self.0.blob_read(bytes);
    }

    pub fn blob_written(&self, bytes: usize) {
        self.0.blob_written(bytes);
    }

    pub fn blob_deleted(&self) {
        self.0.blob_deleted();
    }

    pub fn blocks_repacked(&self, amount: u64) {
        self.0.blocks_repacked(amount);
    }

    pub fn pack_written(&self, bytes: usize) {
        self.0.pack_written(bytes);
    }

    pub fn blobs_retired(&self, amount: u64) {
        self.0.blobs_retired(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

impl std::fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMetrics").finish_non_exhaustive()
    }
}
