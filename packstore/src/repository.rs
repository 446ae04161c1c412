use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use pack_storage::{BlockManager, FilesystemStorage};

/// Opens the block repository stored in the directory `root`.
pub async fn open_repository(root: &Path) -> Result<BlockManager> {
    let storage = FilesystemStorage::open(root)
        .await
        .with_context(|| format!("cannot open storage at {}", root.display()))?;
    let blocks = BlockManager::open(Arc::new(storage))
        .await
        .context("cannot load block index")?;
    debug!(root = %root.display(), "opened repository");
    Ok(blocks)
}
