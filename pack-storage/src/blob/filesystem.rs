//! Local filesystem backend: one file per blob under a root directory.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::{resolve_range, BlobId, BlobStorage, ListCallback, Metadata};
use crate::error::BlobError;
use crate::gather::{GatherBytes, WriteBuffer};

const TEMP_PREFIX: &str = ".tmp-";

/// Stores each blob as a file named after its id.
///
/// Writes go to a hidden temporary file which is then renamed over the
/// target, so readers see either the old or the new file in full. An open
/// file keeps its content even if it is replaced or removed mid-read.
/// Deleting an absent blob succeeds.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Opens (and creates if needed) a storage rooted at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "opened filesystem storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &BlobId) -> Result<PathBuf, BlobError> {
        let name = id.as_str();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains('\0')
        {
            return Err(BlobError::InvalidId(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }
}

fn not_found_as(id: &BlobId, e: std::io::Error) -> BlobError {
    if e.kind() == ErrorKind::NotFound {
        BlobError::NotFound(id.clone())
    } else {
        BlobError::Io(e)
    }
}

#[async_trait]
impl BlobStorage for FilesystemStorage {
    async fn get_blob(
        &self,
        id: &BlobId,
        offset: u64,
        length: Option<u64>,
        output: &mut WriteBuffer,
    ) -> Result<(), BlobError> {
        let path = self.path_for(id)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_as(id, e))?;
        let blob_length = file.metadata().await?.len();
        let (start, end) = resolve_range(id, blob_length, offset, length)?;

        file.seek(SeekFrom::Start(start as u64)).await?;
        let region = output.make_contiguous(end - start);
        file.read_exact(region).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, data), fields(blob_id = %id, length = data.len()))]
    async fn put_blob(&self, id: &BlobId, data: GatherBytes<'_>) -> Result<(), BlobError> {
        let path = self.path_for(id)?;
        let temp = self.temp_path();

        let written = async {
            let mut f = fs::File::create(&temp).await?;
            for slice in data.slices() {
                f.write_all(slice).await?;
            }
            f.sync_all().await?;
            fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_blob(&self, id: &BlobId) -> Result<(), BlobError> {
        let path = self.path_for(id)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        visit: &mut ListCallback<'_>,
    ) -> Result<(), BlobError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut matching = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }

            // the blob may be deleted between read_dir and stat
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            let timestamp = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            matching.push(Metadata {
                blob_id: BlobId::from(name),
                length: metadata.len(),
                timestamp,
            });
        }

        matching.sort_by(|a, b| a.blob_id.cmp(&b.blob_id));
        trace!(prefix, count = matching.len(), "listed blobs");

        for metadata in matching {
            visit(metadata)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::list_all;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let st = FilesystemStorage::open(dir.path()).await.unwrap();
        let id = BlobId::from("0123abcd");

        let data = [&b"hello "[..], &b"world"[..]];
        st.put_blob(&id, GatherBytes::from_slices(data.to_vec()))
            .await
            .unwrap();

        let mut out = WriteBuffer::new();
        st.get_blob(&id, 0, None, &mut out).await.unwrap();
        assert_eq!(&*out.to_byte_slice(), b"hello world");

        st.get_blob(&id, 6, Some(3), &mut out).await.unwrap();
        assert_eq!(&*out.to_byte_slice(), b"wor");

        st.delete_blob(&id).await.unwrap();
        let err = st.get_blob(&id, 0, None, &mut out).await.unwrap_err();
        assert!(err.is_not_found());

        // deleting again is clean
        st.delete_blob(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let st = FilesystemStorage::open(dir.path()).await.unwrap();
        let id = BlobId::from("blob");

        st.put_blob(&id, GatherBytes::from_slice(b"first version"))
            .await
            .unwrap();
        st.put_blob(&id, GatherBytes::from_slice(b"second"))
            .await
            .unwrap();

        let mut out = WriteBuffer::new();
        st.get_blob(&id, 0, None, &mut out).await.unwrap();
        assert_eq!(&*out.to_byte_slice(), b"second");
    }

    #[tokio::test]
    async fn test_list_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let st = FilesystemStorage::open(dir.path()).await.unwrap();
        for id in ["p1", "p2", "q1"] {
            st.put_blob(&BlobId::from(id), GatherBytes::from_slice(b"abc"))
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join(".tmp-leftover"), b"junk").unwrap();

        let listed = list_all(&st, "p").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.blob_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(listed.iter().all(|m| m.length == 3));

        assert_eq!(list_all(&st, "").await.unwrap().len(), 3);
        assert!(list_all(&st, "zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let st = FilesystemStorage::open(dir.path()).await.unwrap();

        for id in ["", "../escape", "a/b", ".hidden"] {
            let err = st
                .put_blob(&BlobId::from(id), GatherBytes::from_slice(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, BlobError::InvalidId(_)), "{id}");
        }
    }
}
