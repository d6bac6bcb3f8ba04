use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

/// Handle returned when a blob is persisted.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Opaque reference used for later fetch/delete calls.
    pub reference: String,
    /// Provider-specific locator, informational only.
    pub url: String,
}

/// Abstraction over the blob storage provider so the pipeline never talks
/// to a concrete backend directly.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, bytes: &[u8], extension: &str) -> Result<StoredBlob>;
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
    async fn delete(&self, reference: &str) -> Result<()>;
}

/// Filesystem-backed blob store. Blobs are uuid-named files under a flat
/// storage root; the reference is the file name.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, bytes: &[u8], extension: &str) -> Result<StoredBlob> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to ensure storage root at {}", self.root.display()))?;

        let reference = if extension.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), extension)
        };
        let path = self.blob_path(&reference);

        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write blob at {}", path.display()))?;

        Ok(StoredBlob {
            url: path.to_string_lossy().to_string(),
            reference,
        })
    }

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(reference);
        fs::read(&path)
            .await
            .with_context(|| format!("failed to read blob at {}", path.display()))
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        let path = self.blob_path(reference);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deleting an already-gone blob is fine for the sweeper.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete blob at {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn store_fetch_delete_round_trip() {
        let dir = tempdir().expect("temp dir");
        let store = FsBlobStore::new(dir.path());

        let blob = store.store(b"hello", "txt").await.expect("store blob");
        assert!(blob.reference.ends_with(".txt"));

        let bytes = store.fetch(&blob.reference).await.expect("fetch blob");
        assert_eq!(bytes, b"hello");

        store.delete(&blob.reference).await.expect("delete blob");
        assert!(store.fetch(&blob.reference).await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_blob_is_ok() {
        let dir = tempdir().expect("temp dir");
        let store = FsBlobStore::new(dir.path());
        store.delete("no-such-blob.pdf").await.expect("delete");
    }
}
