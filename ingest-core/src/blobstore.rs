//! Content-addressed blob storage (spec §3's "blob reference" attribute,
//! SPEC_FULL "Supplemented features").
//!
//! Blobs are written once under `blob_root`, keyed by the hex BLAKE3 digest
//! of their content, giving `BlobRef` its immutability invariant for free:
//! the locator can't collide with a different body without a hash collision.

use std::path::{Path, PathBuf};

use crate::models::BlobRef;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(content_hash)
    }

    /// Hash and persist `bytes`, returning a `BlobRef` pointing at it. A
    /// second `put` of identical content is a no-op write to the same path.
    pub async fn put(&self, bytes: &[u8]) -> anyhow::Result<BlobRef> {
        let content_hash = blake3::hash(bytes).to_hex().to_string();
        let path = self.path_for(&content_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(BlobRef {
            content_hash,
            locator: path.to_string_lossy().into_owned(),
        })
    }

    pub async fn get(&self, blob: &BlobRef) -> anyhow::Result<bytes::Bytes> {
        let data = tokio::fs::read(&blob.locator).await?;
        Ok(bytes::Bytes::from(data))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let blob = store.put(b"hello world").await.unwrap();
        let read_back = store.get(&blob).await.unwrap();
        assert_eq!(&read_back[..], b"hello world");
    }

    #[tokio::test]
    async fn identical_content_hashes_to_the_same_locator() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let a = store.put(b"same bytes").await.unwrap();
        let b = store.put(b"same bytes").await.unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.locator, b.locator);
    }
}
