//! Filesystem [`BlobStore`].
//!
//! Blobs live at `<root>/<key>`. The returned reference is the key itself,
//! so references stay valid if the root directory moves. Writes go to a
//! temporary sibling first and are renamed into place.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use finreport_core::store::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key under the root, rejecting absolute paths and `..`.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid blob key: {key:?}");
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let digest = format!("{:x}", Sha256::digest(bytes));
        let tmp = path.with_extension(format!("tmp-{}", &digest[..12]));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move blob into {}", path.display()))?;
        tracing::debug!(key, bytes = bytes.len(), sha256 = %digest, "blob stored");
        Ok(key.to_string())
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.path_for(blob_ref)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob {}", blob_ref))
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete blob {}", blob_ref)),
        }
    }
}
