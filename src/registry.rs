//! Document registry: the authoritative record of uploaded documents.
//!
//! Every mutation of a document happens under its entry in
//! [`DocumentLocks`], so deletes, status changes and indexing writes on the
//! same document are serialized while different documents proceed in
//! parallel.
//!
//! # Delete
//!
//! Removal runs vectors, then blob, then the registry row. If either of the
//! first two fails the row is kept, marked `error`, and the outstanding
//! removals are recorded in `deletion_residue`. A later delete only retries
//! what is still outstanding.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use finreport_core::error::{Error, Result};
use finreport_core::models::{
    DeletionResidue, Document, DocumentFilter, Principal, VectorStatus,
};
use finreport_core::store::{BlobStore, DocumentStore, VectorIndex};

/// Per-document async mutexes.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DocumentLocks {
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        entry.lock_owned().await
    }

    /// Drop the entry for a deleted document. Waiters holding the old
    /// mutex still get it and then find the document gone.
    async fn forget(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}

#[derive(Clone)]
pub struct Registry {
    documents: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    blobs: Arc<dyn BlobStore>,
    locks: DocumentLocks,
}

impl Registry {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            documents,
            index,
            blobs,
            locks: DocumentLocks::default(),
        }
    }

    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub async fn register(
        &self,
        principal: &Principal,
        filename: &str,
        size_bytes: u64,
        mime: &str,
        blob_ref: &str,
    ) -> Result<Document> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("filename must not be empty".to_string()));
        }
        let doc = Document::new(principal, filename, size_bytes, mime, blob_ref);
        self.documents
            .insert_document(&doc)
            .await
            .map_err(Error::storage)?;
        tracing::info!(id = %doc.id, filename, size_bytes, "document registered");
        Ok(doc)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        self.documents
            .get_document(id)
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::not_found("document", id))
    }

    /// Like [`get`](Self::get), but another principal's document is
    /// reported as missing.
    pub async fn get_owned(&self, principal: &Principal, id: &str) -> Result<Document> {
        let doc = self.get(id).await?;
        if doc.owner != principal.as_str() {
            return Err(Error::not_found("document", id));
        }
        Ok(doc)
    }

    pub async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        self.documents
            .list_documents(filter)
            .await
            .map_err(Error::storage)
    }

    pub async fn update_vector_status(
        &self,
        id: &str,
        status: VectorStatus,
        error: Option<String>,
    ) -> Result<Document> {
        let _guard = self.locks.lock(id).await;
        let mut doc = self.get(id).await?;
        self.apply_status(&mut doc, status, error).await?;
        Ok(doc)
    }

    /// Validate and persist a status move. The caller holds the lock.
    pub(crate) async fn apply_status(
        &self,
        doc: &mut Document,
        status: VectorStatus,
        error: Option<String>,
    ) -> Result<()> {
        if !doc.vector_status.can_advance_to(status) {
            return Err(Error::InvalidTransition {
                id: doc.id.clone(),
                from: doc.vector_status,
                to: status,
            });
        }
        doc.vector_status = status;
        match status {
            VectorStatus::Completed => {
                doc.processed_at = Some(Utc::now());
                doc.error_message = None;
            }
            VectorStatus::Error => {
                doc.processed_at = Some(Utc::now());
                doc.error_message = error;
            }
            _ => {}
        }
        self.persist(doc).await
    }

    async fn persist(&self, doc: &Document) -> Result<()> {
        let found = self
            .documents
            .update_document(doc)
            .await
            .map_err(Error::storage)?;
        if !found {
            return Err(Error::not_found("document", &doc.id));
        }
        Ok(())
    }

    /// Drop existing chunks and move the document back to `pending` with
    /// a new version, so any in-flight indexing run discards its output.
    pub async fn reset_for_reprocess(&self, id: &str) -> Result<Document> {
        let _guard = self.locks.lock(id).await;
        let mut doc = self.get(id).await?;
        if doc.deletion_residue.is_some() {
            return Err(Error::Validation(format!(
                "document {id} is partially deleted; delete it again to finish"
            )));
        }
        self.index
            .delete_by_document(id)
            .await
            .map_err(|e| Error::transient("vector index", e))?;
        doc.vector_status = VectorStatus::Pending;
        doc.version += 1;
        doc.processed_at = None;
        doc.error_message = None;
        doc.content_preview.clear();
        self.persist(&doc).await?;
        tracing::info!(id, version = doc.version, "document reset for reprocessing");
        Ok(doc)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let guard = self.locks.lock(id).await;
        let mut doc = self.get(id).await?;
        let outstanding = doc.deletion_residue.unwrap_or(DeletionResidue {
            blob: true,
            vectors: true,
        });

        let mut residue = DeletionResidue::default();
        if outstanding.vectors {
            if let Err(e) = self.index.delete_by_document(id).await {
                tracing::warn!(id, error = %format!("{e:#}"), "vector removal failed");
                residue.vectors = true;
            }
        }
        if outstanding.blob {
            if let Err(e) = self.blobs.delete(&doc.blob_ref).await {
                tracing::warn!(id, error = %format!("{e:#}"), "blob removal failed");
                residue.blob = true;
            }
        }

        if !residue.is_clear() {
            doc.deletion_residue = Some(residue);
            doc.vector_status = VectorStatus::Error;
            doc.error_message = Some(format!("partial deletion: {residue} remaining"));
            self.persist(&doc).await?;
            return Err(Error::PartialDeletion {
                id: id.to_string(),
                residue,
            });
        }

        self.documents
            .delete_document(id)
            .await
            .map_err(Error::storage)?;
        drop(guard);
        self.locks.forget(id).await;
        tracing::info!(id, "document deleted");
        Ok(())
    }
}
