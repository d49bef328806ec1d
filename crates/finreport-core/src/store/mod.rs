//! Storage abstractions for finreport.
//!
//! Each collaborator the services depend on is a trait here, so the SQLite
//! backend in the app crate and the in-memory backend in [`memory`] are
//! interchangeable. All implementations must be `Send + Sync`.
//!
//! | Trait | Owns |
//! |-------|------|
//! | [`DocumentStore`] | Document registry rows |
//! | [`VectorIndex`] | Chunks and their embedding vectors |
//! | [`BlobStore`] | Raw uploads and rendered report artifacts |
//! | [`ReportStore`] | Report jobs |
//! | [`SessionStore`] | Chat sessions and turns |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChatSession, ChatTurn, Document, DocumentCategory, DocumentFilter, IndexedChunk, ReportJob,
    ReportUpdate,
};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents matching `filter`, newest upload first, ties by id.
    /// `limit`/`offset` are applied by the backend.
    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;

    /// Fetch several documents by id; unknown ids are skipped.
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Replace the stored row. Returns `false` if the document is gone.
    async fn update_document(&self, doc: &Document) -> Result<bool>;

    async fn delete_document(&self, id: &str) -> Result<bool>;
}

/// A chunk matched by [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Cosine similarity.
    pub score: f64,
    pub text: String,
}

/// Restricts [`VectorIndex::query`] by properties of the owning document.
///
/// Applied before the top-`k` cut, so chunks of excluded documents never
/// take a candidate slot.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub owner: Option<String>,
    /// Empty = all categories.
    pub categories: Vec<DocumentCategory>,
    /// Empty = all documents.
    pub document_ids: Vec<String>,
    /// Only chunks of `completed` documents without deletion residue.
    pub searchable_only: bool,
}

impl VectorFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ref owner) = self.owner {
            if &doc.owner != owner {
                return false;
            }
        }
        if !self.categories.is_empty() && !self.categories.contains(&doc.category) {
            return false;
        }
        if !self.document_ids.is_empty() && !self.document_ids.contains(&doc.id) {
            return false;
        }
        !self.searchable_only || doc.is_searchable()
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks by chunk id.
    async fn upsert(&self, chunks: &[IndexedChunk]) -> Result<()>;

    /// Top `k` chunks by cosine similarity among those passing `filter`,
    /// best first. Chunks whose document is unknown never match.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>>;

    /// Remove every chunk of a document. Returns the number removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    async fn count_for_document(&self, document_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return a durable reference.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>>;

    /// Idempotent: deleting a missing blob succeeds.
    async fn delete(&self, blob_ref: &str) -> Result<()>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, job: &ReportJob) -> Result<()>;

    async fn get_report(&self, id: &str) -> Result<Option<ReportJob>>;

    /// Jobs of one owner, newest first.
    async fn list_reports(&self, owner: &str, limit: usize, offset: usize)
        -> Result<Vec<ReportJob>>;

    /// Apply `update` only while the job is still `generating`.
    ///
    /// Returns `false` when the job is missing or already terminal.
    async fn apply_report_update(&self, id: &str, update: ReportUpdate) -> Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, id: &str) -> Result<Option<ChatSession>>;

    async fn create_session(&self, session: &ChatSession) -> Result<()>;

    async fn append_turn(&self, id: &str, turn: &ChatTurn) -> Result<()>;

    async fn set_selected_files(&self, id: &str, ids: &[String]) -> Result<()>;

    async fn delete_session(&self, id: &str) -> Result<bool>;
}
