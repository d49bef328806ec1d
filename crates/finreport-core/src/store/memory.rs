//! In-memory collaborators for tests and embedded use.
//!
//! [`InMemoryStore`] implements every store trait except [`BlobStore`],
//! which [`InMemoryBlobStore`] covers. State lives in `HashMap`s behind
//! `std::sync::RwLock`; every trait call takes the lock once, so each call
//! is atomic per entity. Vector queries are brute-force cosine similarity.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{
    ChatSession, ChatTurn, Document, DocumentFilter, IndexedChunk, ReportJob, ReportUpdate,
};

use super::{
    BlobStore, DocumentStore, ReportStore, SessionStore, VectorFilter, VectorHit, VectorIndex,
};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// Newest upload first, then id ascending.
pub fn listing_order(a: &Document, b: &Document) -> Ordering {
    b.uploaded_at
        .cmp(&a.uploaded_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<String, IndexedChunk>>,
    reports: RwLock<HashMap<String, ReportJob>>,
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        if docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut matched: Vec<Document> = docs
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        matched.sort_by(listing_order);
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn update_document(&self, doc: &Document) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        match docs.get_mut(&doc.id) {
            Some(existing) => {
                *existing = doc.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.docs.write().map_err(poisoned)?.remove(id).is_some())
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn upsert(&self, chunks: &[IndexedChunk]) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        for chunk in chunks {
            stored.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut hits: Vec<VectorHit> = stored
            .values()
            .filter(|c| {
                docs.get(&c.metadata.document_id)
                    .is_some_and(|d| filter.matches(d))
            })
            .map(|c| VectorHit {
                chunk_id: c.id.clone(),
                document_id: c.metadata.document_id.clone(),
                score: cosine_similarity(vector, &c.vector) as f64,
                text: c.text.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|_, c| c.metadata.document_id != document_id);
        Ok(before - stored.len())
    }

    async fn count_for_document(&self, document_id: &str) -> Result<usize> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored
            .values()
            .filter(|c| c.metadata.document_id == document_id)
            .count())
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    async fn insert_report(&self, job: &ReportJob) -> Result<()> {
        self.reports
            .write()
            .map_err(poisoned)?
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<ReportJob>> {
        Ok(self.reports.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_reports(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ReportJob>> {
        let reports = self.reports.read().map_err(poisoned)?;
        let mut jobs: Vec<ReportJob> = reports
            .values()
            .filter(|j| j.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn apply_report_update(&self, id: &str, update: ReportUpdate) -> Result<bool> {
        let mut reports = self.reports.write().map_err(poisoned)?;
        Ok(match reports.get_mut(id) {
            Some(job) => update.apply(job),
            None => false,
        })
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn create_session(&self, session: &ChatSession) -> Result<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .entry(session.id.clone())
            .or_insert_with(|| session.clone());
        Ok(())
    }

    async fn append_turn(&self, id: &str, turn: &ChatTurn) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| anyhow!("session {id} not found"))?;
        session.turns.push(turn.clone());
        session.updated_at = turn.timestamp;
        Ok(())
    }

    async fn set_selected_files(&self, id: &str, ids: &[String]) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| anyhow!("session {id} not found"))?;
        session.selected_file_ids = ids.to_vec();
        session.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().map_err(poisoned)?.remove(id).is_some())
    }
}

/// Blob store keeping bytes in a map. `fail_deletes` lets tests exercise
/// partial deletion.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_deletes: std::sync::atomic::AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn contains(&self, blob_ref: &str) -> bool {
        self.blobs
            .read()
            .map(|b| b.contains_key(blob_ref))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let blob_ref = format!("mem://{key}");
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(blob_ref.clone(), bytes.to_vec());
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| anyhow!("blob not found: {blob_ref}"))
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        if self.fail_deletes.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("blob backend unavailable");
        }
        self.blobs.write().map_err(poisoned)?.remove(blob_ref);
        Ok(())
    }
}
