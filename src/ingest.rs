//! Ingestion and indexing pipeline.
//!
//! ```text
//! upload ──▶ blob store ──▶ registry (pending) ──▶ background index task
//!
//! index: extract ──▶ chunk ──▶ embed (batched) ──▶ upsert ──▶ completed
//!                                   └── retried ──┘
//! ```
//!
//! Extraction runs on the blocking pool; its failures, panics included, are
//! terminal. Embedding and upsert are retried with
//! exponential backoff. Every write re-checks, under the document lock,
//! that the document still exists with the version the run started from;
//! otherwise the run is abandoned without writing.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use finreport_core::analysis::{default_classifiers, detect_layout};
use finreport_core::chunk::{chunk_table, chunk_text};
use finreport_core::embedding::EmbeddingProvider;
use finreport_core::error::{Error, Result};
use finreport_core::models::{
    Chunk, Document, DocumentCategory, IndexedChunk, Principal, VectorStatus,
};
use finreport_core::store::{BlobStore, VectorIndex};

use crate::extract::{extract, Extracted};
use crate::registry::Registry;
use crate::retry::RetryPolicy;

pub const PREVIEW_CHARS: usize = 240;
/// Embedding batches in flight per document.
const EMBED_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_tokens: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

#[derive(Clone)]
pub struct Pipeline {
    registry: Registry,
    index: Arc<dyn VectorIndex>,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: IngestSettings,
    permits: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

enum Written {
    Done(Document),
    Stale,
}

impl Pipeline {
    pub fn new(
        registry: Registry,
        index: Arc<dyn VectorIndex>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: IngestSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            registry,
            index,
            blobs,
            embedder,
            settings,
            permits,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Store the bytes, register the document and schedule indexing.
    pub async fn upload(
        &self,
        principal: &Principal,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let doc = self.store_upload(principal, filename, bytes).await?;
        self.schedule(&doc.id).await;
        Ok(doc)
    }

    /// Store and register without scheduling; the caller indexes inline.
    pub async fn store_upload(
        &self,
        principal: &Principal,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::Validation("filename is required".to_string()));
        }
        if bytes.is_empty() {
            return Err(Error::Validation(format!("{filename} is empty")));
        }
        let category = DocumentCategory::from_filename(filename);
        let key = format!("documents/{}", uuid::Uuid::new_v4());
        let blob_ref = self
            .blobs
            .put(&key, &bytes)
            .await
            .map_err(|e| Error::transient("blob store", e))?;

        match self
            .registry
            .register(
                principal,
                filename,
                bytes.len() as u64,
                category.default_mime(),
                &blob_ref,
            )
            .await
        {
            Ok(doc) => Ok(doc),
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&blob_ref).await {
                    tracing::warn!(blob_ref, error = %cleanup, "orphaned upload blob");
                }
                Err(e)
            }
        }
    }

    /// Reset the document and index it again in the background.
    pub async fn reprocess(&self, id: &str) -> Result<Document> {
        let doc = self.registry.reset_for_reprocess(id).await?;
        self.schedule(id).await;
        Ok(doc)
    }

    pub async fn schedule(&self, id: &str) {
        let pipeline = self.clone();
        let id = id.to_string();
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = pipeline.permits.clone().acquire_owned().await else {
                return;
            };
            if let Err(e) = pipeline.index_document(&id).await {
                tracing::error!(id, error = %e, "indexing failed");
            }
        });
    }

    /// Wait for every scheduled indexing task to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while tasks.join_next().await.is_some() {}
    }

    /// Index one document inline.
    ///
    /// Returns `None` when the document was deleted or re-queued while the
    /// run was in progress, or was not `pending` to begin with.
    pub async fn index_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = {
            let _guard = self.registry.locks().lock(id).await;
            let mut doc = match self.registry.get(id).await {
                Ok(doc) => doc,
                Err(Error::NotFound { .. }) => {
                    tracing::debug!(id, "deleted before indexing");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if doc.vector_status != VectorStatus::Pending {
                tracing::debug!(id, status = %doc.vector_status, "not pending, skipping");
                return Ok(None);
            }
            self.registry
                .apply_status(&mut doc, VectorStatus::Processing, None)
                .await?;
            doc
        };
        tracing::info!(id, filename = %doc.filename, version = doc.version, "indexing started");

        let bytes = match self.blobs.get(&doc.blob_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id, error = %format!("{e:#}"), "upload blob unreadable");
                return self.fail(&doc, "stored upload could not be read").await;
            }
        };

        let category = doc.category;
        let extracted = match tokio::task::spawn_blocking(move || extract(category, &bytes)).await {
            Ok(Ok(x)) if x.is_empty() => {
                return self.fail(&doc, "no extractable content").await;
            }
            Ok(Ok(x)) => x,
            Ok(Err(e)) => return self.fail(&doc, &e.to_string()).await,
            Err(e) => {
                tracing::error!(id, error = %e, "content extraction crashed");
                return self.fail(&doc, "content extraction crashed").await;
            }
        };
        let preview: String = extracted.to_text().chars().take(PREVIEW_CHARS).collect();
        let chunks = self.chunk(&doc.id, &extracted);
        tracing::debug!(id, chunks = chunks.len(), "document chunked");

        let outcome = self
            .settings
            .retry
            .run("index", || self.embed_and_store(&doc, &chunks, &preview))
            .await;

        match outcome {
            Ok(Written::Done(done)) => {
                tracing::info!(id, chunks = chunks.len(), "indexing completed");
                Ok(Some(done))
            }
            Ok(Written::Stale) => {
                tracing::info!(id, "document changed during indexing, discarding");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(id, error = %format!("{e:#}"), "indexing gave up");
                self.fail(&doc, "embedding or index write failed after retries")
                    .await
            }
        }
    }

    fn chunk(&self, id: &str, extracted: &Extracted) -> Vec<Chunk> {
        match extracted {
            Extracted::Grid(grid) => {
                let layout = detect_layout(grid, &default_classifiers());
                chunk_table(id, grid, layout.header_row, self.settings.max_tokens)
            }
            Extracted::Text(text) => chunk_text(id, text, self.settings.max_tokens),
        }
    }

    async fn embed(&self, chunks: &[Chunk]) -> anyhow::Result<Vec<Vec<f32>>> {
        if !self.embedder.is_enabled() || chunks.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.settings.batch_size.max(1))
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();
        let embedder = &self.embedder;
        let vectors: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|texts| async move { embedder.embed(&texts).await })
            .buffered(EMBED_PARALLELISM)
            .try_collect()
            .await?;
        Ok(vectors.into_iter().flatten().collect())
    }

    /// One attempt of embed + upsert + complete. Without an enabled
    /// embedding provider no chunks are stored and the document is only
    /// keyword-searchable.
    async fn embed_and_store(
        &self,
        started: &Document,
        chunks: &[Chunk],
        preview: &str,
    ) -> anyhow::Result<Written> {
        let vectors = self.embed(chunks).await?;

        let _guard = self.registry.locks().lock(&started.id).await;
        let Some(mut doc) = self.current(started).await? else {
            return Ok(Written::Stale);
        };

        self.index.delete_by_document(&doc.id).await?;
        if !vectors.is_empty() {
            let indexed: Vec<IndexedChunk> = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexedChunk::from_chunk(chunk, &doc.filename, vector))
                .collect();
            self.index.upsert(&indexed).await?;
        }

        doc.content_preview = preview.to_string();
        self.registry
            .apply_status(&mut doc, VectorStatus::Completed, None)
            .await?;
        Ok(Written::Done(doc))
    }

    /// The document as stored, if it still matches the run's version.
    async fn current(&self, started: &Document) -> anyhow::Result<Option<Document>> {
        let doc = match self.registry.get(&started.id).await {
            Ok(doc) => doc,
            Err(Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if doc.version != started.version
            || doc.vector_status != VectorStatus::Processing
            || doc.deletion_residue.is_some()
        {
            return Ok(None);
        }
        Ok(Some(doc))
    }

    async fn fail(&self, started: &Document, message: &str) -> Result<Option<Document>> {
        let _guard = self.registry.locks().lock(&started.id).await;
        let Some(mut doc) = self.current(started).await.map_err(Error::storage)? else {
            tracing::info!(id = %started.id, "document changed during indexing, discarding");
            return Ok(None);
        };
        self.registry
            .apply_status(&mut doc, VectorStatus::Error, Some(message.to_string()))
            .await?;
        tracing::warn!(id = %doc.id, message, "indexing failed");
        Ok(Some(doc))
    }
}
