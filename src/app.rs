//! Service wiring.
//!
//! [`Services`] assembles every service from a set of [`Collaborators`]; it
//! does not care whether those are SQLite-backed or in memory. [`App`]
//! owns the production setup: it opens the database, runs migrations, and
//! closes the pool on shutdown.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use finreport_core::completion::CompletionModel;
use finreport_core::embedding::EmbeddingProvider;
use finreport_core::models::Template;
use finreport_core::store::memory::{InMemoryBlobStore, InMemoryStore};
use finreport_core::store::{BlobStore, DocumentStore, ReportStore, SessionStore, VectorIndex};

use crate::blob_fs::FsBlobStore;
use crate::chat::ChatHandler;
use crate::completion::create_completion;
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::ingest::{IngestSettings, Pipeline};
use crate::migrate::run_migrations;
use crate::registry::Registry;
use crate::reports::{Orchestrator, ReportSettings};
use crate::retry::RetryPolicy;
use crate::search::SearchService;
use crate::sessions::SessionManager;
use crate::sqlite_store::SqliteStore;

/// Everything the services talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    pub reports: Arc<dyn ReportStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub model: Arc<dyn CompletionModel>,
}

impl Collaborators {
    /// In-memory stores with the given providers.
    pub fn in_memory(
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            documents: store.clone(),
            index: store.clone(),
            reports: store.clone(),
            sessions: store,
            blobs: Arc::new(InMemoryBlobStore::new()),
            embedder,
            model,
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub registry: Registry,
    pub pipeline: Pipeline,
    pub search: SearchService,
    pub reports: Orchestrator,
    pub sessions: SessionManager,
    pub chat: ChatHandler,
    /// Used when a report request names no template.
    pub default_template: Template,
}

impl Services {
    pub fn new(config: &Config, parts: Collaborators) -> Self {
        let registry = Registry::new(
            parts.documents.clone(),
            parts.index.clone(),
            parts.blobs.clone(),
        );
        let pipeline = Pipeline::new(
            registry.clone(),
            parts.index.clone(),
            parts.blobs.clone(),
            parts.embedder.clone(),
            IngestSettings {
                max_tokens: config.chunking.max_tokens,
                batch_size: config.embedding.batch_size,
                concurrency: config.ingest.concurrency,
                retry: RetryPolicy {
                    max_attempts: config.ingest.max_attempts,
                    backoff_ms: config.ingest.backoff_ms,
                },
            },
        );
        let search = SearchService::new(
            parts.documents.clone(),
            parts.index.clone(),
            parts.embedder.clone(),
            config.retrieval.params(),
            config.retrieval.final_limit,
        );
        let reports = Orchestrator::new(
            parts.reports.clone(),
            registry.clone(),
            parts.blobs.clone(),
            parts.model.clone(),
            ReportSettings {
                concurrency: config.reports.concurrency,
                retry: RetryPolicy {
                    max_attempts: config.reports.max_attempts,
                    backoff_ms: config.reports.backoff_ms,
                },
                max_prompt_tokens: config.completion.max_prompt_tokens,
            },
        );
        let sessions = SessionManager::new(parts.sessions.clone(), registry.clone());
        let chat = ChatHandler::new(
            sessions.clone(),
            search.clone(),
            reports.clone(),
            parts.model.clone(),
        );
        Self {
            registry,
            pipeline,
            search,
            reports,
            sessions,
            chat,
            default_template: config.reports.template().unwrap_or(Template::Comprehensive),
        }
    }

    /// Wait for background indexing and report jobs.
    pub async fn drain(&self) {
        self.pipeline.drain().await;
        self.reports.drain().await;
    }
}

pub struct App {
    pub config: Config,
    pub services: Services,
    pool: SqlitePool,
}

impl App {
    /// Connect, migrate and wire the configured providers.
    pub async fn init(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let parts = Collaborators {
            documents: store.clone(),
            index: store.clone(),
            reports: store.clone(),
            sessions: store,
            blobs: Arc::new(FsBlobStore::new(config.blobs.root.clone())),
            embedder: create_provider(&config.embedding)?,
            model: create_completion(&config.completion)?,
        };
        let services = Services::new(&config, parts);
        tracing::info!(
            db = %config.db.path.display(),
            embedding = %config.embedding.provider,
            completion = %config.completion.provider,
            "finreport initialised"
        );
        Ok(Self {
            config,
            services,
            pool,
        })
    }

    /// Let background work finish, then close the pool.
    pub async fn shutdown(self) {
        self.services.drain().await;
        self.pool.close().await;
        tracing::info!("finreport shut down");
    }
}
