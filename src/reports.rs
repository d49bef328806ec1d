//! Report job orchestrator.
//!
//! `generate` validates its input, persists a `generating` job and returns
//! it immediately; a background worker does the rest:
//!
//! | Progress | Step |
//! |----------|------|
//! | 20 | source documents loaded and extracted |
//! | 30 | prompt built |
//! | 70 | model answered (retried on failure) |
//! | 90 | response parsed and rendered |
//! | 100 | artifact stored, job completed |
//!
//! The store only applies updates while a job is `generating`, so a
//! terminal job is never overwritten and progress never goes backwards.
//! Terminal writes are retried with the job's [`RetryPolicy`]; a job whose
//! completion cannot be recorded is failed instead and its artifact removed.
//! Failure messages stored on the job are short and generic; details are
//! logged.
//!
//! Source extraction runs on the blocking pool. A panic there fails the job
//! rather than the worker.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use finreport_core::analysis::{parse_response, Extractor, Grid, NamedGrid};
use finreport_core::completion::CompletionModel;
use finreport_core::error::{Error, Result};
use finreport_core::models::{
    Document, Principal, ReportFormat, ReportJob, ReportStatus, ReportUpdate, Template,
};
use finreport_core::render::{render, ReportMeta};
use finreport_core::store::{BlobStore, ReportStore};

use crate::extract::{extract, Extracted};
use crate::registry::Registry;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub max_prompt_tokens: usize,
}

/// A downloadable artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
    pub format: ReportFormat,
}

#[derive(Clone)]
pub struct Orchestrator {
    reports: Arc<dyn ReportStore>,
    registry: Registry,
    blobs: Arc<dyn BlobStore>,
    model: Arc<dyn CompletionModel>,
    settings: ReportSettings,
    permits: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

/// A worker failure: the message stored on the job, and the detail logged.
struct StepError {
    message: &'static str,
    detail: String,
}

impl StepError {
    fn new(message: &'static str, detail: impl std::fmt::Display) -> Self {
        Self {
            message,
            detail: detail.to_string(),
        }
    }
}

impl Orchestrator {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        registry: Registry,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn CompletionModel>,
        settings: ReportSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            reports,
            registry,
            blobs,
            model,
            settings,
            permits,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn generate(
        &self,
        principal: &Principal,
        document_ids: &[String],
        template: Template,
        format: ReportFormat,
    ) -> Result<ReportJob> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = document_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Err(Error::Validation(
                "at least one document id is required".to_string(),
            ));
        }
        if !self.model.is_enabled() {
            return Err(Error::Validation(
                "report generation requires a completion provider".to_string(),
            ));
        }
        for id in &ids {
            self.registry.get_owned(principal, id).await?;
        }

        let job = ReportJob::new(principal, ids, template, format);
        self.reports
            .insert_report(&job)
            .await
            .map_err(Error::storage)?;
        tracing::info!(
            id = %job.id,
            template = template.as_str(),
            documents = job.document_ids.len(),
            "report queued"
        );

        let worker = self.clone();
        let queued = job.clone();
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = worker.permits.clone().acquire_owned().await else {
                return;
            };
            worker.run(queued).await;
        });
        Ok(job)
    }

    /// Wait for every queued report to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while tasks.join_next().await.is_some() {}
    }

    pub async fn get_status(&self, principal: &Principal, id: &str) -> Result<ReportJob> {
        let job = self
            .reports
            .get_report(id)
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::not_found("report", id))?;
        if job.owner != principal.as_str() {
            return Err(Error::not_found("report", id));
        }
        Ok(job)
    }

    pub async fn download(&self, principal: &Principal, id: &str) -> Result<Artifact> {
        let job = self.get_status(principal, id).await?;
        let ready = job
            .download_ref
            .as_deref()
            .filter(|_| job.status == ReportStatus::Completed);
        let Some(download_ref) = ready else {
            return Err(Error::NotReady {
                id: id.to_string(),
                status: job.status.to_string(),
            });
        };
        let bytes = self
            .blobs
            .get(download_ref)
            .await
            .map_err(|e| Error::transient("blob store", e))?;
        Ok(Artifact {
            bytes,
            content_type: job.format.content_type(),
            filename: format!("financial-report-{}.{}", job.id, job.format.extension()),
            format: job.format,
        })
    }

    pub async fn list(
        &self,
        principal: &Principal,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ReportJob>> {
        self.reports
            .list_reports(principal.as_str(), limit, offset)
            .await
            .map_err(Error::storage)
    }

    /// Best-effort progress write. A lost progress update is harmless.
    async fn progress(&self, id: &str, percent: u8) {
        let update = ReportUpdate::Progress(percent);
        if let Err(e) = self.reports.apply_report_update(id, update).await {
            tracing::warn!(id, percent, error = %format!("{e:#}"), "progress update failed");
        }
    }

    /// Terminal write, retried. `Ok(false)` means the job was already
    /// terminal.
    async fn finish(&self, id: &str, update: ReportUpdate) -> anyhow::Result<bool> {
        let reports = &self.reports;
        self.settings
            .retry
            .run("report status", || {
                let update = update.clone();
                async move { reports.apply_report_update(id, update).await }
            })
            .await
    }

    async fn fail(&self, id: &str, message: &str) {
        let update = ReportUpdate::Failed {
            message: message.to_string(),
        };
        match self.finish(id, update).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(id, "report already terminal, failure not recorded"),
            Err(e) => {
                tracing::error!(id, error = %format!("{e:#}"), "could not record report failure")
            }
        }
    }

    async fn run(&self, job: ReportJob) {
        let id = job.id.clone();
        if let Err(e) = self.produce(&job).await {
            tracing::error!(id, reason = e.message, detail = %e.detail, "report failed");
            self.fail(&id, e.message).await;
        }
    }

    async fn produce(&self, job: &ReportJob) -> std::result::Result<(), StepError> {
        let docs = self
            .registry
            .store()
            .get_documents(&job.document_ids)
            .await
            .map_err(|e| StepError::new("could not load the source documents", e))?;
        if docs.len() != job.document_ids.len() {
            return Err(StepError::new(
                "a source document was deleted",
                format!("{} of {} documents found", docs.len(), job.document_ids.len()),
            ));
        }

        let mut inputs = Vec::with_capacity(docs.len());
        for doc in &docs {
            inputs.push(self.load_grid(doc).await?);
        }
        if inputs.iter().all(|input| input.grid.is_empty()) {
            return Err(StepError::new(
                "the source documents contain no data",
                format!("{} documents extracted to blank grids", inputs.len()),
            ));
        }
        self.progress(&job.id, 20).await;

        let extractor = Extractor::new(self.settings.max_prompt_tokens);
        let prompt = extractor.prompt(&inputs);
        self.progress(&job.id, 30).await;

        let model = &self.model;
        let text = &prompt.text;
        let response = self
            .settings
            .retry
            .run("report completion", || model.complete(text))
            .await
            .map_err(|e| StepError::new("the analysis model is unavailable", format!("{e:#}")))?;
        self.progress(&job.id, 70).await;

        let analysis = parse_response(&response);
        if !analysis.has_rows() {
            return Err(StepError::new(
                "no financial statement rows could be extracted",
                format!("response of {} chars had no table rows", response.len()),
            ));
        }
        let meta = ReportMeta {
            report_id: job.id.clone(),
            source_files: docs.iter().map(|d| d.filename.clone()).collect(),
            generated_at: Utc::now(),
        };
        let bytes = render(&analysis, job.template, job.format, &meta)
            .map_err(|e| StepError::new("the report could not be rendered", e))?;
        self.progress(&job.id, 90).await;

        let key = format!("reports/{}.{}", job.id, job.format.extension());
        let download_ref = self
            .blobs
            .put(&key, &bytes)
            .await
            .map_err(|e| StepError::new("the report could not be stored", format!("{e:#}")))?;

        let completed = ReportUpdate::Completed {
            download_ref: download_ref.clone(),
            analysis,
        };
        let outcome = self.finish(&job.id, completed).await;
        if let Ok(true) = outcome {
            tracing::info!(id = %job.id, format = job.format.as_str(), "report completed");
            return Ok(());
        }
        if let Err(e) = self.blobs.delete(&download_ref).await {
            tracing::warn!(id = %job.id, error = %e, "orphaned report artifact");
        }
        match outcome {
            Ok(_) => {
                tracing::warn!(id = %job.id, "report already terminal, dropped artifact");
                Ok(())
            }
            Err(e) => Err(StepError::new(
                "the report status could not be saved",
                format!("{e:#}"),
            )),
        }
    }

    /// Load a document as a grid. Text documents become one cell per line.
    async fn load_grid(&self, doc: &Document) -> std::result::Result<NamedGrid, StepError> {
        let unreadable = "a source document could not be read";
        let bytes = self
            .blobs
            .get(&doc.blob_ref)
            .await
            .map_err(|e| StepError::new(unreadable, format!("{}: {e:#}", doc.id)))?;
        let category = doc.category;
        let extracted = tokio::task::spawn_blocking(move || extract(category, &bytes))
            .await
            .map_err(|e| {
                StepError::new(unreadable, format!("{}: extraction crashed: {e}", doc.id))
            })?;
        let grid = match extracted {
            Ok(Extracted::Grid(grid)) => grid,
            Ok(Extracted::Text(text)) => Grid::new(
                text.lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| vec![l.trim().to_string()])
                    .collect(),
            ),
            Err(e) => {
                return Err(StepError::new(unreadable, format!("{}: {e}", doc.id)))
            }
        };
        Ok(NamedGrid {
            name: doc.filename.clone(),
            grid,
        })
    }
}
