//! Report jobs end to end with a scripted completion model.

mod common;

use anyhow::bail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

use common::*;
use finreport::app::{Collaborators, Services};
use finreport::extract::extract;
use finreport_core::error::Error;
use finreport_core::models::{
    DocumentCategory, Principal, ReportFormat, ReportJob, ReportStatus, ReportUpdate, Template,
};
use finreport_core::store::memory::{InMemoryBlobStore, InMemoryStore};
use finreport_core::store::{BlobStore, ReportStore};

async fn indexed_sheet(services: &Services, owner: &Principal) -> String {
    let doc = services
        .pipeline
        .upload(owner, "balance-2024.csv", balance_sheet_csv())
        .await
        .unwrap();
    services.pipeline.drain().await;
    doc.id
}

#[tokio::test]
async fn test_report_not_ready_then_downloadable() {
    let tmp = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let model = Arc::new(ScriptedModel::new(MODEL_RESPONSE).gated(gate.clone()));
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), model.clone());
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    assert_eq!(job.status, ReportStatus::Generating);

    let err = services.reports.download(&owner, &job.id).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }));

    gate.notify_one();
    services.reports.drain().await;

    let done = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert_eq!(done.progress, Some(100));
    let analysis = done.analysis.unwrap();
    assert_eq!(analysis.balance_sheet.len(), 2);
    assert_eq!(analysis.income_statement.len(), 2);
    assert_eq!(analysis.cash_flow_statement.len(), 1);

    let artifact = services.reports.download(&owner, &job.id).await.unwrap();
    let body = String::from_utf8(artifact.bytes).unwrap();
    assert!(body.contains("Total Assets"));
    assert!(body.contains("balance-2024.csv"));
    assert!(artifact.filename.ends_with(".md"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_prompt_uses_detected_year_columns() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(MODEL_RESPONSE));
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), model.clone());
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    services
        .reports
        .generate(&owner, &[doc_id], Template::Tables, ReportFormat::Json)
        .await
        .unwrap();
    services.reports.drain().await;

    let prompt = model.last_prompt().unwrap();
    assert!(prompt.contains("Current year column: 2024"));
    assert!(prompt.contains("Previous year column: 2023"));
    assert!(prompt.contains("Total Assets"));
    assert!(!prompt.contains("Acme Holdings Ltd\n"));
}

#[tokio::test]
async fn test_json_artifact_parses() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    );
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Executive, ReportFormat::Json)
        .await
        .unwrap();
    services.reports.drain().await;

    let artifact = services.reports.download(&owner, &job.id).await.unwrap();
    assert_eq!(artifact.content_type, "application/json");
    let value: serde_json::Value = serde_json::from_slice(&artifact.bytes).unwrap();
    assert!(value.is_object());
}

#[tokio::test]
async fn test_transient_model_failure_retried() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(MODEL_RESPONSE).failing_first(2));
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), model.clone());
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let done = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn test_model_exhaustion_marks_error() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(MODEL_RESPONSE).failing_first(10));
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), model.clone());
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let failed = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(failed.status, ReportStatus::Error);
    assert!(failed.error_message.is_some());
    assert!(failed.download_ref.is_none());
    assert!(matches!(
        services.reports.download(&owner, &job.id).await,
        Err(Error::NotReady { .. })
    ));
}

#[tokio::test]
async fn test_unparseable_answer_fails_job() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new("I could not find any figures.")),
    );
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let failed = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(failed.status, ReportStatus::Error);
}

#[tokio::test]
async fn test_generate_validation() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    );
    let owner = Principal::local();

    let err = services
        .reports
        .generate(&owner, &[], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = services
        .reports
        .generate(
            &owner,
            &["not-a-document".to_string()],
            Template::Comprehensive,
            ReportFormat::Markdown,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_disabled_model_rejects_generation() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), Arc::new(NoModel));
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let err = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_reports_scoped_to_owner() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    );
    let alice = Principal::new("alice");
    let bob = Principal::new("bob");
    let doc_id = indexed_sheet(&services, &alice).await;

    let job = services
        .reports
        .generate(&alice, &[doc_id.clone()], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    assert!(matches!(
        services.reports.get_status(&bob, &job.id).await,
        Err(Error::NotFound { .. })
    ));
    assert!(services.reports.list(&bob, 10, 0).await.unwrap().is_empty());
    assert_eq!(services.reports.list(&alice, 10, 0).await.unwrap().len(), 1);

    let err = services
        .reports
        .generate(&bob, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_markdown_report_includes_key_ratios() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    );
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let artifact = services.reports.download(&owner, &job.id).await.unwrap();
    let body = String::from_utf8(artifact.bytes).unwrap();
    assert!(body.contains("## Key Ratios"));
    assert!(body.contains("| Leverage | Debt to Equity |"));
    assert!(body.contains("Overall financial health"));
}

#[tokio::test]
async fn test_xlsx_report_reads_back_as_workbook() {
    let tmp = TempDir::new().unwrap();
    let services = in_memory_services(
        &tmp,
        Arc::new(HashEmbedder),
        Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    );
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Xlsx)
        .await
        .unwrap();
    services.reports.drain().await;

    let artifact = services.reports.download(&owner, &job.id).await.unwrap();
    assert!(artifact.filename.ends_with(".xlsx"));
    assert_eq!(artifact.format, ReportFormat::Xlsx);
    assert_eq!(
        artifact.content_type,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert!(artifact.bytes.starts_with(b"PK"));

    let text = extract(DocumentCategory::Excel, &artifact.bytes)
        .unwrap()
        .to_text();
    assert!(text.contains("Total Assets"));
    assert!(text.contains("1200000"));
    assert!(text.contains("Net Cash Flow from Operating Activities"));
    assert!(text.contains("Debt to Equity"));
}

#[tokio::test]
async fn test_blank_sources_fail_before_model_call() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(MODEL_RESPONSE));
    let services = in_memory_services(&tmp, Arc::new(HashEmbedder), model.clone());
    let owner = Principal::local();
    let doc = services
        .pipeline
        .upload(&owner, "blank.csv", b",,,\n,,,\n".to_vec())
        .await
        .unwrap();
    services.pipeline.drain().await;

    let job = services
        .reports
        .generate(&owner, &[doc.id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let failed = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(failed.status, ReportStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("the source documents contain no data")
    );
    assert!(failed.download_ref.is_none());
    assert_eq!(model.calls(), 0);
}

/// Report store whose `Completed` writes fail a number of times.
struct FlakyReports {
    inner: Arc<InMemoryStore>,
    completed_failures: AtomicUsize,
}

#[async_trait]
impl ReportStore for FlakyReports {
    async fn insert_report(&self, job: &ReportJob) -> anyhow::Result<()> {
        self.inner.insert_report(job).await
    }

    async fn get_report(&self, id: &str) -> anyhow::Result<Option<ReportJob>> {
        self.inner.get_report(id).await
    }

    async fn list_reports(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<ReportJob>> {
        self.inner.list_reports(owner, limit, offset).await
    }

    async fn apply_report_update(&self, id: &str, update: ReportUpdate) -> anyhow::Result<bool> {
        if matches!(update, ReportUpdate::Completed { .. }) {
            let left = self.completed_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.completed_failures.store(left - 1, Ordering::SeqCst);
                bail!("database is locked");
            }
        }
        self.inner.apply_report_update(id, update).await
    }
}

fn flaky_services(
    tmp: &TempDir,
    completed_failures: usize,
) -> (Services, Arc<InMemoryBlobStore>) {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let collaborators = Collaborators {
        documents: store.clone(),
        index: store.clone(),
        reports: Arc::new(FlakyReports {
            inner: store.clone(),
            completed_failures: AtomicUsize::new(completed_failures),
        }),
        sessions: store,
        blobs: blobs.clone(),
        embedder: Arc::new(HashEmbedder),
        model: Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
    };
    (Services::new(&test_config(tmp), collaborators), blobs)
}

#[tokio::test]
async fn test_completion_write_retried() {
    let tmp = TempDir::new().unwrap();
    let (services, _blobs) = flaky_services(&tmp, 1);
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let done = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert!(services.reports.download(&owner, &job.id).await.is_ok());
}

#[tokio::test]
async fn test_unrecordable_completion_fails_job_and_drops_artifact() {
    let tmp = TempDir::new().unwrap();
    let (services, blobs) = flaky_services(&tmp, usize::MAX);
    let owner = Principal::local();
    let doc_id = indexed_sheet(&services, &owner).await;

    let job = services
        .reports
        .generate(&owner, &[doc_id], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;

    let failed = services.reports.get_status(&owner, &job.id).await.unwrap();
    assert_eq!(failed.status, ReportStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("the report status could not be saved")
    );
    assert!(failed.download_ref.is_none());
    assert!(blobs
        .get(&format!("mem://reports/{}.md", job.id))
        .await
        .is_err());
}
