//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `POST` | `/documents?filename=` | Upload raw bytes; indexing runs in the background |
//! | `GET` | `/documents` | List documents (`limit`, `offset`, `search`, `category`) |
//! | `GET` | `/documents/{id}` | One document |
//! | `DELETE` | `/documents/{id}` | Delete document, blob and vectors |
//! | `POST` | `/documents/{id}/reprocess` | Re-index a document |
//! | `POST` | `/search` | Keyword, semantic or hybrid search |
//! | `POST` | `/select` | Auto-select documents for a context |
//! | `GET` | `/indicators` | Canonical indicator lists |
//! | `POST` | `/chat` | Submit a chat message |
//! | `GET` | `/chat/{session_id}` | Session history |
//! | `PUT` | `/chat/{session_id}/files` | Replace the selected files |
//! | `DELETE` | `/chat/{session_id}` | Clear a session |
//! | `POST` | `/reports` | Queue a report |
//! | `GET` | `/reports` | List reports |
//! | `GET` | `/reports/{id}` | Report status |
//! | `GET` | `/reports/{id}/download` | Report artifact |
//! | `GET` | `/templates` | Available report templates |
//!
//! The caller is identified by the `x-principal-id` header (default
//! `local`). Another principal's documents and reports answer 404.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "r1 is not ready (status: generating)" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `not_ready`, `conflict` | 409 |
//! | `partial_deletion`, `internal` | 500 |
//! | `unavailable` | 503 |

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};

use finreport_core::analysis::prompt::indicators;
use finreport_core::error::Error;
use finreport_core::models::{
    Document, DocumentCategory, DocumentFilter, Principal, ReportFormat, ReportJob, SearchMode,
    SearchResult, StatementKind, Template,
};
use finreport_core::search::SelectionPrefs;

use crate::app::{App, Services};
use crate::config::Config;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

/// Start the server and run until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = App::init(config).await?;
    let router = router(app.services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("finreport listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    app.shutdown().await;
    Ok(())
}

pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/documents",
            post(handle_upload)
                .get(handle_list_documents)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/documents/{id}/reprocess", post(handle_reprocess))
        .route("/search", post(handle_search))
        .route("/select", post(handle_select))
        .route("/indicators", get(handle_indicators))
        .route("/chat", post(handle_chat))
        .route(
            "/chat/{session_id}",
            get(handle_chat_history).delete(handle_chat_clear),
        )
        .route("/chat/{session_id}/files", put(handle_chat_files))
        .route("/reports", post(handle_generate).get(handle_list_reports))
        .route("/reports/{id}", get(handle_report_status))
        .route("/reports/{id}/download", get(handle_download))
        .route("/templates", get(handle_templates))
        .layer(cors)
        .with_state(services)
}

// ============ Caller identity ============

/// The principal named by `x-principal-id`, or `local`.
pub struct Caller(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .headers
            .get("x-principal-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Principal::new)
            .unwrap_or_else(Principal::local);
        Ok(Caller(principal))
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::NotReady { .. } | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::PartialDeletion { .. } | Error::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &err {
            Error::Storage(detail) => {
                tracing::error!(detail = %detail, "storage failure");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

type ApiResult<T> = Result<T, AppError>;

fn page(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    (
        limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE),
        offset.unwrap_or(0),
    )
}

/// Comma-separated categories, e.g. `excel,csv`.
fn parse_categories(raw: Option<&str>) -> ApiResult<Vec<DocumentCategory>> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<DocumentCategory>().map_err(AppError::from))
            .collect()
    })
    .unwrap_or_else(|| Ok(Vec::new()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    embeddings: bool,
}

async fn handle_health(State(services): State<Services>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embeddings: services.search.embeddings_enabled(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

async fn handle_upload(
    State(services): State<Services>,
    Caller(principal): Caller,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let filename = params
        .filename
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    let doc = services
        .pipeline
        .upload(&principal, &filename, body.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    search: Option<String>,
    category: Option<String>,
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(services): State<Services>,
    Caller(principal): Caller,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<DocumentList>> {
    let (limit, offset) = page(params.limit, params.offset);
    let filter = DocumentFilter {
        search: params.search.filter(|s| !s.trim().is_empty()),
        categories: parse_categories(params.category.as_deref())?,
        ..DocumentFilter::page(limit, offset)
    };
    let documents = services.search.available(&principal, filter).await?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_get_document(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    Ok(Json(services.registry.get_owned(&principal, &id).await?))
}

async fn handle_delete_document(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    services.registry.get_owned(&principal, &id).await?;
    services.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_reprocess(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    services.registry.get_owned(&principal, &id).await?;
    let doc = services.pipeline.reprocess(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(doc)))
}

// ============ Search and selection ============

#[derive(Deserialize)]
struct SearchRequestBody {
    query: String,
    mode: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(services): State<Services>,
    Caller(principal): Caller,
    Json(req): Json<SearchRequestBody>,
) -> ApiResult<Json<SearchResponse>> {
    let mode = match req.mode.as_deref() {
        Some(m) => m.parse::<SearchMode>()?,
        None => services.search.default_mode(),
    };
    let categories = req
        .categories
        .iter()
        .map(|c| c.parse::<DocumentCategory>())
        .collect::<Result<Vec<_>, _>>()?;
    let results = services
        .search
        .search(&principal, &req.query, mode, req.limit, &categories)
        .await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Deserialize)]
struct SelectRequest {
    context: String,
    max_files: Option<usize>,
    prefer_processed: Option<bool>,
    prefer_recent: Option<bool>,
}

async fn handle_select(
    State(services): State<Services>,
    Caller(principal): Caller,
    Json(req): Json<SelectRequest>,
) -> ApiResult<Json<DocumentList>> {
    let defaults = SelectionPrefs::default();
    let prefs = SelectionPrefs {
        prefer_processed: req.prefer_processed.unwrap_or(defaults.prefer_processed),
        prefer_recent: req.prefer_recent.unwrap_or(defaults.prefer_recent),
    };
    let documents = services
        .search
        .auto_select(&principal, &req.context, req.max_files.unwrap_or(3), prefs)
        .await?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_indicators() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "balance_sheet": indicators(StatementKind::BalanceSheet),
        "income_statement": indicators(StatementKind::IncomeStatement),
        "cash_flow_statement": indicators(StatementKind::CashFlowStatement),
    }))
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<String>,
    message: String,
    #[serde(default)]
    file_ids: Vec<String>,
}

async fn handle_chat(
    State(services): State<Services>,
    Caller(principal): Caller,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<crate::chat::ChatReply>> {
    let reply = services
        .chat
        .submit(
            &principal,
            req.session_id.as_deref(),
            &req.message,
            &req.file_ids,
        )
        .await?;
    Ok(Json(reply))
}

async fn handle_chat_history(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(session_id): Path<String>,
) -> ApiResult<Json<finreport_core::models::ChatSession>> {
    // Prune stale selections before returning the session.
    services
        .sessions
        .selected_files(&principal, &session_id)
        .await?;
    Ok(Json(services.sessions.history(&principal, &session_id).await?))
}

#[derive(Deserialize)]
struct FilesRequest {
    file_ids: Vec<String>,
}

async fn handle_chat_files(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(session_id): Path<String>,
    Json(req): Json<FilesRequest>,
) -> ApiResult<Json<DocumentList>> {
    services
        .sessions
        .get_or_create(&principal, Some(&session_id))
        .await?;
    let documents = services
        .sessions
        .set_selected_files(&principal, &session_id, &req.file_ids)
        .await?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_chat_clear(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    services.sessions.clear(&principal, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Reports ============

#[derive(Deserialize)]
struct GenerateRequest {
    document_ids: Vec<String>,
    template: Option<String>,
    format: Option<String>,
}

async fn handle_generate(
    State(services): State<Services>,
    Caller(principal): Caller,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<ReportJob>)> {
    let template = match req.template.as_deref() {
        Some(t) => t.parse::<Template>()?,
        None => services.default_template,
    };
    let format = match req.format.as_deref() {
        Some(f) => f.parse::<ReportFormat>()?,
        None => ReportFormat::default(),
    };
    let job = services
        .reports
        .generate(&principal, &req.document_ids, template, format)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Deserialize)]
struct PageParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
struct ReportList {
    reports: Vec<ReportJob>,
}

async fn handle_list_reports(
    State(services): State<Services>,
    Caller(principal): Caller,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<ReportList>> {
    let (limit, offset) = page(params.limit, params.offset);
    let reports = services.reports.list(&principal, limit, offset).await?;
    Ok(Json(ReportList { reports }))
}

async fn handle_report_status(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ReportJob>> {
    Ok(Json(services.reports.get_status(&principal, &id).await?))
}

async fn handle_download(
    State(services): State<Services>,
    Caller(principal): Caller,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let artifact = services.reports.download(&principal, &id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
        ],
        artifact.bytes,
    )
        .into_response())
}

#[derive(Serialize)]
struct TemplateInfo {
    name: &'static str,
    description: &'static str,
}

async fn handle_templates() -> Json<Vec<TemplateInfo>> {
    Json(
        Template::ALL
            .iter()
            .map(|t| TemplateInfo {
                name: t.as_str(),
                description: t.description(),
            })
            .collect(),
    )
}
