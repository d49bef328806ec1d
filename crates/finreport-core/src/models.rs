//! Core data models used throughout finreport.
//!
//! These types represent the documents, chunks, chat sessions, analysis
//! results and report jobs that flow through the ingestion, retrieval and
//! reporting pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque, already-authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Principal used by the CLI and by requests without an identity header.
    pub fn local() -> Self {
        Self("local".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Coarse file category derived from the uploaded filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    Excel,
    Csv,
    Pdf,
    Other,
}

impl DocumentCategory {
    /// Classify a filename by its extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xls" => Self::Excel,
            "csv" => Self::Csv,
            "pdf" => Self::Pdf,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excel => "excel",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Other => "other",
        }
    }

    /// MIME type recorded for uploads of this category.
    pub fn default_mime(&self) -> &'static str {
        match self {
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv",
            Self::Pdf => "application/pdf",
            Self::Other => "application/octet-stream",
        }
    }

    /// Spreadsheet-like categories are extracted as a grid, not as prose.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Excel | Self::Csv)
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "excel" => Ok(Self::Excel),
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            "other" => Ok(Self::Other),
            other => Err(Error::Validation(format!(
                "unknown document category: {other}. Use excel, csv, pdf, or other."
            ))),
        }
    }
}

/// Indexing state of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl VectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether the indexing pipeline may move a document from `self` to `next`.
    ///
    /// Only forward moves are legal. The reset back to `Pending` is not a
    /// transition: it happens through an explicit re-process request.
    pub fn can_advance_to(self, next: VectorStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(Error::Storage(format!("unknown vector status: {other}"))),
        }
    }
}

/// Removals still outstanding after a partially failed delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionResidue {
    pub blob: bool,
    pub vectors: bool,
}

impl DeletionResidue {
    pub fn is_clear(&self) -> bool {
        !self.blob && !self.vectors
    }
}

impl fmt::Display for DeletionResidue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.blob, self.vectors) {
            (true, true) => f.write_str("blob and vectors"),
            (true, false) => f.write_str("blob"),
            (false, true) => f.write_str("vectors"),
            (false, false) => f.write_str("nothing"),
        }
    }
}

/// A registered uploaded file and its processing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub category: DocumentCategory,
    pub mime: String,
    pub uploaded_at: DateTime<Utc>,
    pub blob_ref: String,
    pub vector_status: VectorStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub content_preview: String,
    pub error_message: Option<String>,
    pub owner: String,
    /// Bumped on every re-process reset; in-flight indexing compares it
    /// before each write.
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_residue: Option<DeletionResidue>,
}

impl Document {
    pub fn new(
        owner: &Principal,
        filename: impl Into<String>,
        size_bytes: u64,
        mime: impl Into<String>,
        blob_ref: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: DocumentCategory::from_filename(&filename),
            filename,
            size_bytes,
            mime: mime.into(),
            uploaded_at: Utc::now(),
            blob_ref: blob_ref.into(),
            vector_status: VectorStatus::Pending,
            processed_at: None,
            content_preview: String::new(),
            error_message: None,
            owner: owner.0.clone(),
            version: 0,
            deletion_residue: None,
        }
    }

    pub fn is_searchable(&self) -> bool {
        self.vector_status == VectorStatus::Completed && self.deletion_residue.is_none()
    }

    /// Lowercased filename and preview joined by a unit separator. Stores
    /// that match keywords in SQL persist this so the fold is Unicode-aware.
    pub fn search_text(&self) -> String {
        format!(
            "{}\u{1f}{}",
            self.filename.to_lowercase(),
            self.content_preview.to_lowercase()
        )
    }
}

/// Filters for [`Document`] listings.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Case-insensitive substring over filename and content preview.
    pub search: Option<String>,
    /// Restrict to these categories (empty = all).
    pub categories: Vec<DocumentCategory>,
    pub status: Option<VectorStatus>,
    pub owner: Option<String>,
    /// Only `completed` documents without deletion residue.
    pub searchable_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl DocumentFilter {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }

    /// In-memory evaluation of everything except pagination.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ref needle) = self.search {
            if !text_contains(&doc.filename, needle) && !text_contains(&doc.content_preview, needle)
            {
                return false;
            }
        }
        if !self.categories.is_empty() && !self.categories.contains(&doc.category) {
            return false;
        }
        if let Some(status) = self.status {
            if doc.vector_status != status {
                return false;
            }
        }
        if let Some(ref owner) = self.owner {
            if &doc.owner != owner {
                return false;
            }
        }
        !self.searchable_only || doc.is_searchable()
    }
}

/// Case-insensitive substring test used by keyword search and listings.
pub fn text_contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A chunk of a document's extracted content.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Metadata stored alongside every vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub filename: String,
    pub position: i64,
}

/// A retrievable unit owned by the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub id: String,
    pub text: String,
    pub hash: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl IndexedChunk {
    pub fn from_chunk(chunk: &Chunk, filename: &str, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            hash: chunk.hash.clone(),
            vector,
            metadata: ChunkMetadata {
                document_id: chunk.document_id.clone(),
                filename: filename.to_string(),
                position: chunk.chunk_index,
            },
        }
    }
}

/// Retrieval mode for [`crate::search::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn needs_embeddings(&self) -> bool {
        !matches!(self, Self::Keyword)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::Validation(format!(
                "unknown search mode: {other}. Use keyword, semantic, or hybrid."
            ))),
        }
    }
}

/// A ranked search hit. Produced fresh per query, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub filename: String,
    pub category: DocumentCategory,
    pub vector_status: VectorStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(Error::Validation(format!("unknown chat role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Structured references (report ids, search hits) live here, never
    /// inline in `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Principal that created the session; nobody else can read it.
    pub owner: String,
    pub turns: Vec<ChatTurn>,
    pub selected_file_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, owner: &Principal) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner: owner.0.clone(),
            turns: Vec::new(),
            selected_file_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A financial figure exactly as the model or spreadsheet produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRow {
    pub indicator: String,
    pub current_year: CellValue,
    pub previous_year: CellValue,
}

/// The three statements the extractor fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlowStatement,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        Self::BalanceSheet,
        Self::IncomeStatement,
        Self::CashFlowStatement,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::BalanceSheet => "Balance Sheet",
            Self::IncomeStatement => "Income Statement",
            Self::CashFlowStatement => "Cash Flow Statement",
        }
    }

    /// Exact heading marker the model is told to emit.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::BalanceSheet => "#### Balance Sheet Table",
            Self::IncomeStatement => "#### Income Statement Table",
            Self::CashFlowStatement => "#### Cash Flow Statement Table",
        }
    }
}

/// Structured output of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub balance_sheet: Vec<FinancialRow>,
    pub income_statement: Vec<FinancialRow>,
    pub cash_flow_statement: Vec<FinancialRow>,
    pub summary: String,
}

impl AnalysisResult {
    pub fn table(&self, kind: StatementKind) -> &[FinancialRow] {
        match kind {
            StatementKind::BalanceSheet => &self.balance_sheet,
            StatementKind::IncomeStatement => &self.income_statement,
            StatementKind::CashFlowStatement => &self.cash_flow_statement,
        }
    }

    pub fn table_mut(&mut self, kind: StatementKind) -> &mut Vec<FinancialRow> {
        match kind {
            StatementKind::BalanceSheet => &mut self.balance_sheet,
            StatementKind::IncomeStatement => &mut self.income_statement,
            StatementKind::CashFlowStatement => &mut self.cash_flow_statement,
        }
    }

    pub fn row_count(&self) -> usize {
        self.balance_sheet.len() + self.income_statement.len() + self.cash_flow_statement.len()
    }

    pub fn has_rows(&self) -> bool {
        self.row_count() > 0
    }
}

/// Report job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    Completed,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Generating)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(Error::Storage(format!("unknown report status: {other}"))),
        }
    }
}

/// Report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    /// Narrative plus all three tables with change columns.
    Comprehensive,
    /// Narrative plus the leading rows of each table.
    Executive,
    /// The three tables only.
    Tables,
}

impl Template {
    pub const ALL: [Template; 3] = [Self::Comprehensive, Self::Executive, Self::Tables];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::Executive => "executive",
            Self::Tables => "tables",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Comprehensive => {
                "Narrative analysis with all statements and year-over-year changes"
            }
            Self::Executive => "Narrative summary with the headline rows of each statement",
            Self::Tables => "The three financial statement tables without commentary",
        }
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comprehensive" => Ok(Self::Comprehensive),
            "executive" => Ok(Self::Executive),
            "tables" => Ok(Self::Tables),
            other => Err(Error::Validation(format!(
                "unknown template: {other}. Use comprehensive, executive, or tables."
            ))),
        }
    }
}

/// Artifact encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
    /// Workbook with one sheet per statement, plus ratios and summary.
    Xlsx,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Xlsx => "xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Json => "application/json",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    /// File extension of the artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Xlsx => "xlsx",
        }
    }

    /// Artifacts that cannot be printed to a terminal.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Xlsx)
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            other => Err(Error::Validation(format!(
                "unknown report format: {other}. Use markdown, json, or xlsx."
            ))),
        }
    }
}

/// Asynchronous unit of work turning documents into a downloadable report.
///
/// `download_ref` is set iff `status == Completed`; `error_message` is set
/// iff `status == Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportJob {
    pub id: String,
    pub owner: String,
    pub document_ids: Vec<String>,
    pub template: Template,
    pub format: ReportFormat,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportJob {
    pub fn new(
        owner: &Principal,
        document_ids: Vec<String>,
        template: Template,
        format: ReportFormat,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.0.clone(),
            document_ids,
            template,
            format,
            status: ReportStatus::Generating,
            download_ref: None,
            error_message: None,
            progress: Some(0),
            analysis: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A state change applied to a generating [`ReportJob`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReportUpdate {
    /// Best-effort progress; ignored when lower than the stored value.
    Progress(u8),
    Completed {
        download_ref: String,
        analysis: AnalysisResult,
    },
    Failed {
        message: String,
    },
}

impl ReportUpdate {
    /// Apply to `job` in place. Returns `false` when the job is already
    /// terminal and nothing changed.
    pub fn apply(self, job: &mut ReportJob) -> bool {
        if job.status.is_terminal() {
            return false;
        }
        match self {
            Self::Progress(p) => {
                let p = p.min(100);
                if job.progress.map_or(true, |current| p > current) {
                    job.progress = Some(p);
                }
            }
            Self::Completed {
                download_ref,
                analysis,
            } => {
                job.status = ReportStatus::Completed;
                job.download_ref = Some(download_ref);
                job.analysis = Some(analysis);
                job.progress = Some(100);
            }
            Self::Failed { message } => {
                job.status = ReportStatus::Error;
                job.error_message = Some(message);
            }
        }
        job.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_from_extension() {
        assert_eq!(DocumentCategory::from_filename("FY2024.XLSX"), DocumentCategory::Excel);
        assert_eq!(DocumentCategory::from_filename("ledger.csv"), DocumentCategory::Csv);
        assert_eq!(DocumentCategory::from_filename("notes.pdf"), DocumentCategory::Pdf);
        assert_eq!(DocumentCategory::from_filename("README"), DocumentCategory::Other);
    }

    #[test]
    fn status_only_moves_forward() {
        use VectorStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Error));
        assert!(!Pending.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Processing));
        assert!(!Completed.can_advance_to(Pending));
        assert!(!Error.can_advance_to(Completed));
    }

    #[test]
    fn terminal_report_ignores_updates() {
        let mut job = ReportJob::new(
            &Principal::local(),
            vec!["d1".into()],
            Template::Tables,
            ReportFormat::Markdown,
        );
        assert!(ReportUpdate::Failed {
            message: "boom".into()
        }
        .apply(&mut job));
        assert!(!ReportUpdate::Completed {
            download_ref: "ref".into(),
            analysis: AnalysisResult::default(),
        }
        .apply(&mut job));
        assert_eq!(job.status, ReportStatus::Error);
        assert!(job.download_ref.is_none());
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = ReportJob::new(
            &Principal::local(),
            vec!["d1".into()],
            Template::Tables,
            ReportFormat::Markdown,
        );
        ReportUpdate::Progress(40).apply(&mut job);
        ReportUpdate::Progress(20).apply(&mut job);
        assert_eq!(job.progress, Some(40));
    }

    #[test]
    fn report_format_names() {
        assert_eq!("excel".parse::<ReportFormat>().unwrap(), ReportFormat::Xlsx);
        assert_eq!(ReportFormat::Xlsx.extension(), "xlsx");
        assert!(ReportFormat::Xlsx.is_binary());
        assert!(!ReportFormat::Json.is_binary());
        assert!("pdf".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn cell_value_keeps_original_form() {
        let row: FinancialRow = serde_json::from_str(
            r#"{"indicator":"Revenue","current_year":1200.5,"previous_year":"1,100"}"#,
        )
        .unwrap();
        assert_eq!(row.current_year, CellValue::Number(1200.5));
        assert_eq!(row.previous_year, CellValue::Text("1,100".into()));
    }
}
