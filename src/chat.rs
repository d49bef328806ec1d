//! Chat turn handler.
//!
//! Each message is routed by keyword to an intent:
//!
//! | Intent | Trigger examples | Action |
//! |--------|------------------|--------|
//! | `report` | "generate report", "executive summary" | queue a report job |
//! | `analysis` | "analyze", "run analysis" | queue a comprehensive report |
//! | `list_files` | "list files", "what files" | list available documents |
//! | `search` | "search for", "find" | hybrid (or keyword) search |
//! | `help` | "help", "what can you do" | describe the commands |
//! | `general` | anything else | completion model with recent history |
//!
//! File references come from UUIDs in the message and from the request's
//! `file_ids`; when present they replace the session's selection. Without
//! any selection, report intents auto-select up to three documents.

use std::sync::Arc;

use serde::Serialize;

use finreport_core::completion::CompletionModel;
use finreport_core::error::{Error, Result};
use finreport_core::models::{
    ChatTurn, Document, DocumentFilter, Principal, ReportFormat, Role, SearchResult, Template,
};
use finreport_core::search::SelectionPrefs;

use crate::reports::Orchestrator;
use crate::search::SearchService;
use crate::sessions::SessionManager;

const AUTO_SELECT_MAX: usize = 3;
const HISTORY_TURNS: usize = 10;
const LIST_LIMIT: usize = 20;

const REPORT_TRIGGERS: &[&str] = &[
    "generate report",
    "create report",
    "financial report",
    "accounting report",
    "executive summary",
    "tables only",
    "report",
];
const ANALYSIS_TRIGGERS: &[&str] = &[
    "run analysis",
    "generate analysis",
    "analyze",
    "analyse",
    "analysis",
    "process data",
];
const LIST_TRIGGERS: &[&str] = &[
    "list files",
    "show files",
    "available files",
    "what files",
    "my files",
];
const SEARCH_TRIGGERS: &[&str] = &["search for", "search", "look for", "find"];
const HELP_TRIGGERS: &[&str] = &["help", "what can you do", "capabilities", "commands"];

const HELP_TEXT: &str = "I can analyse uploaded financial spreadsheets and produce reports \
with Balance Sheet, Income Statement and Cash Flow tables.\n\n\
- \"generate report\" (or \"executive summary\", \"tables only\") builds a report \
from the selected files\n\
- \"list files\" shows your documents\n\
- \"search for <terms>\" finds documents\n\
- mention a document id to select it\n\
- anything else is answered as a financial question";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Report,
    Analysis,
    ListFiles,
    Search,
    Help,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Analysis => "analysis",
            Self::ListFiles => "list_files",
            Self::Search => "search",
            Self::Help => "help",
            Self::General => "general",
        }
    }
}

/// `needle` occurs at byte `pos` of `haystack` as a whole word.
fn word_at(haystack: &str, pos: usize, needle: &str) -> bool {
    let before = haystack[..pos].chars().next_back();
    let after = haystack[pos + needle.len()..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(pos, _)| word_at(haystack, pos, needle))
}

pub fn detect_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    let hit = |triggers: &[&str]| triggers.iter().any(|t| contains_word(&lower, t));
    if hit(LIST_TRIGGERS) {
        Intent::ListFiles
    } else if hit(REPORT_TRIGGERS) {
        Intent::Report
    } else if hit(ANALYSIS_TRIGGERS) {
        Intent::Analysis
    } else if hit(SEARCH_TRIGGERS) {
        Intent::Search
    } else if hit(HELP_TRIGGERS) {
        Intent::Help
    } else {
        Intent::General
    }
}

pub fn template_from_message(message: &str) -> Template {
    let lower = message.to_lowercase();
    if lower.contains("executive summary") || contains_word(&lower, "executive") {
        Template::Executive
    } else if lower.contains("tables only") || lower.contains("only tables") {
        Template::Tables
    } else {
        Template::Comprehensive
    }
}

/// The text after the first search trigger, without surrounding quotes.
pub fn search_terms(message: &str) -> String {
    let lower = message.to_lowercase();
    let rest = SEARCH_TRIGGERS
        .iter()
        .find_map(|t| {
            lower
                .match_indices(t)
                .find(|(pos, _)| word_at(&lower, *pos, t))
                .and_then(|(pos, _)| message.get(pos + t.len()..))
        })
        .unwrap_or(message);
    rest.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '?' || c == '.' || c == ':')
        .trim()
        .to_string()
}

/// UUIDs mentioned anywhere in the message, in order, without duplicates.
pub fn referenced_ids(message: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for token in message.split(|c: char| !(c.is_ascii_hexdigit() || c == '-')) {
        if let Ok(id) = uuid::Uuid::parse_str(token) {
            let id = id.hyphenated().to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub intent: Intent,
    pub reply: String,
    pub selected_file_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

#[derive(Clone)]
pub struct ChatHandler {
    sessions: SessionManager,
    search: SearchService,
    reports: Orchestrator,
    model: Arc<dyn CompletionModel>,
}

struct Outcome {
    reply: String,
    metadata: serde_json::Value,
    report_id: Option<String>,
    search_results: Vec<SearchResult>,
    documents: Vec<Document>,
}

impl Outcome {
    fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            metadata: serde_json::Value::Null,
            report_id: None,
            search_results: Vec::new(),
            documents: Vec::new(),
        }
    }
}

impl ChatHandler {
    pub fn new(
        sessions: SessionManager,
        search: SearchService,
        reports: Orchestrator,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            sessions,
            search,
            reports,
            model,
        }
    }

    pub async fn submit(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
        message: &str,
        file_ids: &[String],
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }
        let session = self.sessions.get_or_create(principal, session_id).await?;
        let intent = detect_intent(message);

        let selected = self
            .resolve_selection(principal, &session.id, message, file_ids)
            .await?;

        let outcome = match intent {
            Intent::Report | Intent::Analysis => {
                let template = match intent {
                    Intent::Report => template_from_message(message),
                    _ => Template::Comprehensive,
                };
                self.queue_report(principal, message, selected.clone(), template)
                    .await?
            }
            Intent::ListFiles => self.list_files(principal).await?,
            Intent::Search => self.run_search(principal, message).await?,
            Intent::Help => Outcome::text(HELP_TEXT),
            Intent::General => {
                self.general(message, &session.turns, &selected).await?
            }
        };

        let selected_file_ids: Vec<String> = selected.iter().map(|d| d.id.clone()).collect();
        let user_meta = (!selected_file_ids.is_empty())
            .then(|| serde_json::json!({ "file_ids": selected_file_ids }));
        self.sessions
            .append_turn(principal, &session.id, Role::User, message, user_meta)
            .await?;

        let mut assistant_meta = serde_json::json!({ "intent": intent.as_str() });
        if let (Some(meta), serde_json::Value::Object(extra)) =
            (assistant_meta.as_object_mut(), outcome.metadata)
        {
            meta.extend(extra);
        }
        self.sessions
            .append_turn(
                principal,
                &session.id,
                Role::Assistant,
                &outcome.reply,
                Some(assistant_meta),
            )
            .await?;
        tracing::info!(session = %session.id, intent = intent.as_str(), "chat turn handled");

        Ok(ChatReply {
            session_id: session.id,
            intent,
            reply: outcome.reply,
            selected_file_ids,
            report_id: outcome.report_id,
            search_results: outcome.search_results,
            documents: outcome.documents,
        })
    }

    /// Explicit references replace the selection; otherwise the stored
    /// selection is used. UUIDs in free text that do not name one of the
    /// principal's documents are ignored; `file_ids` must all be valid.
    async fn resolve_selection(
        &self,
        principal: &Principal,
        session_id: &str,
        message: &str,
        file_ids: &[String],
    ) -> Result<Vec<Document>> {
        let mut refs: Vec<String> = file_ids.to_vec();
        for id in referenced_ids(message) {
            if !refs.contains(&id) && self.is_visible(principal, &id).await? {
                refs.push(id);
            }
        }
        if refs.is_empty() {
            return self.sessions.selected_files(principal, session_id).await;
        }
        self.sessions
            .set_selected_files(principal, session_id, &refs)
            .await
    }

    async fn is_visible(&self, principal: &Principal, id: &str) -> Result<bool> {
        match self.reports.registry().get_owned(principal, id).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn queue_report(
        &self,
        principal: &Principal,
        message: &str,
        selected: Vec<Document>,
        template: Template,
    ) -> Result<Outcome> {
        let docs = if selected.is_empty() {
            self.search
                .auto_select(principal, message, AUTO_SELECT_MAX, SelectionPrefs::default())
                .await?
        } else {
            selected
        };
        if docs.is_empty() {
            let any = self
                .search
                .available(principal, DocumentFilter::page(1, 0))
                .await?;
            return Ok(Outcome::text(if any.is_empty() {
                "No documents are available yet. Upload a spreadsheet first."
            } else {
                "No processed documents match that request. Mention a document id \
                 or say \"list files\" to choose which files to use."
            }));
        }
        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        let job = self
            .reports
            .generate(principal, &ids, template, ReportFormat::Markdown)
            .await?;
        let names: Vec<&str> = docs.iter().map(|d| d.filename.as_str()).collect();
        let mut outcome = Outcome::text(format!(
            "Generating a {} report from {}. Report id: {}",
            template.as_str(),
            names.join(", "),
            job.id
        ));
        outcome.metadata = serde_json::json!({
            "report_id": job.id,
            "template": template.as_str(),
            "file_ids": ids,
        });
        outcome.report_id = Some(job.id);
        outcome.documents = docs;
        Ok(outcome)
    }

    async fn list_files(&self, principal: &Principal) -> Result<Outcome> {
        let docs = self
            .search
            .available(principal, DocumentFilter::page(LIST_LIMIT, 0))
            .await?;
        if docs.is_empty() {
            return Ok(Outcome::text("No documents uploaded yet."));
        }
        let mut reply = String::from("Available documents:\n");
        for (i, d) in docs.iter().enumerate() {
            reply.push_str(&format!(
                "{}. {} ({}, {}) {}\n",
                i + 1,
                d.filename,
                d.category,
                d.vector_status,
                d.id
            ));
        }
        let mut outcome = Outcome::text(reply.trim_end());
        outcome.documents = docs;
        Ok(outcome)
    }

    async fn run_search(&self, principal: &Principal, message: &str) -> Result<Outcome> {
        let terms = search_terms(message);
        if terms.is_empty() {
            return Ok(Outcome::text("What should I search for?"));
        }
        let results = self
            .search
            .search(principal, &terms, self.search.default_mode(), None, &[])
            .await?;
        if results.is_empty() {
            return Ok(Outcome::text(format!("No documents match \"{terms}\".")));
        }
        let mut reply = format!("Documents matching \"{terms}\":\n");
        for (i, r) in results.iter().enumerate() {
            reply.push_str(&format!(
                "{}. {} (score {:.2}) {}\n",
                i + 1,
                r.filename,
                r.score,
                r.document_id
            ));
        }
        let mut outcome = Outcome::text(reply.trim_end());
        outcome.metadata = serde_json::json!({
            "query": terms,
            "search_results": results.iter().map(|r| &r.document_id).collect::<Vec<_>>(),
        });
        outcome.search_results = results;
        Ok(outcome)
    }

    async fn general(
        &self,
        message: &str,
        history: &[ChatTurn],
        selected: &[Document],
    ) -> Result<Outcome> {
        if !self.model.is_enabled() {
            return Ok(Outcome::text(
                "General questions need a completion provider. Try \"list files\", \
\"search for <terms>\" or \"generate report\".",
            ));
        }
        let mut prompt = String::from(
            "You are a helpful financial report assistant and certified public accountant. \
Keep answers concise. If the user wants a report, tell them to say \"generate report\".\n\n",
        );
        if selected.is_empty() {
            prompt.push_str("No files are selected.\n\n");
        } else {
            let names: Vec<&str> = selected.iter().map(|d| d.filename.as_str()).collect();
            prompt.push_str(&format!("Selected files: {}\n\n", names.join(", ")));
        }
        let start = history.len().saturating_sub(HISTORY_TURNS);
        for turn in &history[start..] {
            prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
        }
        prompt.push_str(&format!("user: {message}\nassistant:"));

        let answer = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| Error::transient("completion", e))?;
        Ok(Outcome::text(answer.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_intent() {
        assert_eq!(detect_intent("Please generate report"), Intent::Report);
        assert_eq!(detect_intent("executive summary please"), Intent::Report);
        assert_eq!(detect_intent("can you analyze this"), Intent::Analysis);
        assert_eq!(detect_intent("list files"), Intent::ListFiles);
        assert_eq!(detect_intent("search for revenue"), Intent::Search);
        assert_eq!(detect_intent("help"), Intent::Help);
        assert_eq!(detect_intent("what is EBITDA?"), Intent::General);
        assert_eq!(detect_intent("I found it helpful"), Intent::General);
    }

    #[test]
    fn test_template_from_message() {
        assert_eq!(template_from_message("executive summary"), Template::Executive);
        assert_eq!(template_from_message("report, tables only"), Template::Tables);
        assert_eq!(template_from_message("generate report"), Template::Comprehensive);
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(search_terms("Search for \"cash flow\""), "cash flow");
        assert_eq!(search_terms("please find revenue 2024?"), "revenue 2024");
    }

    #[test]
    fn test_referenced_ids() {
        let id = "3f2b8c1e-9d4a-4e6f-8b7a-1c2d3e4f5a6b";
        let msg = format!("use {id}, and {id} again");
        assert_eq!(referenced_ids(&msg), vec![id.to_string()]);
        assert!(referenced_ids("no ids here").is_empty());
    }
}
