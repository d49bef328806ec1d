//! # finreport
//!
//! Upload financial spreadsheets and documents, search them, and turn them
//! into balance sheet, income statement and cash flow reports with an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  Upload  │──▶│   Pipeline   │──▶│ SQLite + blobs  │
//! │ CLI/HTTP │   │ Extract+Embed│   │ docs, chunks    │
//! └──────────┘   └──────────────┘   └────────┬────────┘
//!                                            │
//!              ┌───────────────┬─────────────┤
//!              ▼               ▼             ▼
//!        ┌──────────┐   ┌────────────┐  ┌──────────┐
//!        │  Search  │   │  Reports   │  │   Chat   │
//!        │ hybrid   │   │ LLM+render │  │ intents  │
//!        └──────────┘   └────────────┘  └──────────┘
//! ```
//!
//! Pure logic (grid analysis, chunking, scoring, rendering, the storage
//! traits) lives in `finreport-core`; this crate supplies the SQLite and
//! filesystem backends, HTTP providers, background workers and the
//! CLI/HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite document, vector, report and session stores |
//! | [`blob_fs`] | Filesystem blob store |
//! | [`http`] | Shared HTTP client and retrying JSON POST |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Completion providers |
//! | [`extract`] | Spreadsheet, CSV, PDF and text extraction |
//! | [`retry`] | Bounded retry with backoff |
//! | [`registry`] | Document lifecycle, locks and deletion |
//! | [`ingest`] | Upload and background indexing |
//! | [`search`] | Principal-scoped search and selection |
//! | [`reports`] | Report job orchestration |
//! | [`sessions`] | Chat session state |
//! | [`chat`] | Intent detection and chat replies |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP API |

pub mod app;
pub mod blob_fs;
pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod reports;
pub mod retry;
pub mod search;
pub mod server;
pub mod sessions;
pub mod sqlite_store;
