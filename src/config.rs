//! TOML configuration.
//!
//! Every section except `[db]` and `[blobs]` has defaults, so a minimal
//! config is:
//!
//! ```toml
//! [db]
//! path = "./data/finreport.sqlite"
//!
//! [blobs]
//! root = "./data/blobs"
//! ```
//!
//! API keys are never read from the file; OpenAI providers use the
//! `OPENAI_API_KEY` environment variable.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use finreport_core::models::Template;
use finreport_core::search::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobsConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            tie_epsilon: default_tie_epsilon(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            semantic_weight: self.semantic_weight,
            keyword_weight: self.keyword_weight,
            candidate_k: self.candidate_k,
            tie_epsilon: self.tie_epsilon,
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    12
}
fn default_tie_epsilon() -> f64 {
    0.02
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            max_prompt_tokens: default_max_prompt_tokens(),
            timeout_secs: default_completion_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_prompt_tokens() -> usize {
    12_000
}
fn default_completion_timeout() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents indexed at the same time.
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ingest_backoff")]
    pub backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_ingest_backoff(),
        }
    }
}

fn default_ingest_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_ingest_backoff() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportsConfig {
    #[serde(default = "default_reports_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reports_backoff")]
    pub backoff_ms: u64,
    #[serde(default = "default_template")]
    pub default_template: String,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_reports_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_reports_backoff(),
            default_template: default_template(),
        }
    }
}

impl ReportsConfig {
    pub fn template(&self) -> Result<Template> {
        Ok(self.default_template.parse()?)
    }
}

fn default_reports_concurrency() -> usize {
    2
}
fn default_reports_backoff() -> u64 {
    500
}
fn default_template() -> String {
    "comprehensive".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if r.candidate_k < 1 {
        bail!("retrieval.candidate_k must be >= 1");
    }
    for (name, w) in [
        ("semantic_weight", r.semantic_weight),
        ("keyword_weight", r.keyword_weight),
    ] {
        if !(0.0..=1.0).contains(&w) {
            bail!("retrieval.{name} must be in [0.0, 1.0]");
        }
    }
    if !(0.0..1.0).contains(&r.tie_epsilon) {
        bail!("retrieval.tie_epsilon must be in [0.0, 1.0)");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.completion.is_enabled() && config.completion.model.is_none() {
        bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }
    if config.completion.max_prompt_tokens < 256 {
        bail!("completion.max_prompt_tokens must be >= 256");
    }

    if config.ingest.concurrency == 0 || config.reports.concurrency == 0 {
        bail!("ingest.concurrency and reports.concurrency must be > 0");
    }
    if config.ingest.max_attempts == 0 || config.reports.max_attempts == 0 {
        bail!("ingest.max_attempts and reports.max_attempts must be > 0");
    }
    config
        .reports
        .template()
        .with_context(|| "Invalid reports.default_template")?;

    Ok(config)
}
