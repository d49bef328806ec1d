//! Shared fixtures for integration tests: deterministic providers and an
//! in-memory service graph.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

use finreport::app::{Collaborators, Services};
use finreport::config::{parse_config, Config};
use finreport_core::completion::CompletionModel;
use finreport_core::embedding::EmbeddingProvider;

pub const DIMS: usize = 64;

/// A model answer with all three statements.
pub const MODEL_RESPONSE: &str = "\
Liquidity improved and revenue grew year over year.

#### Balance Sheet Table
| Indicator | Current Year | Previous Year |
|---|---|---|
| Total Assets | 1,200,000 | 1,000,000 |
| Total Liabilities | 400,000 | 450,000 |

#### Income Statement Table
| Net Revenue | 5,000,000 | 4,200,000 |
| Net Profit After Tax | (120,000) | 80,000 |

#### Cash Flow Statement Table
| Net Cash Flow from Operating Activities | 300,000 | 250,000 |
";

/// Bag-of-words vectors: each lowercase word bumps one hashed dimension.
pub struct HashEmbedder;

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let h = word
            .to_lowercase()
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

pub struct NoEmbeddings;

#[async_trait]
impl EmbeddingProvider for NoEmbeddings {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embeddings are disabled")
    }
}

/// Completion model returning a fixed answer. Optionally waits on a gate
/// and fails a number of calls first.
pub struct ScriptedModel {
    response: String,
    failures: AtomicUsize,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            gate: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.failures = AtomicUsize::new(n);
        self
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("model overloaded");
        }
        Ok(self.response.clone())
    }
}

pub struct NoModel;

#[async_trait]
impl CompletionModel for NoModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("completion is disabled")
    }
}

/// Config rooted in `tmp` with fast retries.
pub fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path().display();
    parse_config(&format!(
        r#"
[db]
path = "{root}/data/finreport.sqlite"

[blobs]
root = "{root}/data/blobs"

[chunking]
max_tokens = 120

[ingest]
backoff_ms = 1

[reports]
backoff_ms = 1
"#
    ))
    .unwrap()
}

pub fn in_memory_services(
    tmp: &TempDir,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn CompletionModel>,
) -> Services {
    Services::new(&test_config(tmp), Collaborators::in_memory(embedder, model))
}

/// Balance sheet export with four title rows above the `Code` header.
pub fn balance_sheet_csv() -> Vec<u8> {
    "\
Acme Holdings Ltd
Consolidated Balance Sheet
Unit: CNY
,,,
Item,Code,2023,2024
Cash and Cash Equivalents,1001,\"350,000\",\"420,000\"
Accounts Receivable,1122,\"210,000\",\"190,000\"
Total Assets,1999,\"1,000,000\",\"1,200,000\"
Total Liabilities,2999,\"450,000\",\"400,000\"
"
    .as_bytes()
    .to_vec()
}

pub fn text_note() -> Vec<u8> {
    b"Quarterly commentary. Operating cash flow was strong and inventory turnover improved."
        .to_vec()
}
