//! Completion providers for statement extraction and chat.
//!
//! | Config value | Provider | Endpoint |
//! |--------------|----------|----------|
//! | `"disabled"` | [`DisabledCompletion`] | none |
//! | `"openai"` | [`OpenAICompletion`] | `POST {url}/v1/chat/completions` |
//! | `"ollama"` | [`OllamaCompletion`] | `POST {url}/api/generate` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use finreport_core::completion::CompletionModel;

use crate::config::CompletionConfig;
use crate::http;

/// Completion retries are fixed; report jobs add their own retry loop on top.
const MAX_RETRIES: u32 = 2;

pub struct DisabledCompletion;

#[async_trait]
impl CompletionModel for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

pub struct OpenAICompletion {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: http::openai_key()?,
            temperature: config.temperature,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAICompletion {
    fn name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            MAX_RETRIES,
            "OpenAI",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

pub struct OllamaCompletion {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaCompletion {
    fn name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            MAX_RETRIES,
            "Ollama",
        )
        .await?;
        json.get("response")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

fn required_model(config: &CompletionConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("completion.model required for {}", config.provider))
}

pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaCompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
