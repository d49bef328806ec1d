//! Completion model trait.
//!
//! A completion model turns a prompt into free-form text. The analysis
//! extractor and the chat handler depend only on this trait; HTTP-backed
//! implementations live in the app crate.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Model identifier, recorded in logs.
    fn name(&self) -> &str;
    /// `false` for the disabled provider.
    fn is_enabled(&self) -> bool {
        true
    }
    async fn complete(&self, prompt: &str) -> Result<String>;
}
