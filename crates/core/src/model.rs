use anyhow::Result;
use std::sync::Arc;

/// Text-generation model shared by every handler of a run
#[async_trait::async_trait]
pub trait TextModel: Send + Sync {
    /// Model name, for logs
    fn name(&self) -> &str;

    /// Complete a prompt
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Read-only handle passed to every handler invocation
pub type ModelHandle = Arc<dyn TextModel>;
