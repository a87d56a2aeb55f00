use async_trait::async_trait;

use crate::types::{CompletionRequest, CompletionResponse};
use crate::LLMError;

pub mod openai;
pub mod scripted;

/// A chat-completion backend. Implementations must keep message order and tool-call
/// structure intact, and report transport failures as errors rather than as empty
/// responses.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    fn name(&self) -> &'static str;
}
