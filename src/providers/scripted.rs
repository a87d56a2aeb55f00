use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    functions::{FunctionCall, ToolCall},
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole},
    LLMError,
};

/// Replays queued responses in order and keeps every request it was given.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<CompletionResponse, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: CompletionResponse) -> Self {
        self.push(Ok(response));
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_response(CompletionResponse::from_message(ChatMessage::assistant(text)))
    }

    pub fn with_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        let message = ChatMessage {
            role: MessageRole::Assistant,
            content: None,
            name: None,
            tool_calls: vec![ToolCall::new(FunctionCall::new(name, arguments))],
        };
        self.with_response(CompletionResponse::from_message(message))
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    fn push(&self, entry: Result<CompletionResponse, String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(entry);
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| LLMError::Provider("scripted provider lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(LLMError::Provider(message)),
            None => Err(LLMError::Provider("no more scripted responses".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let provider = ScriptedProvider::new()
            .with_text("first")
            .with_tool_call("finish_test", json!({ "verdict": "success" }))
            .with_error("rate limited");

        let first = provider
            .complete(CompletionRequest::new("m", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(first.first_choice().and_then(|c| c.message.text()), Some("first"));

        let second = provider.complete(CompletionRequest::new("m", vec![])).await.unwrap();
        let call = &second.choices[0].message.tool_calls[0];
        assert_eq!(call.function.name, "finish_test");

        let third = provider.complete(CompletionRequest::new("m", vec![])).await;
        assert!(matches!(third, Err(LLMError::Provider(ref m)) if m == "rate limited"));

        let dry = provider.complete(CompletionRequest::new("m", vec![])).await;
        assert!(matches!(dry, Err(LLMError::Provider(ref m)) if m == "no more scripted responses"));

        let requests = provider.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].messages[0].text(), Some("hi"));
        assert_eq!(provider.remaining(), 0);
    }
}
