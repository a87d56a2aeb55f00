use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::BoxError,
    history::ChatHistory,
    types::{ChatMessage, CompletionRequest},
    LLMError, LLMProvider,
};

/// The conversational system being evaluated.
///
/// `run` receives each simulated-user message in turn and returns the messages the agent
/// produced in reply. A leading system message and then a leading user message in the
/// reply are treated as echoed framing and dropped from the transcript.
#[async_trait]
pub trait Agent: Send {
    async fn run(&mut self, message: &str) -> Result<Vec<ChatMessage>, BoxError>;
}

/// Agent under test driven by a chat-completion provider with fixed instructions.
pub struct PromptAgent {
    name: String,
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    history: ChatHistory,
}

impl fmt::Debug for PromptAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptAgent")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl PromptAgent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Self {
        let mut history = ChatHistory::new();
        history.push(ChatMessage::system(instructions));

        Self {
            name: name.into(),
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            history,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.history.messages()
    }

    async fn reply(&mut self, message: &str) -> Result<ChatMessage, LLMError> {
        let mut messages = self.history.snapshot();
        messages.push(ChatMessage::user(message));

        let mut request = CompletionRequest::new(self.model.clone(), messages);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.provider.complete(request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LLMError::InvalidResponse("response did not contain any content"))?;

        // History only records completed exchanges.
        let reply = ChatMessage::assistant(content).with_name(self.name.clone());
        self.history.push_user(message);
        self.history.push(reply.clone());
        Ok(reply)
    }
}

#[async_trait]
impl Agent for PromptAgent {
    async fn run(&mut self, message: &str) -> Result<Vec<ChatMessage>, BoxError> {
        let reply = self.reply(message).await?;
        Ok(vec![reply])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{providers::scripted::ScriptedProvider, types::MessageRole};

    #[tokio::test]
    async fn keeps_its_own_history_across_turns() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_text("what kind of dish?")
                .with_text("try a lentil curry"),
        );
        let mut agent = PromptAgent::new(
            "recipes",
            "You are a vegetarian recipe agent.",
            provider.clone(),
            "model",
        )
        .with_temperature(0.2);

        let first = agent.run("dinner idea").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].role, MessageRole::Assistant);
        assert_eq!(first[0].text(), Some("what kind of dish?"));

        agent.run("something warm").await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].temperature, Some(0.2));
        let roles: Vec<MessageRole> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
            ]
        );
        assert_eq!(agent.history().len(), 5);
    }

    #[tokio::test]
    async fn provider_failures_surface_as_errors() {
        let provider = Arc::new(ScriptedProvider::new().with_error("quota exceeded"));
        let mut agent = PromptAgent::new("a", "be helpful", provider, "model");

        let error = agent.run("hi").await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<LLMError>(),
            Some(LLMError::Provider(message)) if message == "quota exceeded"
        ));
    }

    #[tokio::test]
    async fn failed_turns_leave_no_trace_in_history() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_error("temporarily unavailable")
                .with_text("hello again"),
        );
        let mut agent = PromptAgent::new("a", "be helpful", provider.clone(), "model");

        assert!(agent.run("first try").await.is_err());
        assert_eq!(agent.history().len(), 1);

        agent.run("second try").await.unwrap();
        let contents: Vec<Option<&str>> = agent.history().iter().map(|m| m.text()).collect();
        assert_eq!(
            contents,
            vec![Some("be helpful"), Some("second try"), Some("hello again")]
        );
        assert_eq!(provider.requests()[1].messages.len(), 2);
    }
}
