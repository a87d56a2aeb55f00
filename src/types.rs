use serde::{Deserialize, Deserializer, Serialize};

use crate::functions::{Tool, ToolCall, ToolChoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Developer,
}

impl MessageRole {
    /// The role as seen by the opposite conversational party. Only the two
    /// dialogue roles trade places; instruction roles stay put.
    pub fn inverted(self) -> Self {
        match self {
            MessageRole::User => MessageRole::Assistant,
            MessageRole::Assistant => MessageRole::User,
            MessageRole::System => MessageRole::System,
            MessageRole::Developer => MessageRole::Developer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

// OpenAI-compatible backends send `"tool_calls": null` on plain replies.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ToolCall>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Developer, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = Tool>,
    {
        self.tools.extend(tools);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl CompletionChoice {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            finish_reason: None,
        }
    }
}

/// Provider output. Zero choices is a valid response here; callers decide whether
/// that is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn from_message(message: ChatMessage) -> Self {
        Self {
            choices: vec![CompletionChoice::new(message)],
            usage: None,
        }
    }

    pub fn first_choice(&self) -> Option<&CompletionChoice> {
        self.choices.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inversion_swaps_dialogue_roles_only() {
        assert_eq!(MessageRole::User.inverted(), MessageRole::Assistant);
        assert_eq!(MessageRole::Assistant.inverted(), MessageRole::User);
        assert_eq!(MessageRole::System.inverted(), MessageRole::System);
        assert_eq!(MessageRole::Developer.inverted(), MessageRole::Developer);

        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Developer,
        ] {
            assert_eq!(role.inverted().inverted(), role);
        }
    }

    #[test]
    fn roles_serialize_lowercase() {
        let message = ChatMessage::developer("be brief");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "developer");
        assert_eq!(value["content"], "be brief");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn null_content_deserializes_to_none() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":null}"#).unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.text().is_none());
    }

    #[test]
    fn null_tool_calls_deserialize_to_empty() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hi","tool_calls":null}"#)
                .unwrap();
        assert_eq!(message.text(), Some("hi"));
        assert!(!message.has_tool_calls());
    }
}
