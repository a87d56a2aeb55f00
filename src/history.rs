use crate::types::{ChatMessage, MessageRole};

/// Append-only transcript of a scenario run, in the order messages were exchanged.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn extend<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn count_role(&self, role: MessageRole) -> usize {
        self.messages.iter().filter(|message| message.role == role).count()
    }
}
