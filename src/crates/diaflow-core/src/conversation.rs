//! Persons, messages, and conversation history
//!
//! A *person* is a named LLM persona with its own configuration and an
//! append-only [`Conversation`]. The [`ConversationManager`] is the single
//! writer of message history per person: appends are atomic and reads return
//! filtered views, so forgetting never destroys the underlying log.
//!
//! Per-person serialization: each conversation sits behind its own lock, so
//! two person-job nodes for different persons may write concurrently while
//! writes for one person are ordered.

use crate::memory::{apply_forget, ForgetMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Person identifier.
pub type PersonId = String;

/// Sender used for messages originating from the engine itself.
pub const SYSTEM_SENDER: &str = "system";

/// Direction of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// One persona talking to another
    PersonToPerson,
    /// Engine or user prompt delivered to a persona
    SystemToPerson,
    /// Persona reply surfaced back to the engine
    PersonToSystem,
}

/// One entry in a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender person id, or [`SYSTEM_SENDER`]
    pub from_person_id: PersonId,
    /// Recipient person id, or [`SYSTEM_SENDER`]
    pub to_person_id: PersonId,
    /// Message body
    pub content: String,
    /// Direction of the message
    pub message_type: MessageType,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Token count attributed to this message, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
}

impl Message {
    /// Build a user-style message addressed to a person.
    pub fn to_person(person: impl Into<PersonId>, content: impl Into<String>) -> Self {
        Self {
            from_person_id: SYSTEM_SENDER.to_string(),
            to_person_id: person.into(),
            content: content.into(),
            message_type: MessageType::SystemToPerson,
            timestamp: Utc::now(),
            token_count: None,
        }
    }

    /// Build an assistant-style reply from a person.
    pub fn from_person(person: impl Into<PersonId>, content: impl Into<String>) -> Self {
        Self {
            from_person_id: person.into(),
            to_person_id: SYSTEM_SENDER.to_string(),
            content: content.into(),
            message_type: MessageType::PersonToSystem,
            timestamp: Utc::now(),
            token_count: None,
        }
    }

    /// Chat role of this message from the owning person's point of view.
    pub fn role(&self) -> &'static str {
        match self.message_type {
            MessageType::PersonToSystem | MessageType::PersonToPerson => "assistant",
            MessageType::SystemToPerson => "user",
        }
    }

    /// Render as a `{role, content}` object for LLM payloads and templates.
    pub fn to_chat_value(&self) -> Value {
        json!({"role": self.role(), "content": self.content})
    }
}

/// LLM configuration attached to a person.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonConfig {
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Provider name, e.g. `openai`
    #[serde(default)]
    pub service: Option<String>,
    /// Model name
    #[serde(default)]
    pub model: Option<String>,
    /// Key id resolved through the run's api-key map
    #[serde(default)]
    pub api_key_id: Option<String>,
    /// System prompt prepended to every call
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Forgetting policy for the person's own history
    #[serde(default)]
    pub forget_mode: Option<ForgetMode>,
}

/// Append-only message log owned by one person.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Append a message. Messages are never removed.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in append order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the log.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the log as a `{messages: [...]}` conversation-state value.
    pub fn to_state_value(&self) -> Value {
        let messages: Vec<Value> = self.messages.iter().map(Message::to_chat_value).collect();
        json!({ "messages": messages })
    }
}

/// Single writer of conversation history, shared by the scheduler and the
/// person-job handler.
#[derive(Default)]
pub struct ConversationManager {
    conversations: RwLock<HashMap<PersonId, Arc<Mutex<Conversation>>>>,
}

impl ConversationManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    async fn conversation_for(&self, person: &str) -> Arc<Mutex<Conversation>> {
        if let Some(conv) = self.conversations.read().await.get(person) {
            return conv.clone();
        }
        let mut guard = self.conversations.write().await;
        guard
            .entry(person.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::default())))
            .clone()
    }

    /// Atomically append one message to a person's log.
    pub async fn append(&self, person: &str, message: Message) {
        let conv = self.conversation_for(person).await;
        conv.lock().await.push(message);
    }

    /// Atomically append a user/assistant exchange to a person's log.
    pub async fn append_exchange(&self, person: &str, user: Message, assistant: Message) {
        let conv = self.conversation_for(person).await;
        let mut guard = conv.lock().await;
        guard.push(user);
        guard.push(assistant);
    }

    /// Full history snapshot for a person.
    pub async fn history(&self, person: &str) -> Vec<Message> {
        let conv = self.conversation_for(person).await;
        let guard = conv.lock().await;
        guard.messages().to_vec()
    }

    /// Filtered view of a person's own history under a forget mode.
    ///
    /// Forgetting applies only here, to history loaded from this manager.
    /// Inputs arriving through arrows are cross-node data and are never
    /// filtered.
    pub async fn visible_history(
        &self,
        person: &str,
        mode: ForgetMode,
        execution_count: u32,
        memory_config: &Map<String, Value>,
    ) -> Vec<Value> {
        let conv = self.conversation_for(person).await;
        let state = {
            let guard = conv.lock().await;
            guard.to_state_value()
        };
        let filtered = apply_forget(mode, state, execution_count, memory_config);
        match filtered {
            Value::Object(map) => match map.get("messages") {
                Some(Value::Array(messages)) => messages.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Total message count across all persons.
    pub async fn total_messages(&self) -> usize {
        let guard = self.conversations.read().await;
        let mut total = 0;
        for conv in guard.values() {
            total += conv.lock().await.len();
        }
        total
    }
}
