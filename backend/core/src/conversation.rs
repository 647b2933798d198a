use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single chat message.
///
/// Hooks may push messages without an `id` or `createdAt`; both are filled in
/// on deserialization so every stored message is addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Message metadata key set on a reply once inbound hooks have shaped it at
/// receive time.
pub const INBOUND_SHAPED_KEY: &str = "inboundShaped";

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn mark_inbound_shaped(&mut self) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(INBOUND_SHAPED_KEY.to_string(), Value::Bool(true));
    }

    pub fn is_inbound_shaped(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(INBOUND_SHAPED_KEY))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The unit threaded through every hook stage: message history plus
/// free-form metadata.
///
/// `messages` is required when a conversation is read back from a hook; a
/// hook that drops it has returned something that is not a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self { metadata: Map::new(), messages }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Remove a message by id. Returns whether anything was removed.
    pub fn remove_message(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }
}
