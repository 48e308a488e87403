//! Inbound message and content value objects.
//!
//! A `Message` is produced by a channel adapter and never mutated by the
//! engine: Channel receives it → Runtime runs one turn → Actions answer
//! through the response sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file or link attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The payload of a message or of an outbound response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// The text content
    #[serde(default)]
    pub text: String,

    /// Model rationale attached to a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,

    /// Names of actions that produced (or were requested by) this content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Originating channel (e.g. "discord", "cli")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }
}

/// A single inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// The entity (user, agent, bot) that sent this message
    pub entity_id: String,

    /// The room (channel, DM, thread) the message belongs to
    pub room_id: String,

    pub content: Content,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new text message from `entity_id` in `room_id`.
    pub fn new(
        entity_id: impl Into<String>,
        room_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            room_id: room_id.into(),
            content: Content::text(text),
            timestamp: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }

    pub fn text(&self) -> &str {
        &self.content.text
    }

    /// A short single-line preview for logs and event payloads.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .content
            .text
            .chars()
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        if flat.chars().count() <= max_chars {
            flat
        } else {
            let cut: String = flat.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_has_unique_id() {
        let a = Message::new("user-1", "room-1", "hi");
        let b = Message::new("user-1", "room-1", "hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.text(), "hi");
    }

    #[test]
    fn preview_truncates_and_flattens() {
        let msg = Message::new("u", "r", "line one\nline two is long");
        assert_eq!(msg.preview(8), "line one…");
        assert_eq!(msg.preview(100), "line one line two is long");
    }

    #[test]
    fn content_serde_skips_empty_fields() {
        let json = serde_json::to_value(Content::text("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hello"}));
    }
}
