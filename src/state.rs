//! UI-agnostic conversation state types
//!
//! These are the values the chat session hands to whatever front end is
//! rendering the conversation. Front ends only ever see snapshots.

use serde::{Deserialize, Serialize};

/// A chat message in the assistant conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Unix time in milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub kind: MessageKind,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// How a message should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    /// A notice that the assistant ran backend tools. Never appended to.
    ToolNotice,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp,
            kind: MessageKind::Text,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp,
            kind: MessageKind::Text,
        }
    }

    pub fn tool_notice(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp,
            kind: MessageKind::ToolNotice,
        }
    }

    pub fn is_tool_notice(&self) -> bool {
        self.kind == MessageKind::ToolNotice
    }
}

/// Timestamp for the next message appended to `transcript`.
///
/// Wall clocks can step backwards; transcript order must not.
pub fn next_timestamp(transcript: &[ChatMessage]) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    match transcript.last() {
        Some(last) if last.timestamp > now => last.timestamp,
        _ => now,
    }
}
