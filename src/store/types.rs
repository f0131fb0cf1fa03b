//! Persisted entity types for the session store

use crate::providers::{Message, ToolCall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a persisted context entry
///
/// The `system` role is synthesized at read time from router configuration
/// and never persisted, so it is deliberately absent here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// A user utterance
    User,
    /// A provider reply (text, tool calls, or both)
    Assistant,
    /// A tool result answering one tool call
    Tool,
}

impl Role {
    /// Wire/storage name of this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parses a stored role name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One conversation thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique identifier, generated on creation, immutable
    pub session_id: String,
    /// Owner identity
    pub user_id: String,
    /// Short human-readable label
    pub topic: String,
    /// At most one session per user is active at any committed point
    pub is_active: bool,
    /// Running token counter, monotonically non-decreasing
    pub total_tokens: i64,
    /// Creation timestamp, set once
    pub created_at: DateTime<Utc>,
}

/// One persisted message belonging to a session
///
/// Append-only; insertion order is the conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Message role
    pub role: Role,
    /// Message text; may be empty for assistant entries that only carry tool calls
    pub content: String,
    /// Optional reasoning side-channel some providers emit
    pub reasoning_content: Option<String>,
    /// Optional display name (user entries)
    pub name: Option<String>,
    /// Tool-call requests attached to an assistant entry
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool-call id this entry answers (tool entries only)
    pub tool_call_id: Option<String>,
}

impl ContextEntry {
    /// Creates a user entry
    pub fn user(content: impl Into<String>, name: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            reasoning_content: None,
            name,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates an assistant entry
    pub fn assistant(
        content: impl Into<String>,
        reasoning_content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning_content,
            name: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Creates a tool entry answering `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            reasoning_content: None,
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Converts the entry into the provider message shape
    ///
    /// Fields irrelevant to the role are dropped, matching what providers
    /// accept: a user entry keeps its display name, an assistant entry its
    /// reasoning and tool calls, a tool entry its tool_call_id.
    pub fn to_message(&self) -> Message {
        match self.role {
            Role::User => Message {
                role: "user".to_string(),
                content: Some(self.content.clone()),
                reasoning_content: None,
                name: self.name.clone(),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant => Message {
                role: "assistant".to_string(),
                content: Some(self.content.clone()),
                reasoning_content: self.reasoning_content.clone(),
                name: None,
                tool_calls: self.tool_calls.clone(),
                tool_call_id: None,
            },
            Role::Tool => Message {
                role: "tool".to_string(),
                content: Some(self.content.clone()),
                reasoning_content: None,
                name: None,
                tool_calls: None,
                tool_call_id: self.tool_call_id.clone(),
            },
        }
    }
}

/// Summary of a user's active session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The active session
    pub session: Session,
    /// Count of persisted user and assistant entries (tool traffic excluded)
    pub message_count: usize,
}
