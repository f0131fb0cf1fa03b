//! Base provider trait and common types for Chatloom
//!
//! This module defines the Provider trait that all completion backends
//! implement, along with the message, tool-call, and usage types shared
//! between the orchestrator and the wire format.

use crate::config::ResolvedModel;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message structure for conversation
///
/// Represents one message exchanged with the provider. Messages can be
/// from the user, assistant, system, or a tool result. The optional
/// fields follow the OpenAI chat-completions shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    /// Content of the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Optional reasoning side-channel some providers emit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Optional display name (used for user messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional tool calls attached to an assistant message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID this message answers (tool messages only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use chatloom::providers::Message;
    ///
    /// let msg = Message::user("Hello!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            reasoning_content: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new user message carrying the sender's display name
    pub fn named_user(content: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::user(content)
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            reasoning_content: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            reasoning_content: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a tool result message answering `tool_call_id`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatloom::providers::Message;
    ///
    /// let msg = Message::tool_result("call_123", r#"{"ok":true,"data":42}"#);
    /// assert_eq!(msg.role, "tool");
    /// assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    /// ```
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            reasoning_content: None,
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Creates an assistant message carrying tool calls and optional content
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            reasoning_content: None,
            name: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }
}

/// Function call information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    /// Name of the tool to call
    pub name: String,
    /// Arguments for the tool (JSON-encoded string)
    pub arguments: String,
}

/// Tool call structure
///
/// Represents a request from the provider to execute a tool with
/// specific arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Function call details
    pub function: FunctionCall,
}

/// Token usage information from a completion, as reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Number of tokens in the completion
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens used (prompt + completion)
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use chatloom::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One fully resolved completion request
///
/// Carries the router-resolved model parameters together with the message
/// history and the advertised tool set. An empty `tools` vector means the
/// provider must not be sent a tool list at all.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Router-resolved model parameters (endpoint, key, prompt, extras)
    pub model: ResolvedModel,
    /// Conversation history, oldest first, without a system message
    pub messages: Vec<Message>,
    /// Advertised tool schemas in `{"type":"function","function":{..}}` shape
    pub tools: Vec<serde_json::Value>,
    /// End-user display name forwarded to the provider, if known
    pub user: Option<String>,
}

impl CompletionRequest {
    /// Builds a single-shot request with one user message and no tools
    ///
    /// Used for auxiliary calls such as topic summarization.
    pub fn single(model: ResolvedModel, prompt: impl Into<String>) -> Self {
        Self {
            model,
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            user: None,
        }
    }
}

/// Completion response with message and optional token usage
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The response message from the provider
    pub message: Message,
    /// Optional token usage information
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// Create a new CompletionResponse without usage data
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    /// Create a new CompletionResponse with token usage
    pub fn with_usage(message: Message, usage: TokenUsage) -> Self {
        Self {
            message,
            usage: Some(usage),
        }
    }

    /// Total tokens reported for this completion, zero when absent
    pub fn total_tokens(&self) -> u64 {
        self.usage.map(|u| u.total_tokens).unwrap_or(0)
    }
}

/// Provider trait for completion backends
///
/// The orchestrator talks to exactly one provider at a time; the instance
/// is process-wide and swapped atomically on configuration reload, so
/// in-flight calls finish on the old instance.
///
/// # Examples
///
/// ```no_run
/// use chatloom::providers::{CompletionRequest, CompletionResponse, Message, Provider};
/// use chatloom::error::Result;
/// use async_trait::async_trait;
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl Provider for MyProvider {
///     async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
///         Ok(CompletionResponse::new(Message::assistant("Response")))
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Completes a conversation with the given request
    ///
    /// # Errors
    ///
    /// Returns `ChatloomError::Provider` (or a transport error) if the
    /// API call fails or the response is malformed.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
