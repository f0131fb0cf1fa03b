//! OpenAI-compatible chat-completions provider
//!
//! Talks to any endpoint implementing the OpenAI `/chat/completions`
//! wire format. All connection parameters (base URL, key, system prompt,
//! extra payload fields) come from the router-resolved model carried in
//! each request, so one client instance serves every configured model.

use crate::error::{ChatloomError, Result};
use crate::providers::base::{
    CompletionRequest, CompletionResponse, Message, Provider, TokenUsage, ToolCall,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Default request timeout for completion calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible provider
pub struct OpenAiProvider {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl OpenAiProvider {
    /// Creates a new provider with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns `ChatloomError::Provider` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ChatloomError::Provider(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Builds the JSON payload for one completion call
    ///
    /// The resolved model's system prompt, when non-empty, is prepended as
    /// a synthesized system message; it is never part of the persisted
    /// history. Model `extra` parameters are merged in last but cannot
    /// displace the reserved keys.
    fn build_payload(request: &CompletionRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::with_capacity(request.messages.len() + 1);
        if !request.model.prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.model.prompt,
            }));
        }
        for message in &request.messages {
            messages.push(serde_json::json!(message));
        }

        let mut payload = serde_json::Map::new();
        for (key, value) in &request.model.extra {
            payload.insert(key.clone(), value.clone());
        }
        payload.insert("model".to_string(), serde_json::json!(request.model.name));
        payload.insert("messages".to_string(), serde_json::json!(messages));
        payload.insert("stream".to_string(), serde_json::json!(false));

        // Some endpoints reject an empty tool list; omit the keys entirely.
        if !request.tools.is_empty() {
            payload.insert("tools".to_string(), serde_json::json!(request.tools));
            payload.insert("tool_choice".to_string(), serde_json::json!("auto"));
        }

        if let Some(user) = &request.user {
            payload.insert("user".to_string(), serde_json::json!(user));
        }

        serde_json::Value::Object(payload)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", request.model.base_url.trim_end_matches('/'));
        let payload = Self::build_payload(&request);

        debug!(
            model = %request.model.name,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let mut http_request = self.client.post(&url).json(&payload);
        if let Some(key) = &request.model.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| {
            error!("Completion request failed: {}", e);
            ChatloomError::Provider(format!("Completion request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Provider returned error {}: {}", status, error_text);
            return Err(ChatloomError::Provider(format!(
                "Provider returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse completion response: {}", e);
            ChatloomError::Provider(format!("Failed to parse completion response: {}", e))
        })?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ChatloomError::Provider("Completion response contained no choices".to_string())
        })?;

        let message = Message {
            role: "assistant".to_string(),
            content: choice.message.content,
            reasoning_content: choice.message.reasoning_content,
            name: None,
            tool_calls: choice.message.tool_calls.filter(|calls| !calls.is_empty()),
            tool_call_id: None,
        };

        Ok(match completion.usage {
            Some(usage) => CompletionResponse::with_usage(message, usage),
            None => CompletionResponse::new(message),
        })
    }
}
