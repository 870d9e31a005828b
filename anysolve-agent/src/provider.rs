//! Agent provider abstraction
//!
//! Works with OpenAI-compatible chat endpoints (OpenAI, vLLM, Ollama, and
//! local bridges). Providers return raw text; JSON extraction and schema
//! checks live in the client layer.

use anysolve_error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// ============================================================================
// Messages
// ============================================================================

/// Message role in a chat exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// A backend that completes chat transcripts.
///
/// Uses native async fns; implementors are called from a single orchestration
/// task, so object safety is not required here.
#[allow(async_fn_in_trait)]
pub trait AgentProvider {
    /// Provider name, used in error context and logs
    fn name(&self) -> &str;

    /// Complete the transcript and return the assistant text
    async fn call(&self, messages: &[ChatMessage]) -> Result<String>;
}

// ============================================================================
// HTTP provider
// ============================================================================

/// Configuration for [`HttpProvider`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:11434/v1`
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: None,
            timeout_secs: None,
        }
    }
}

/// OpenAI-compatible chat completion provider
pub struct HttpProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                Error::agent_failed("http", "failed to build http client")
                    .with_operation("provider::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn default_model(&self) -> &str {
        self.config.model.as_deref().unwrap_or("gpt-4o-mini")
    }
}

impl AgentProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn call(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_request = ApiRequest {
            model: self.default_model().to_string(),
            messages: messages.to_vec(),
            temperature: Some(0.0),
            stream: Some(false),
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        let response = req.send().await.map_err(|e| {
            Error::new(anysolve_error::ErrorKind::NetworkFailed, e.to_string())
                .with_operation("provider::call")
                .with_context("url", self.config.base_url.clone())
                .set_source(e)
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = Error::agent_failed("http", text)
                .with_operation("provider::call")
                .with_context("status", status.to_string());
            // 429 and 5xx are worth retrying; auth and bad requests are not
            return Err(if status == 429 || status >= 500 {
                err.temporary()
            } else {
                err.permanent()
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            Error::parse_failed("<response body>", e.to_string())
                .with_operation("provider::call")
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::agent_failed("http", "no choices in response")
                    .with_operation("provider::call")
            })?;

        choice.message.content.ok_or_else(|| {
            Error::agent_failed("http", "empty completion")
                .with_operation("provider::call")
                .temporary()
        })
    }
}

// ============================================================================
// API types (OpenAI-compatible subset)
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

// ============================================================================
// Static provider (tests and offline runs)
// ============================================================================

/// A provider that replays a fixed queue of responses.
pub struct StaticProvider {
    responses: Mutex<Vec<String>>,
    /// Transcripts of every call made, newest last
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StaticProvider {
    /// Responses are popped front-to-back, one per call.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        match self.calls.lock() {
            Ok(calls) => calls.len(),
            Err(_) => 0,
        }
    }

    /// Transcript of the call at `index`, if it happened
    pub fn call_at(&self, index: usize) -> Option<Vec<ChatMessage>> {
        self.calls.lock().ok().and_then(|calls| calls.get(index).cloned())
    }
}

impl AgentProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn call(&self, messages: &[ChatMessage]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let mut responses = self.responses.lock().map_err(|_| {
            Error::unexpected("static provider mutex poisoned")
                .with_operation("provider::call")
        })?;
        if responses.is_empty() {
            return Err(Error::agent_failed("static", "response queue exhausted")
                .with_operation("provider::call")
                .permanent());
        }
        Ok(responses.remove(0))
    }
}

// ============================================================================
// Fence stripping
// ============================================================================

/// Extract the JSON payload from agent output, handling markdown fences.
pub fn strip_fences(content: &str) -> &str {
    if content.contains("```json") {
        content
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .unwrap_or(content)
    } else if content.contains("```") {
        content
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .unwrap_or(content)
    } else {
        content.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_json_block() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(strip_fences(content), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_bare_block() {
        let content = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_fences(content), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_no_fence() {
        assert_eq!(strip_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_static_provider_replays_in_order() {
        let provider = StaticProvider::new(vec!["first", "second"]);
        let msgs = vec![ChatMessage::user("hi")];

        tokio_test::block_on(async {
            assert_eq!(provider.call(&msgs).await.unwrap(), "first");
            assert_eq!(provider.call(&msgs).await.unwrap(), "second");
            assert!(provider.call(&msgs).await.is_err());
        });
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("be brief");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "be brief");
    }
}
