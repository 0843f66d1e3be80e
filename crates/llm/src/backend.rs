//! Vendor-agnostic chat completion backend.
//!
//! Grounded on `llm/src/backend.rs::OpenAIBackend` — the one backend
//! in that file with no Ollama KV-cache session state or
//! Devanagari-aware token estimation baggage, since it talks to any
//! OpenAI-compatible chat-completions endpoint (OpenAI itself, Azure
//! OpenAI, vLLM, a local gateway) over a single REST shape.
//! `OllamaBackend`, `ClaudeBackend`, `speculative.rs` (SLM racing) and
//! `adapter.rs` have no counterpart in this agent and were dropped
//! rather than genericized.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::Message;
use crate::LlmError;

/// Connection settings for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: std::time::Duration,
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 512,
            temperature: 0.3,
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub finish_reason: FinishReason,
    pub total_time_ms: u64,
}

/// A chat completion backend, implemented once per vendor.
///
/// `voice-agent-agent`'s `DialogProcessor` depends on this trait, never
/// on a concrete backend, so the vendor behind the main dialog LLM and
/// the background extractor can differ — each carries its own
/// independently-keyed credentials.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Stream response text as it arrives; `tx` receives incremental
    /// chunks (not cumulative). Returns the same summary a non-streamed
    /// call would once the stream ends.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    fn model_name(&self) -> &str;
}

pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("empty choices array".to_string()))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("stop") | None => FinishReason::Stop,
            Some(_other) => FinishReason::Stop,
        };

        Ok(GenerationResult {
            text: choice.message.content,
            finish_reason,
            total_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        use futures::StreamExt;

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, true))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let mut full_text = String::new();
        let mut byte_stream = response.bytes_stream();
        let mut carry = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            carry.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = carry.find('\n') {
                let line = carry[..pos].trim().to_string();
                carry.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    return Ok(GenerationResult {
                        text: full_text,
                        finish_reason: FinishReason::Stop,
                        total_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
                let Ok(event) = serde_json::from_str::<ChatStreamChunk>(data) else { continue };
                if let Some(choice) = event.choices.into_iter().next() {
                    if let Some(delta) = choice.delta.content {
                        full_text.push_str(&delta);
                        if tx.send(delta).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        Ok(GenerationResult {
            text: full_text,
            finish_reason: FinishReason::Stop,
            total_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self { role: m.role.to_string(), content: m.content.clone() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_trims_trailing_slash() {
        let backend = OpenAiBackend::new(OpenAiConfig::new(
            "https://api.openai.com/v1/",
            "key",
            "gpt-4o-mini",
        ))
        .unwrap();
        assert_eq!(backend.chat_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn request_body_serializes_role_lowercase() {
        let backend = OpenAiBackend::new(OpenAiConfig::new(
            "https://api.openai.com/v1",
            "key",
            "gpt-4o-mini",
        ))
        .unwrap();
        let body = backend.request_body(&[Message::user("hi")], false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn config_defaults_are_sane() {
        let config = OpenAiConfig::new("https://api.openai.com/v1", "key", "gpt-4o-mini");
        assert_eq!(config.max_tokens, 512);
        assert!(config.timeout.as_secs() > 0);
    }
}
