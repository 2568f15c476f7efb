//! LLM Transport: an OpenAI-compatible chat-completions HTTP client.
//!
//! Supports non-streaming and streaming (SSE) invocation, per-call timeouts,
//! and cooperative cancellation that is honored within one chunk boundary
//! during a stream read.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{looks_like_context_overflow, LlmError, Result};
use crate::message::{ChatChunk, ChatRequest, ChatResponse, Message, Role, UsageMetadata};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Provider-agnostic chat model contract. A single OpenAI-compatible
/// endpoint is the only concrete implementation the core ships with —
/// multi-model routing policies are out of scope — but the trait keeps the
/// worker and resilience layers decoupled from the wire format.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<ChatResponse>;

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<ChatStream>;

    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Client for `{api_base}/chat/completions`.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    api_base: String,
    api_key: Option<String>,
    http: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key,
            http: Client::new(),
        }
    }

    /// Build a client around an already-configured `reqwest::Client`, used
    /// by the Client Pool so every logical client at an endpoint shares one
    /// connection pool.
    pub fn with_http_client(api_base: impl Into<String>, api_key: Option<String>, http: Client) -> Self {
        Self { api_base: api_base.into(), api_key, http }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ChatRequest) -> WireRequest {
        WireRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            stream: request.config.stream,
        }
    }

    async fn classify_http_error(status: reqwest::StatusCode, body: String) -> LlmError {
        if looks_like_context_overflow(&body) {
            return LlmError::ContextOverflow(body);
        }
        let code = status.as_u16();
        if status.is_server_error() {
            LlmError::Http5xx { status: code, body }
        } else {
            LlmError::Http4xx { status: code, body }
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn chat(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<ChatResponse> {
        request.config.stream = false;
        let body = self.build_request(&request);

        let mut req = self.http.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let send_fut = req.send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            res = tokio::time::timeout(timeout, send_fut) => {
                res.map_err(|_| LlmError::Timeout)?
                    .map_err(|e| LlmError::Network(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http_error(status, body).await);
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))?;

        Ok(ChatResponse {
            message: Message {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
            },
            usage: wire.usage.map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }

    async fn stream(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<ChatStream> {
        request.config.stream = true;
        let body = self.build_request(&request);

        let mut req = self.http.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            res = tokio::time::timeout(timeout, req.send()) => {
                res.map_err(|_| LlmError::Timeout)?
                    .map_err(|e| LlmError::Network(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http_error(status, body).await);
        }

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(sse_to_chunks(byte_stream, cancel)))
    }
}

/// Turns the raw SSE byte stream into `ChatChunk`s, polling the
/// cancellation token between chunks so a cancelled workflow interrupts the
/// read within one chunk boundary.
fn sse_to_chunks(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ChatChunk>> + Send {
    async_stream::stream! {
        let mut buf = String::new();
        tokio::pin!(byte_stream);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    return;
                }
                next = byte_stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield Err(LlmError::Network(e.to_string()));
                    return;
                }
            };

            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(idx) = buf.find('\n') {
                let line = buf[..idx].trim_end_matches('\r').to_string();
                buf.drain(..=idx);

                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    return;
                }
                match serde_json::from_str::<WireStreamFrame>(data) {
                    Ok(frame) => {
                        if let Some(choice) = frame.choices.into_iter().next() {
                            if let Some(delta) = choice.delta.content {
                                if !delta.is_empty() {
                                    yield Ok(ChatChunk { delta });
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse SSE frame, skipping");
                    }
                }
            }
        }
        debug!("stream ended without [DONE] sentinel");
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self { role: role.to_string(), content: Some(m.content.clone()) }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct WireStreamFrame {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_without_double_slash() {
        let client = OpenAiCompatibleClient::new("http://localhost:8080/v1/", None);
        assert_eq!(client.url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn context_overflow_detected_case_insensitively() {
        assert!(looks_like_context_overflow("Error: CONTEXT LENGTH exceeded"));
        assert!(looks_like_context_overflow("context_length_exceeded"));
        assert!(!looks_like_context_overflow("internal server error"));
    }

    #[tokio::test]
    async fn chat_returns_cancelled_when_token_already_cancelled() {
        let client = OpenAiCompatibleClient::new("http://127.0.0.1:1", None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = ChatRequest::new("test-model", vec![Message::user("hi")]);
        let result = client.chat(request, cancel, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
