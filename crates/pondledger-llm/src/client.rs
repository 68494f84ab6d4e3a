// Claude API client: one-shot completions for the extraction wrappers and
// SSE streaming (via reqwest-eventsource) for long-form insights.
//
// Streaming parses Server-Sent Events into `LlmEvent` variants that are
// forwarded over an mpsc channel for the caller to consume.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use pondledger_core::config::Config;
use pondledger_core::protocol::LlmEvent;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Request / error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM not configured")]
    Disabled,

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("response contained no text")]
    EmptyResponse,
}

/// One block of user content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    /// Base64 image data with its media type (e.g. `image/jpeg`).
    Image { media_type: String, data: String },
}

impl ContentBlock {
    fn to_json(&self) -> Value {
        match self {
            ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
            ContentBlock::Image { media_type, data } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            }),
        }
    }
}

/// A single-turn request: system prompt plus one user message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub content: Vec<ContentBlock>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            content: vec![ContentBlock::Text(user.into())],
            max_tokens,
        }
    }

    fn body(&self, model: &str, stream: bool) -> Value {
        let content: Vec<Value> = self.content.iter().map(ContentBlock::to_json).collect();
        json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "stream": stream,
            "system": self.system,
            "messages": [{ "role": "user", "content": content }]
        })
    }
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// Anything that can answer a completion request. The Claude client is the
/// production implementation; tests script their own.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Return the full text of the model's reply.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Stream the reply as `LlmEvent`s over `tx`, ending with `Complete` or
    /// `Error`. The default sends the one-shot reply as a single token.
    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<LlmEvent>,
        request_id: String,
    ) -> anyhow::Result<()> {
        let event = match self.complete(request).await {
            Ok(full_text) => {
                let _ = tx
                    .send(LlmEvent::Token {
                        text: full_text.clone(),
                        request_id: request_id.clone(),
                    })
                    .await;
                LlmEvent::Complete {
                    full_text,
                    input_tokens: 0,
                    output_tokens: 0,
                    request_id,
                }
            }
            Err(e) => LlmEvent::Error {
                message: e.to_string(),
                request_id,
            },
        };
        let _ = tx.send(event).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClaudeClient
// ---------------------------------------------------------------------------

/// Low-level Claude Messages API client.
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (a proxy or a local stub).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    /// Send a non-streaming request and return the concatenated text blocks.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self.request(&request.body(&self.model, false)).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: status_message(&text),
            });
        }

        let body: Value = serde_json::from_str(&text)?;
        if let Some(usage) = body.get("usage") {
            debug!(%usage, "completion usage");
        }
        parse_completion_text(&body).ok_or(LlmError::EmptyResponse)
    }

    /// Stream a request over `tx`. Returns when the stream is complete, an
    /// error occurs, or the receiver is dropped.
    pub async fn stream_message(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<LlmEvent>,
        request_id: String,
    ) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            let _ = tx
                .send(LlmEvent::Error {
                    message: "API key not configured".to_string(),
                    request_id,
                })
                .await;
            return Ok(());
        }

        let mut es = match self.request(&request.body(&self.model, true)).eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: format!("Failed to create event source: {e}"),
                        request_id,
                    })
                    .await;
                return Ok(());
            }
        };

        let mut full_text = String::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    let data = &msg.data;
                    match msg.event.as_str() {
                        "message_start" => {
                            match parse_input_tokens(data) {
                                Some(n) => input_tokens = n,
                                None => warn!("failed to parse input_tokens from message_start"),
                            }
                        }
                        "content_block_delta" => {
                            if let Some(text) = parse_delta_text(data) {
                                full_text.push_str(&text);
                                if tx
                                    .send(LlmEvent::Token {
                                        text,
                                        request_id: request_id.clone(),
                                    })
                                    .await
                                    .is_err()
                                {
                                    es.close();
                                    return Ok(());
                                }
                            }
                        }
                        "message_delta" => {
                            match parse_output_tokens(data) {
                                Some(n) => output_tokens = n,
                                None => warn!("failed to parse output_tokens from message_delta"),
                            }
                        }
                        "error" => {
                            let message = serde_json::from_str::<Value>(data)
                                .ok()
                                .as_ref()
                                .and_then(parse_error_message)
                                .unwrap_or_else(|| format!("Stream error: {data}"));
                            warn!(%message, "API reported a stream error");
                            let _ = tx.send(LlmEvent::Error { message, request_id }).await;
                            es.close();
                            return Ok(());
                        }
                        "message_stop" => {
                            debug!(input_tokens, output_tokens, "streaming complete");
                            let _ = tx
                                .send(LlmEvent::Complete {
                                    full_text,
                                    input_tokens,
                                    output_tokens,
                                    request_id,
                                })
                                .await;
                            es.close();
                            return Ok(());
                        }
                        other => {
                            debug!(event_type = other, "ignoring SSE event");
                        }
                    }
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: extract_error_message(&err),
                            request_id,
                        })
                        .await;
                    es.close();
                    return Ok(());
                }
            }
        }

        // Stream ended without message_stop.
        let event = if full_text.is_empty() {
            LlmEvent::Error {
                message: "Stream ended unexpectedly without any content".to_string(),
                request_id,
            }
        } else {
            LlmEvent::Complete {
                full_text,
                input_tokens,
                output_tokens,
                request_id,
            }
        };
        let _ = tx.send(event).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either an active Claude client or disabled (no API key).
pub enum LlmClient {
    Active(ClaudeClient),
    Disabled,
}

impl LlmClient {
    /// `Active` when credentials carry a non-empty API key.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.anthropic_api_key {
            Some(key) if !key.is_empty() => {
                LlmClient::Active(ClaudeClient::new(key.clone(), config.llm.model.clone()))
            }
            _ => LlmClient::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        match self {
            LlmClient::Active(client) => client.complete(request).await,
            LlmClient::Disabled => Err(LlmError::Disabled),
        }
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        tx: mpsc::Sender<LlmEvent>,
        request_id: String,
    ) -> anyhow::Result<()> {
        match self {
            LlmClient::Active(client) => client.stream_message(request, tx, request_id).await,
            LlmClient::Disabled => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: LlmError::Disabled.to_string(),
                        request_id,
                    })
                    .await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JSON parsing helpers
// ---------------------------------------------------------------------------

/// Concatenate the `text` blocks of a Messages API response.
///
/// Expected shape: `{ "content": [ { "type": "text", "text": "..." }, ... ] }`
pub(crate) fn parse_completion_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Expected shape: `{ "type": "error", "error": { "message": "..." } }`
pub(crate) fn parse_error_message(body: &Value) -> Option<String> {
    body.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Message for a failed response: the API's own error message when the body
/// carries one, otherwise the start of the raw body (proxies answer in HTML).
fn status_message(body: &str) -> String {
    if let Some(message) = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(parse_error_message)
    {
        return message;
    }
    let raw = body.trim();
    if raw.is_empty() {
        "unknown error".to_string()
    } else {
        raw.chars().take(200).collect()
    }
}

/// `input_tokens` from a `message_start` event.
pub(crate) fn parse_input_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("message")?
        .get("usage")?
        .get("input_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// `delta.text` from a `content_block_delta` event.
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

/// `usage.output_tokens` from a `message_delta` event.
pub(crate) fn parse_output_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("usage")?
        .get("output_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("API returned status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error: {e}")
        }
        other => format!("Stream error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
