//! Generative text backends.
//!
//! Defines the [`GenerativeBackend`] trait and its implementations:
//! - **[`GeminiBackend`]** streams from the Gemini `streamGenerateContent`
//!   endpoint over server-sent events.
//! - **[`DisabledBackend`]** fails every request; used when generation is not
//!   configured.
//!
//! A backend turns one prompt into a [`ChunkStream`]. The stream ending with
//! `None` means the backend finished normally; an `Err` item is a mid-stream
//! failure and nothing after it should be trusted. Chunk boundaries carry no
//! meaning. Timeouts are enforced by the HTTP client and surface as `Err`
//! items like any other transport failure.
//!
//! Use [`create_backend`] to pick the implementation from configuration.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Text chunks produced by a backend, in order.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// A capability that generates text from a prompt, incrementally.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Start generating. Failures before the first chunk are returned here;
    /// later failures arrive as `Err` items on the stream.
    async fn generate(&self, prompt: &str) -> Result<ChunkStream>;
}

/// Build the backend selected by `[generation] provider`.
pub fn create_backend(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerativeBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "gemini" => Ok(Arc::new(GeminiBackend::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled Backend ============

/// Backend that refuses every request.
pub struct DisabledBackend;

#[async_trait]
impl GenerativeBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<ChunkStream> {
        Err(Error::Generation(
            "generation is disabled; set [generation] provider in the config file".to_string(),
        ))
    }
}

// ============ Gemini Backend ============

/// Streaming client for the Gemini API.
///
/// The API key is read from the environment variable named by
/// `generation.api_key_env` once, at construction. A missing key does not
/// fail construction (commands that never generate still work); it fails
/// each `generate` call instead.
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiBackend {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| anyhow::anyhow!("generation.model is required for the gemini provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "Gemini API key is not set; generation requests will fail"
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            api_key_env: config.api_key_env.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<ChunkStream> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            Error::Generation(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })?;

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        debug!(model = %self.model, prompt_bytes = prompt.len(), "Opening Gemini stream");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("request to Gemini failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "Gemini returned {}: {}",
                status,
                api_error_message(&text).unwrap_or(text)
            )));
        }

        Ok(decode_sse_stream(response.bytes_stream()).boxed())
    }
}

/// Pull `error.message` out of an API error body, if it has one.
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_string)
}

// ============ SSE decoding ============

/// Incremental server-sent-events decoder.
///
/// Bytes are buffered until a full line is available, so lines and UTF-8
/// sequences split across network reads decode correctly. Each event's
/// `data:` lines are joined with `\n`; other fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed bytes and return the data payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.take_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            self.take_line(line.trim_end_matches('\r'), &mut events);
        }
        if !self.data.is_empty() {
            events.push(self.data.drain(..).collect::<Vec<_>>().join("\n"));
        }
        events
    }

    fn take_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.drain(..).collect::<Vec<_>>().join("\n"));
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
}

/// Text carried by one Gemini stream event, if any.
///
/// An `error` object, or a prompt the API refused to answer, is an error.
pub fn parse_event(data: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| Error::Generation(format!("malformed stream event: {}", e)))?;

    if let Some(err) = value.get("error") {
        let message = err["message"].as_str().unwrap_or("unknown error");
        return Err(Error::Generation(format!("Gemini stream error: {}", message)));
    }

    let Some(candidate) = value["candidates"].get(0) else {
        if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
            return Err(Error::Generation(format!("prompt blocked: {}", reason)));
        }
        return Ok(None);
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// Turn a raw SSE byte stream into Gemini text chunks.
pub fn decode_sse_stream<S, B, E>(body: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::Generation(format!("stream interrupted: {}", e)))?;
            for data in decoder.push(chunk.as_ref()) {
                if let Some(text) = parse_event(&data)? {
                    yield text;
                }
            }
        }
        for data in decoder.finish() {
            if let Some(text) = parse_event(&data)? {
                yield text;
            }
        }
    }
}
