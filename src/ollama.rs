use axum::body::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::{ChatResponse, OllamaGenerateReply, OllamaGenerateRequest, OllamaTagsResponse};

pub const UNARY_FALLBACK_MESSAGE: &str = "Sorry, there was an error processing your message.";
pub const STREAM_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Errors at the Ollama boundary. They never reach the HTTP client as-is;
/// each handler absorbs them into its own fallback shape.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid upstream payload: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Client for the Ollama HTTP API. Two pooled reqwest clients are built once
/// at startup: the unary one carries a read timeout, the stream one only a
/// connect timeout so long-lived token streams are not cut off.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    generate_url: String,
    tags_url: String,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.ollama.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;
        let stream_client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.ollama.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            stream_client,
            generate_url: config.generate_url(),
            tags_url: config.tags_url(),
        })
    }

    /// One unary generate call. No retries; any failure surfaces immediately.
    pub async fn generate(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<OllamaGenerateReply, UpstreamError> {
        let resp = self
            .client
            .post(&self.generate_url)
            .json(&OllamaGenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status()));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Opens a streaming generate call and hands back the raw byte stream of
    /// NDJSON lines. Finite and not restartable; dropping the stream closes
    /// the upstream connection, which is how cancellation propagates.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, UpstreamError> {
        let resp = self
            .stream_client
            .post(&self.generate_url)
            .json(&OllamaGenerateRequest {
                model,
                prompt,
                stream: true,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status()));
        }
        Ok(resp.bytes_stream().boxed())
    }

    /// Lists model names from `/api/tags`. Upstream is trusted for
    /// uniqueness; an empty list is valid.
    pub async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
        let resp = self.client.get(&self.tags_url).send().await?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status()));
        }
        let tags: OllamaTagsResponse = resp.json().await?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }
}

/// Pure transform from an upstream reply to the gateway's response shape.
/// Missing fields default: model to the one requested, response to empty.
pub fn to_chat_response(
    reply: OllamaGenerateReply,
    requested_model: &str,
    elapsed: Duration,
) -> ChatResponse {
    ChatResponse {
        model: reply.model.unwrap_or_else(|| requested_model.to_string()),
        response: reply.response.unwrap_or_default(),
        processing_time_ms: elapsed.as_millis() as u64,
    }
}

/// Fallback reply for the unary path when upstream is unreachable. The
/// failure is absorbed into a polite message rather than an HTTP error.
pub fn fallback_chat_response(model: &str) -> ChatResponse {
    ChatResponse {
        model: model.to_string(),
        response: UNARY_FALLBACK_MESSAGE.to_string(),
        processing_time_ms: 0,
    }
}

/// Static model list served when `/api/tags` is unreachable.
pub fn fallback_models() -> Vec<String> {
    ["llama2", "llama3", "mistral", "gemma", "codellama"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}
