use serde::{Deserialize, Serialize};

/// Inbound chat request from the browser client. An empty `model` means
/// "use the configured default"; empty `text` is forwarded as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub model: String,
}

/// Unary chat reply. `processing_time_ms` is the wall-clock time of the
/// upstream round trip; it is 0 only on the fallback path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub model: String,
    pub response: String,
    pub processing_time_ms: u64,
}

/// One unit of the outbound SSE stream. The sequence is zero or more
/// `done=false` events followed by exactly one terminal `done=true` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamEvent {
    pub model: String,
    pub response: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettingsResponse {
    pub domain: String,
    pub client_id: String,
    pub audience: String,
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigResponse {
    pub user_id: String,
    pub default_model: String,
    pub theme: String,
    pub history_enabled: bool,
}

/// User preference update. Acknowledged only; there is no per-user store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigUpdate {
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub history_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Ollama `/api/generate` request body.
#[derive(Debug, Serialize)]
pub struct OllamaGenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

/// One Ollama `/api/generate` payload, unary or one NDJSON stream line.
/// Every field is optional; the normalizer supplies defaults, so slightly
/// different upstream schema versions decode without failing.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaGenerateReply {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

/// Ollama `/api/tags` response.
#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaModelTag {
    pub name: String,
}
