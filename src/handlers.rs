use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::{ADMIN_SCOPE, Claims, mint_dev_token};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{AuthSettingsResponse, ChatMessage, UserConfigResponse, UserConfigUpdate};
use crate::ollama::{fallback_chat_response, fallback_models, to_chat_response};
use crate::state::{AppState, InflightGuard};
use crate::streaming::stream_chat;

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/chat", get(get_chat_welcome))
        .route("/api/chat/message", post(post_message))
        .route("/api/chat/stream", post(post_stream))
        .route("/api/chat/models", get(get_chat_models))
        .route("/api/chat/admin", get(admin_action))
        .route("/api/config/models", get(get_config_models))
        .route("/api/config/auth", get(get_auth_settings))
        .route(
            "/api/config/user",
            get(get_user_config).post(update_user_config),
        )
        .route("/health", get(health));
    if state.config.auth.dev_tokens {
        router = router.route("/dev/token", get(get_dev_token));
    }
    router.with_state(state)
}

pub async fn post_message(
    State(state): State<AppState>,
    claims: Claims,
    body: Result<Json<ChatMessage>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(message) =
        body.map_err(|err| AppError::invalid_request(format!("invalid chat message: {}", err)))?;
    let request_id = next_request_id();
    let model = resolve_model(&message.model, &state.config);
    info!(
        request_id = %request_id,
        user = %claims.sub,
        model = %model,
        "message received: {}",
        excerpt(&message.text)
    );
    let _inflight = acquire_inflight(&state)?;

    let start = Instant::now();
    match state.ollama.generate(&message.text, &model).await {
        Ok(reply) => {
            let resp = to_chat_response(reply, &model, start.elapsed());
            info!(
                request_id = %request_id,
                user = %claims.sub,
                model = %resp.model,
                latency_ms = start.elapsed().as_millis() as u64,
                status = 200,
                "request completed"
            );
            Ok(Json(resp).into_response())
        }
        Err(err) => {
            // Upstream failures are absorbed into a polite 200 reply; the
            // client contract never surfaces a gateway 5xx on this path.
            warn!(
                request_id = %request_id,
                user = %claims.sub,
                model = %model,
                error = %err,
                "upstream failure, returning fallback reply"
            );
            Ok(Json(fallback_chat_response(&model)).into_response())
        }
    }
}

pub async fn post_stream(
    State(state): State<AppState>,
    claims: Claims,
    body: Result<Json<ChatMessage>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(message) =
        body.map_err(|err| AppError::invalid_request(format!("invalid chat message: {}", err)))?;
    let request_id = next_request_id();
    let model = resolve_model(&message.model, &state.config);
    info!(
        request_id = %request_id,
        user = %claims.sub,
        model = %model,
        "stream request accepted: {}",
        excerpt(&message.text)
    );
    let guard = acquire_inflight(&state)?;
    Ok(stream_chat(state, message.text, model, guard, request_id).await)
}

pub async fn get_chat_welcome(_claims: Claims) -> impl IntoResponse {
    Json(json!({"message": "Welcome to the chat service"}))
}

/// Static model shortlist for the chat UI picker. The live listing is
/// `/api/config/models`.
pub async fn get_chat_models(_claims: Claims) -> impl IntoResponse {
    Json(json!({"models": ["llama2", "mistral", "gemma", "codellama"]}))
}

pub async fn admin_action(claims: Claims) -> Result<Response, AppError> {
    claims.require_scope(ADMIN_SCOPE)?;
    info!(user = %claims.sub, "admin action executed");
    Ok(Json(json!({"message": "Admin action executed"})).into_response())
}

/// Public. Serves the live tags listing, or the fixed fallback list on any
/// upstream error; never a non-2xx.
pub async fn get_config_models(State(state): State<AppState>) -> Json<Vec<String>> {
    match state.ollama.list_models().await {
        Ok(models) => Json(models),
        Err(err) => {
            warn!(error = %err, "model listing failed, serving fallback list");
            Json(fallback_models())
        }
    }
}

/// Public auth bootstrap info for the browser client.
pub async fn get_auth_settings(State(state): State<AppState>) -> Json<AuthSettingsResponse> {
    let auth = &state.config.auth;
    Json(AuthSettingsResponse {
        domain: auth.domain.clone(),
        client_id: auth.client_id.clone(),
        audience: auth.audience.clone(),
        scope: auth.scope.clone(),
    })
}

pub async fn get_user_config(
    State(state): State<AppState>,
    claims: Claims,
) -> Json<UserConfigResponse> {
    Json(UserConfigResponse {
        user_id: claims.sub,
        default_model: state.config.ollama.default_model.clone(),
        theme: "light".to_string(),
        history_enabled: true,
    })
}

/// Acknowledges a preference update. There is no per-user store; settings
/// live client-side, so this only logs the change.
pub async fn update_user_config(
    claims: Claims,
    body: Result<Json<UserConfigUpdate>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(update) =
        body.map_err(|err| AppError::invalid_request(format!("invalid user config: {}", err)))?;
    info!(
        user = %claims.sub,
        default_model = %update.default_model,
        theme = %update.theme,
        history_enabled = update.history_enabled,
        "user configuration updated"
    );
    Ok(Json(json!({"message": "Configuration updated successfully"})).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevTokenQuery {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Mints a test token. Routed only when `auth.dev_tokens` is enabled, so in
/// production this path 404s.
pub async fn get_dev_token(
    State(state): State<AppState>,
    Query(query): Query<DevTokenQuery>,
) -> Result<Response, AppError> {
    let auth = &state.config.auth;
    if auth.issuer.as_deref().unwrap_or("").is_empty() || auth.audience.is_empty() {
        return Err(AppError::invalid_request(
            "auth configuration is incomplete: issuer and audience are required",
        ));
    }
    let token = mint_dev_token(auth, &query.user_id, query.is_admin).map_err(|err| {
        warn!(error = %err, "dev token signing failed");
        AppError::invalid_request("failed to generate token")
    })?;
    info!(user = %query.user_id, is_admin = query.is_admin, "issued dev token");
    Ok(Json(json!({"token": token})).into_response())
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn resolve_model(requested: &str, config: &Config) -> String {
    if requested.is_empty() {
        config.ollama.default_model.clone()
    } else {
        requested.to_string()
    }
}

fn acquire_inflight(state: &AppState) -> Result<InflightGuard, AppError> {
    state
        .inflight
        .clone()
        .try_acquire_owned()
        .map(InflightGuard::new)
        .map_err(|_| AppError::rate_limited("too many in-flight requests"))
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("req-{}-{}", ts, seq)
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= 80 {
        text.to_string()
    } else {
        let cut: String = text.chars().take(80).collect();
        format!("{}...", cut)
    }
}
