use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_SCOPE: &str = "site:admin";

const DEV_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Verified bearer-token claims. `scope` is the space-separated OAuth scope
/// claim; `sub` is the user identity used in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn has_scope(&self, wanted: &str) -> bool {
        self.scope
            .as_deref()
            .map(|scopes| scopes.split_whitespace().any(|entry| entry == wanted))
            .unwrap_or(false)
    }

    pub fn require_scope(&self, wanted: &str) -> Result<(), AppError> {
        if self.has_scope(wanted) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "missing required scope: {}",
                wanted
            )))
        }
    }
}

/// Validates bearer tokens with the configured HS256 secret. Issuer and
/// audience are checked only when configured, matching the auth settings
/// the client bootstraps from `/api/config/auth`.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(auth: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match &auth.issuer {
            Some(issuer) if !issuer.is_empty() => validation.set_issuer(&[issuer]),
            _ => {}
        }
        if auth.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&auth.audience]);
        }
        Self {
            key: DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

impl FromRequestParts<AppState> for Claims {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthenticated("malformed authorization header"))?;
        state.verifier.verify(token).map_err(|err| {
            tracing::warn!(error = %err, "bearer token rejected");
            AppError::unauthenticated("invalid bearer token")
        })
    }
}

/// Signs a short-lived HS256 test token. Development aid only; the handler
/// is routed solely when `auth.dev_tokens` is enabled.
pub fn mint_dev_token(
    auth: &AuthConfig,
    user_id: &str,
    is_admin: bool,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(DEV_TOKEN_TTL)
        .as_secs();
    let claims = Claims {
        sub: user_id.to_string(),
        scope: is_admin.then(|| ADMIN_SCOPE.to_string()),
        exp,
        iss: auth.issuer.clone().filter(|issuer| !issuer.is_empty()),
        aud: (!auth.audience.is_empty()).then(|| auth.audience.clone()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
}
