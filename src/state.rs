use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::ollama::OllamaClient;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct AppState {
    pub ollama: OllamaClient,
    pub config: Config,
    pub verifier: TokenVerifier,
    pub inflight: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let ollama = OllamaClient::new(&config)?;
        let verifier = TokenVerifier::new(&config.auth);
        let inflight = Arc::new(Semaphore::new(config.limits.max_inflight));
        Ok(Self {
            ollama,
            config,
            verifier,
            inflight,
        })
    }
}

/// Holds an in-flight permit for the lifetime of a request, including the
/// spawned relay task of a streaming response.
pub struct InflightGuard {
    _permit: OwnedSemaphorePermit,
}

impl InflightGuard {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }
}
