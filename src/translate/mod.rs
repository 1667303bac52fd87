//! Translation core: request/result types, the translator adapter trait,
//! the cache stores and the request orchestrator.

pub mod cache;
pub mod chat;
pub mod flow;
pub mod normalize;
pub mod redis_cache;
pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use service::{TranslationService, TranslationServiceBuilder};

/// Incoming translation request. `target_lang` falls back to the configured default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    #[serde(default)]
    pub target_lang: Option<String>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target_lang: None,
        }
    }

    pub fn with_target(text: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target_lang: Some(target_lang.into()),
        }
    }
}

/// Where a translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Api,
}

impl ResultSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultSource::Cache => "cache",
            ResultSource::Api => "api",
        }
    }
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation result returned to the caller. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub original: String,
    pub translated: String,
    /// Milliseconds, rounded to 2 decimals.
    pub latency_ms: f64,
    pub source: ResultSource,
}

/// Translator adapter (remote model backends, fakes in tests).
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, UpstreamError>;
}

/// Failure of the remote translation model. The only error that reaches callers.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream rejected credentials: {0}")]
    Unauthorized(String),

    #[error("upstream rate limited the request: {0}")]
    RateLimited(String),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream response malformed: {0}")]
    Malformed(String),
}

/// Round milliseconds to two decimal places.
pub(crate) fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
