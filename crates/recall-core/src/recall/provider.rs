//! ============================================================================
//! Provider Boundary - External embedding and completion services
//! ============================================================================
//! Every failure of an external provider is classified narrowly (timeout,
//! auth, status, malformed body, ...) and then collapsed into a single
//! `ProviderUnavailable` value. Callers never branch on the kind; it exists
//! for logging. Both the embedder and the synthesizer recover from it
//! locally with their deterministic fallbacks.
//! ============================================================================

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::types::{RecallError, Result};

/// Default OpenAI-compatible API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Narrow classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    /// No provider (or no API key) configured
    NotConfigured,
    /// The call did not finish within the per-call timeout
    Timeout,
    /// Connection, DNS or TLS failure
    Transport,
    /// 401 / 403 from the provider
    Auth,
    /// Any other non-success HTTP status
    Status,
    /// Body could not be parsed or carried no usable result
    MalformedResponse,
}

impl ProviderFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFailure::NotConfigured => "not_configured",
            ProviderFailure::Timeout => "timeout",
            ProviderFailure::Transport => "transport",
            ProviderFailure::Auth => "auth",
            ProviderFailure::Status => "status",
            ProviderFailure::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type crossing the provider boundary
#[derive(Debug, Clone, thiserror::Error)]
#[error("provider unavailable ({kind}): {detail}")]
pub struct ProviderUnavailable {
    pub kind: ProviderFailure,
    pub detail: String,
}

impl ProviderUnavailable {
    pub fn new(kind: ProviderFailure, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_configured(what: &str) -> Self {
        Self::new(ProviderFailure::NotConfigured, format!("no {} provider configured", what))
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ProviderFailure::Timeout,
            format!("no response within {}ms", limit.as_millis()),
        )
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ProviderFailure::MalformedResponse, detail)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(200).collect());

        let kind = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ProviderFailure::Auth
        } else {
            ProviderFailure::Status
        };

        Self::new(kind, format!("{}: {}", status, message))
    }
}

impl From<reqwest::Error> for ProviderUnavailable {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ProviderFailure::Timeout
        } else if e.is_decode() {
            ProviderFailure::MalformedResponse
        } else {
            ProviderFailure::Transport
        };
        Self::new(kind, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Maps text to a vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable>;
}

/// Everything a completion provider needs for one reply
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Persona instructions
    pub system: String,
    /// Retrieved stories, already formatted
    pub context: String,
    /// The asker's question
    pub query: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generates text from a persona, a context block and a question
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderUnavailable>;
}

/// Build a pooled HTTP client with a hard per-request timeout
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RecallError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Run a provider future under a deadline, mapping expiry to `Timeout`
pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    call: F,
) -> std::result::Result<T, ProviderUnavailable>
where
    F: std::future::Future<Output = std::result::Result<T, ProviderUnavailable>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderUnavailable::timeout(limit)),
    }
}
