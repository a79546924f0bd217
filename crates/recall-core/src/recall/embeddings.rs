//! ============================================================================
//! Embedder - Vector embeddings for story transcripts and questions
//! ============================================================================
//! Generates text embeddings through an OpenAI-compatible API. When the
//! provider is missing or fails, falls back to a deterministic vector
//! seeded by a SHA-256 of the text so the pipeline keeps working offline.
//! ============================================================================

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{
    http_client, with_deadline, EmbeddingProvider, ProviderFailure, ProviderUnavailable,
};
use crate::config::RecallConfig;
use crate::types::{RecallError, Result};

/// Default embedding model (OpenAI compatible)
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Expected embedding dimension for text-embedding-ada-002
pub const EMBEDDING_DIM: usize = 1536;

/// Default per-call deadline for provider requests
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

/// Embedding provider speaking the OpenAI `/embeddings` protocol
pub struct OpenAiEmbeddings {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    model: Option<String>,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

impl OpenAiEmbeddings {
    /// Create a provider against an OpenAI-compatible base URL
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
        debug!("Requesting embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderUnavailable::from_status(status, &body));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderUnavailable::malformed(format!("embedding body: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Embedding tokens used: {} (model: {})",
                usage.total_tokens,
                parsed.model.as_deref().unwrap_or(&self.model)
            );
        }

        // Single input, but honour the index field anyway
        parsed
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderUnavailable::malformed("no embedding returned"))
    }
}

/// Deterministic pseudo-random embedding for `text`.
///
/// Components are uniform in [0, 1). A ChaCha8 generator is seeded with the
/// first eight bytes of the SHA-256 digest of the text, so equal text always
/// maps to a bit-identical vector on every platform and crate release.
/// The vector carries no semantic signal.
pub fn fallback_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);

    let mut rng = ChaCha8Rng::seed_from_u64(u64::from_be_bytes(seed));
    (0..dimension).map(|_| rng.gen::<f32>()).collect()
}

/// Embeds text with a provider when one answers, else with the fallback
#[derive(Clone)]
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dimension: usize,
    timeout: Duration,
}

impl Embedder {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, dimension: usize) -> Self {
        Self {
            provider,
            dimension,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Embedder that always uses the deterministic fallback
    pub fn offline(dimension: usize) -> Self {
        Self::new(None, dimension)
    }

    /// Build from configuration; without an API key the embedder runs offline
    pub fn from_config(config: &RecallConfig) -> Result<Self> {
        let provider: Option<Arc<dyn EmbeddingProvider>> = match config.api_key() {
            Some(key) => Some(Arc::new(OpenAiEmbeddings::new(
                key.to_string(),
                config.base_url.clone(),
                config.embedding_model.clone(),
                config.provider_timeout,
            )?)),
            None => {
                warn!("No API key configured, embeddings will use the offline fallback");
                None
            }
        };

        Ok(Self::new(provider, config.embedding_dim).with_timeout(config.provider_timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text.
    ///
    /// Provider failures never escape; a provider vector of the wrong length
    /// does, because mixing dimensionalities is a configuration error.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.embed_primary(text).await {
            Ok(vector) if vector.len() == self.dimension => Ok(vector),
            Ok(vector) => Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }),
            Err(e) => {
                if e.kind == ProviderFailure::NotConfigured {
                    debug!("Using fallback embedding: {}", e.detail);
                } else {
                    warn!(
                        provider = self.provider_name(),
                        kind = %e.kind,
                        "Embedding provider failed, using fallback: {}",
                        e.detail
                    );
                }
                Ok(fallback_embedding(text, self.dimension))
            }
        }
    }

    /// Embed several texts sequentially, preserving order
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    async fn embed_primary(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ProviderUnavailable::not_configured("embedding"))?;

        let vector = with_deadline(self.timeout, provider.embed(text)).await?;
        if let Some(index) = vector.iter().position(|x| !x.is_finite()) {
            return Err(ProviderUnavailable::malformed(format!(
                "non-finite embedding component at index {}",
                index
            )));
        }
        Ok(vector)
    }

    fn provider_name(&self) -> &str {
        self.provider.as_ref().map(|p| p.name()).unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedProvider(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            Ok(self.0.clone())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            Err(ProviderUnavailable::new(ProviderFailure::Transport, "connection refused"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1.0; 8])
        }
    }

    struct OverflowingProvider;

    #[async_trait]
    impl EmbeddingProvider for OverflowingProvider {
        fn name(&self) -> &str {
            "overflowing"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderUnavailable> {
            // 1e39 does not fit in an f32 and parses as infinity
            serde_json::from_str("[1e39, 1.0, 1.0, 1.0]")
                .map_err(|e| ProviderUnavailable::malformed(e.to_string()))
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = fallback_embedding("Tell me about your illness", 64);
        let b = fallback_embedding("Tell me about your illness", 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn test_fallback_follows_chacha8_stream() {
        let digest = Sha256::digest("I was diagnosed with cancer in 2003".as_bytes());
        let seed = u64::from_be_bytes(digest[..8].try_into().unwrap());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let expected: Vec<f32> = (0..16).map(|_| rng.gen::<f32>()).collect();

        assert_eq!(fallback_embedding("I was diagnosed with cancer in 2003", 16), expected);
    }

    #[test]
    fn test_fallback_differs_by_text() {
        let a = fallback_embedding("garage", 16);
        let b = fallback_embedding("diagnosis", 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fallback_prefix_is_stable_across_dimensions() {
        let short = fallback_embedding("same text", 8);
        let long = fallback_embedding("same text", 32);
        assert_eq!(short[..], long[..8]);
    }

    #[tokio::test]
    async fn test_offline_uses_fallback() {
        let embedder = Embedder::offline(12);
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, fallback_embedding("hello", 12));
    }

    #[tokio::test]
    async fn test_provider_vector_returned_unchanged() {
        let raw = vec![0.3, -0.2, 4.0, 0.0];
        let embedder = Embedder::new(Some(Arc::new(FixedProvider(raw.clone()))), 4);
        assert_eq!(embedder.embed("anything").await.unwrap(), raw);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let embedder = Embedder::new(Some(Arc::new(BrokenProvider)), 8);
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, fallback_embedding("hello", 8));
    }

    #[tokio::test]
    async fn test_provider_timeout_falls_back() {
        let embedder = Embedder::new(Some(Arc::new(SlowProvider)), 8)
            .with_timeout(Duration::from_millis(30));
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, fallback_embedding("hello", 8));
    }

    #[tokio::test]
    async fn test_non_finite_provider_vector_falls_back() {
        let embedder = Embedder::new(Some(Arc::new(OverflowingProvider)), 4);
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, fallback_embedding("hello", 4));
        assert!(vector.iter().all(|x| x.is_finite()));
    }

    #[tokio::test]
    async fn test_openai_embeddings_overflow_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"data":[{"embedding":[1e39,0.5,0.5],"index":0}]}"#),
            )
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::new(
            "test-key".to_string(),
            server.uri(),
            DEFAULT_EMBEDDING_MODEL,
            Duration::from_secs(5),
        )
        .unwrap();
        let embedder = Embedder::new(Some(Arc::new(provider)), 3);

        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, fallback_embedding("hello", 3));
    }

    #[tokio::test]
    async fn test_provider_dimension_mismatch_is_fatal() {
        let embedder = Embedder::new(Some(Arc::new(FixedProvider(vec![1.0; 3]))), 8);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            RecallError::DimensionMismatch { expected: 8, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_embed_many_preserves_order() {
        let embedder = Embedder::offline(6);
        let texts = vec!["one".to_string(), "two".to_string()];
        let vectors = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(vectors[0], fallback_embedding("one", 6));
        assert_eq!(vectors[1], fallback_embedding("two", 6));
    }

    #[tokio::test]
    async fn test_openai_embeddings_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
                "model": "text-embedding-ada-002",
                "usage": { "prompt_tokens": 3, "total_tokens": 3 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::new(
            "test-key".to_string(),
            server.uri(),
            DEFAULT_EMBEDDING_MODEL,
            Duration::from_secs(5),
        )
        .unwrap();

        let vector = provider.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_embeddings_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::new(
            "bad-key".to_string(),
            server.uri(),
            DEFAULT_EMBEDDING_MODEL,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider.embed("hello").await.unwrap_err();
        assert_eq!(err.kind, ProviderFailure::Auth);
    }

    #[tokio::test]
    async fn test_openai_embeddings_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::new(
            "test-key".to_string(),
            format!("{}/", server.uri()),
            DEFAULT_EMBEDDING_MODEL,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider.embed("hello").await.unwrap_err();
        assert_eq!(err.kind, ProviderFailure::MalformedResponse);
    }
}
