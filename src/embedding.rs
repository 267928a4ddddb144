//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Providers make exactly one request per [`EmbeddingProvider::embed`] call
//! and classify failures into [`EmbedError`]. Retry and backoff live in
//! [`crate::embed_cache`], which knows the batch boundaries.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust
//! # use docs_harness::config::EmbeddingConfig;
//! # use docs_harness::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model(), "disabled");
//! ```
//!
//! # Error classification
//!
//! - HTTP 429 → [`EmbedError::RateLimited`] (retryable)
//! - HTTP 5xx → [`EmbedError::Server`] (retryable)
//! - Request timeout → [`EmbedError::Timeout`] (retryable)
//! - Connection failure → [`EmbedError::Transport`] (retryable)
//! - Other HTTP 4xx → [`EmbedError::Client`] (fail immediately)
//! - Wrong vector count or dimensionality → [`EmbedError::InvalidResponse`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::fingerprint::config_fingerprint;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";

/// Maximum inputs the OpenAI embeddings endpoint accepts per request.
const OPENAI_MAX_BATCH: usize = 2048;

/// Failure of a single embedding request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("embeddings are disabled")]
    Disabled,
}

impl EmbedError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbedError::RateLimited(_)
                | EmbedError::Server { .. }
                | EmbedError::Timeout
                | EmbedError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbedError::Timeout
        } else if e.is_decode() {
            EmbedError::InvalidResponse(e.to_string())
        } else {
            EmbedError::Transport(e.to_string())
        }
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier, e.g. `"openai"`.
    fn name(&self) -> &str;
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Fingerprint that scopes cached vectors to this configuration.
    fn config_fingerprint(&self) -> String {
        config_fingerprint(self.name(), self.model(), self.dims())
    }

    /// Largest batch the backend accepts, if it has a limit.
    fn batch_size(&self) -> Option<usize> {
        None
    }

    /// Price in USD per million input tokens, when known.
    fn cost_per_million_tokens(&self) -> Option<f64> {
        None
    }

    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> std::result::Result<Vec<f32>, EmbedError> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::InvalidResponse("empty embedding response".to_string()))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns [`EmbedError::Disabled`].
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible embeddings endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable. The endpoint
/// defaults to the public OpenAI API and can be pointed at any compatible
/// server through `embedding.url`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
    cost_per_million_tokens: Option<f64>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let cost_per_million_tokens = config
            .cost_per_million_tokens
            .or_else(|| known_model_cost(&model));

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model,
            dims,
            cost_per_million_tokens,
        })
    }
}

/// Published list prices for the common OpenAI embedding models.
fn known_model_cost(model: &str) -> Option<f64> {
    match model {
        "text-embedding-3-small" => Some(0.02),
        "text-embedding-3-large" => Some(0.13),
        "text-embedding-ada-002" => Some(0.10),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> Option<usize> {
        Some(OPENAI_MAX_BATCH)
    }
    fn cost_per_million_tokens(&self) -> Option<f64> {
        self.cost_per_million_tokens
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body_text));
        }

        let json: serde_json::Value = response.json().await?;
        let vectors = parse_openai_response(&json)?;
        check_vectors(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn classify_status(status: u16, body: String) -> EmbedError {
    match status {
        429 => EmbedError::RateLimited(body),
        500..=599 => EmbedError::Server { status, body },
        _ => EmbedError::Client { status, body },
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by each item's `index`
/// when present.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::InvalidResponse("missing embedding".to_string()))?;

        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            let x = v
                .as_f64()
                .ok_or_else(|| EmbedError::InvalidResponse("non-numeric embedding value".to_string()))?;
            vec.push(x as f32);
        }

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// One vector per input, each of the configured dimensionality.
pub fn check_vectors(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: usize,
) -> std::result::Result<(), EmbedError> {
    if vectors.len() != expected_count {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {} dimensions, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Create an embedding provider from configuration.
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider
/// cannot be initialized (missing config or API key).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(429, String::new()),
            EmbedError::RateLimited(_)
        ));
        assert!(classify_status(503, String::new()).is_retryable());
        let client = classify_status(400, "bad input".into());
        assert!(!client.is_retryable());
        assert!(client.to_string().contains("bad input"));
        assert!(EmbedError::Timeout.is_retryable());
        assert!(!EmbedError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_parse_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_response_rejects_missing_data() {
        let err = parse_openai_response(&serde_json::json!({ "error": "x" })).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse(_)));
    }

    #[test]
    fn test_check_vectors_dims_and_count() {
        let v = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert!(check_vectors(&v, 2, 2).is_ok());
        assert!(check_vectors(&v, 3, 2).is_err());
        assert!(check_vectors(&v, 2, 3).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_refuses() {
        let provider = DisabledProvider;
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Disabled));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
