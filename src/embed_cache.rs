//! Incremental, content-fingerprinted embedding.
//!
//! Each chunk's embedding input is fingerprinted (see
//! [`crate::fingerprint::content_fingerprint`]). A prior [`EmbeddingCache`]
//! maps fingerprints to vectors for one provider configuration; on the next
//! build only chunks whose fingerprint is missing are sent to the provider.
//!
//! Misses are grouped into batches and embedded with at most
//! `max_concurrency` batches in flight. Each batch retries on its own with
//! exponential backoff, so a failing batch never stalls or fails the others.
//! Chunks from a batch that ultimately fails are indexed without vectors.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::embedding::{check_vectors, EmbedError, EmbeddingProvider};
use crate::fingerprint::content_fingerprint;
use crate::models::{Chunk, ChunkingStrategy};

pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Rough characters-per-token ratio used for cost estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Persisted vectors for one provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCache {
    pub version: u32,
    pub config_fingerprint: String,
    /// Content fingerprint → vector.
    pub entries: BTreeMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn new(config_fingerprint: impl Into<String>) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            config_fingerprint: config_fingerprint.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a cache file, returning an empty cache if it is missing or
    /// unreadable. Never fails the build.
    pub fn load_or_empty(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no embedding cache yet");
            return Self::default();
        }
        match Self::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "ignoring unreadable embedding cache");
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read embedding cache: {}", path.display()))?;
        let cache: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse embedding cache: {}", path.display()))?;
        if cache.version != CACHE_FORMAT_VERSION {
            anyhow::bail!(
                "unsupported embedding cache version {} (expected {})",
                cache.version,
                CACHE_FORMAT_VERSION
            );
        }
        Ok(cache)
    }

    /// Write the cache atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec(self)?;
        std::fs::write(&tmp, data)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Save, logging instead of failing.
    pub fn save_best_effort(&self, path: &Path) {
        match self.save(path) {
            Ok(()) => tracing::debug!(path = %path.display(), entries = self.len(), "saved embedding cache"),
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "failed to persist embedding cache"),
        }
    }
}

/// One chunk's embedding input.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedInput {
    pub chunk_id: String,
    pub fingerprint: String,
    pub text: String,
}

impl EmbedInput {
    pub fn from_chunk(chunk: &Chunk, strategy: &ChunkingStrategy) -> Self {
        let text = chunk.embedding_text();
        Self {
            chunk_id: chunk.chunk_id.clone(),
            fingerprint: content_fingerprint(strategy, &chunk.metadata, &text),
            text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Preferred batch size; the provider's own limit wins when smaller.
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Retries per batch after the first attempt.
    pub max_retries: u32,
    /// Treat every chunk as a miss.
    pub force: bool,
    /// First retry delay; doubles per attempt, capped at 32×.
    pub backoff_base: Duration,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_concurrency: 4,
            max_retries: 5,
            force: false,
            backoff_base: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedStats {
    pub hits: usize,
    pub misses: usize,
    pub total: usize,
    /// Misses whose batch failed after retries.
    pub failed: usize,
    /// Estimated tokens sent to the provider.
    pub estimated_tokens: usize,
    pub estimated_cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub vectors: HashMap<String, Vec<f32>>,
    /// Hits carried forward plus fresh vectors. Entries not referenced by
    /// this run are dropped.
    pub cache: EmbeddingCache,
    pub stats: EmbedStats,
}

/// Embed `inputs`, reusing vectors from `prior` where fingerprints match.
pub async fn embed_incremental(
    inputs: &[EmbedInput],
    provider: &dyn EmbeddingProvider,
    prior: EmbeddingCache,
    options: &EmbedOptions,
) -> EmbedOutcome {
    let fingerprint = provider.config_fingerprint();
    let mut prior = prior;
    if prior.config_fingerprint != fingerprint {
        if !prior.is_empty() {
            tracing::info!(
                discarded = prior.len(),
                "embedding provider configuration changed; discarding cache"
            );
        }
        prior.entries.clear();
    }

    let mut cache = EmbeddingCache::new(fingerprint);
    let mut vectors = HashMap::with_capacity(inputs.len());
    let mut misses: Vec<&EmbedInput> = Vec::new();

    for input in inputs {
        match prior.entries.get(&input.fingerprint) {
            Some(v) if !options.force => {
                vectors.insert(input.chunk_id.clone(), v.clone());
                cache.entries.insert(input.fingerprint.clone(), v.clone());
            }
            _ => misses.push(input),
        }
    }

    let mut stats = EmbedStats {
        hits: inputs.len() - misses.len(),
        misses: misses.len(),
        total: inputs.len(),
        ..Default::default()
    };
    stats.estimated_tokens = misses
        .iter()
        .map(|m| m.text.chars().count().div_ceil(CHARS_PER_TOKEN))
        .sum();
    stats.estimated_cost_usd = provider
        .cost_per_million_tokens()
        .map(|price| stats.estimated_tokens as f64 / 1_000_000.0 * price);

    if misses.is_empty() {
        return EmbedOutcome {
            vectors,
            cache,
            stats,
        };
    }

    let batch_size = options
        .batch_size
        .min(provider.batch_size().unwrap_or(usize::MAX))
        .max(1);
    let concurrency = options.max_concurrency.max(1);

    tracing::info!(
        misses = stats.misses,
        hits = stats.hits,
        batch_size,
        concurrency,
        "embedding changed chunks"
    );

    let results: Vec<(&[&EmbedInput], std::result::Result<Vec<Vec<f32>>, EmbedError>)> =
        stream::iter(misses.chunks(batch_size))
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(|i| i.text.clone()).collect();
                (batch, embed_with_retry(provider, &texts, options).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

    for (batch, result) in results {
        match result {
            Ok(batch_vectors) => {
                for (input, vector) in batch.iter().zip(batch_vectors) {
                    cache
                        .entries
                        .insert(input.fingerprint.clone(), vector.clone());
                    vectors.insert(input.chunk_id.clone(), vector);
                }
            }
            Err(e) => {
                tracing::warn!(
                    chunks = batch.len(),
                    first = %batch[0].chunk_id,
                    error = %e,
                    "embedding batch failed; chunks indexed without vectors"
                );
                stats.failed += batch.len();
            }
        }
    }

    EmbedOutcome {
        vectors,
        cache,
        stats,
    }
}

async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    options: &EmbedOptions,
) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
    let mut attempt: u32 = 0;
    loop {
        let result = provider
            .embed(texts)
            .await
            .and_then(|v| check_vectors(&v, texts.len(), provider.dims()).map(|_| v));
        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < options.max_retries => {
                attempt += 1;
                // Exponential backoff: 1x, 2x, 4x, ... capped at 32x
                let delay = options.backoff_base * (1u32 << (attempt - 1).min(5));
                tracing::debug!(attempt, error = %e, ?delay, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
