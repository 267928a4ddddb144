use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::search::Weights;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Commit the corpus was built from; recorded in the corpus metadata.
    #[serde(default)]
    pub source_commit: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".docs-harness")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override for OpenAI-compatible servers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Defaults to `<output.dir>/embedding-cache.json`.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub cost_per_million_tokens: Option<f64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_path: None,
            cost_per_million_tokens: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_phrase_weight")]
    pub phrase_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_proximity_bonus")]
    pub proximity_bonus: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Nearest neighbours requested from the store per query.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Neighbours less similar than this never contribute to a ranking.
    #[serde(default = "default_min_vector_similarity")]
    pub min_vector_similarity: f64,
    /// Name of an environment variable holding a cursor signing key.
    #[serde(default)]
    pub cursor_secret_env: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            lexical_weight: default_lexical_weight(),
            phrase_weight: default_phrase_weight(),
            vector_weight: default_vector_weight(),
            proximity_bonus: default_proximity_bonus(),
            rrf_k: default_rrf_k(),
            candidate_k: default_candidate_k(),
            store_timeout_secs: default_store_timeout_secs(),
            min_vector_similarity: default_min_vector_similarity(),
            cursor_secret_env: None,
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    50
}
fn default_lexical_weight() -> f64 {
    1.0
}
fn default_phrase_weight() -> f64 {
    1.0
}
fn default_vector_weight() -> f64 {
    0.5
}
fn default_proximity_bonus() -> f64 {
    10.0
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_k() -> usize {
    80
}
fn default_store_timeout_secs() -> u64 {
    10
}
fn default_min_vector_similarity() -> f64 {
    0.3
}

impl SearchConfig {
    pub fn weights(&self) -> Weights {
        Weights {
            lexical: self.lexical_weight,
            phrase: self.phrase_weight,
            vector: self.vector_weight,
            proximity_bonus: self.proximity_bonus,
            rrf_k: self.rrf_k,
        }
    }
}

impl Config {
    pub fn index_path(&self) -> PathBuf {
        self.output.dir.join(crate::ingest::INDEX_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output.dir.join(crate::ingest::METADATA_FILE_NAME)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.embedding
            .cache_path
            .clone()
            .unwrap_or_else(|| self.output.dir.join(crate::ingest::CACHE_FILE_NAME))
    }

    /// Cursor signing key from the configured environment variable, if set.
    pub fn cursor_secret(&self) -> Option<Vec<u8>> {
        let var = self.search.cursor_secret_env.as_ref()?;
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Some(value.into_bytes()),
            _ => {
                tracing::warn!(env = %var, "cursor secret variable is unset; cursors are unsigned");
                None
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.corpus.include_globs.is_empty() {
        anyhow::bail!("corpus.include_globs must not be empty");
    }
    if let Some(commit) = &config.corpus.source_commit {
        crate::taxonomy::validate_commit(commit)?;
    }

    // Validate search
    let s = &config.search;
    if s.max_limit < 1 {
        anyhow::bail!("search.max_limit must be >= 1");
    }
    if s.default_limit < 1 || s.default_limit > s.max_limit {
        anyhow::bail!("search.default_limit must be in [1, search.max_limit]");
    }
    s.weights().validate()?;
    if s.rrf_k <= 0.0 {
        anyhow::bail!("search.rrf_k must be > 0");
    }
    if s.candidate_k == 0 {
        anyhow::bail!("search.candidate_k must be > 0");
    }
    if !(-1.0..=1.0).contains(&s.min_vector_similarity) {
        anyhow::bail!("search.min_vector_similarity must be in [-1, 1]");
    }

    // Validate embedding
    let e = &config.embedding;
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if e.max_concurrency == 0 {
        anyhow::bail!("embedding.max_concurrency must be > 0");
    }
    if e.is_enabled() {
        if e.dims.is_none() || e.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
    }

    match e.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
