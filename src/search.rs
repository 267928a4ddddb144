//! Search engine: filtering, lexical scoring, rank fusion, near-duplicate
//! collapse, and cursor pagination over an immutable chunk set.
//!
//! # Ranking
//!
//! 1. Keep chunks that pass every filter. A chunk passes `k = v` if its
//!    value for `k` is `v` or it carries no value for `k` (auto-include).
//! 2. Lexical score: for each distinct query token, occurrences in the
//!    chunk's plain text plus three times its occurrences in the heading.
//!    The proximity bonus is added when the whole normalized query appears
//!    verbatim in the heading or text.
//! 3. With a vector signal, the lexical ranking, the phrase-match ranking,
//!    and the store's nearest neighbours are fused with weighted reciprocal
//!    rank fusion: `score = Σ weight / (rrf_k + rank)`. Neighbours below
//!    `min_vector_similarity` are discarded, so an unrelated query can still
//!    come back empty.
//! 4. Zero scores are dropped; the rest sort by score (desc), then
//!    `chunk_id` (asc).
//! 5. For each collapsible taxonomy key that no filter pins, in turn, chunks
//!    whose ids differ only by that key's value are collapsed to the best
//!    one. Chunks that differ in two keys are not variants of each other.
//! 6. The page `[offset, offset + limit)` is returned with a cursor for the
//!    next page. An empty ranking produces a hint with alternative filter
//!    values instead.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::cursor::CursorCodec;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{QueryError, QueryResult};
use crate::markdown::tokenize;
use crate::models::{Chunk, Metadata};
use crate::store::IndexStore;
use crate::taxonomy::CorpusMetadata;

/// Characters of `content_text` shown per hit.
const SNIPPET_CHARS: usize = 240;
/// Characters kept before the first match inside a snippet.
const SNIPPET_LEAD: usize = 60;

/// Per-signal fusion weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub lexical: f64,
    pub phrase: f64,
    pub vector: f64,
    /// Added to the lexical score on a verbatim phrase match.
    pub proximity_bonus: f64,
    pub rrf_k: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            lexical: 1.0,
            phrase: 1.0,
            vector: 0.5,
            proximity_bonus: 10.0,
            rrf_k: 60.0,
        }
    }
}

impl Weights {
    pub fn validate(&self) -> QueryResult<()> {
        for (name, w) in [
            ("lexical", self.lexical),
            ("phrase", self.phrase),
            ("vector", self.vector),
            ("proximity_bonus", self.proximity_bonus),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(QueryError::validation(format!(
                    "weight '{}' must be a finite, non-negative number",
                    name
                )));
            }
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(QueryError::validation("rrf_k must be a positive number"));
        }
        Ok(())
    }

    fn apply(mut self, overrides: &WeightOverrides) -> Self {
        if let Some(w) = overrides.lexical {
            self.lexical = w;
        }
        if let Some(w) = overrides.phrase {
            self.phrase = w;
        }
        if let Some(w) = overrides.vector {
            self.vector = w;
        }
        if let Some(w) = overrides.proximity_bonus {
            self.proximity_bonus = w;
        }
        self
    }
}

/// Per-request weight adjustments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_bonus: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub max_limit: usize,
    pub weights: Weights,
    /// Nearest neighbours requested from the vector store.
    pub candidate_k: usize,
    pub store_timeout: Duration,
    /// Cosine similarity floor for vector neighbours.
    pub min_vector_similarity: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
            weights: Weights::default(),
            candidate_k: 80,
            store_timeout: Duration::from_secs(10),
            min_vector_similarity: 0.3,
        }
    }
}

impl SearchSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            weights: config.weights(),
            candidate_k: config.candidate_k,
            store_timeout: Duration::from_secs(config.store_timeout_secs),
            min_vector_similarity: config.min_vector_similarity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    /// `None` uses the configured default. Clamped to `[1, max_limit]`.
    pub limit: Option<usize>,
    pub filters: BTreeMap<String, String>,
    pub cursor: Option<String>,
    /// Metadata keys to include on each hit; all keys when `None`.
    pub taxonomy_keys: Option<Vec<String>>,
    pub weights: Option<WeightOverrides>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub chunk_id: String,
    pub heading: String,
    pub breadcrumb: String,
    pub snippet: String,
    pub filepath: String,
    pub metadata: Metadata,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hint {
    pub message: String,
    /// Filter key → other values seen among chunks matching the query alone.
    pub suggested_filters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub next_cursor: Option<String>,
    pub hint: Option<Hint>,
}

/// Optional semantic signal: a vector store plus the embedder for queries.
#[derive(Clone)]
pub struct VectorSignal {
    pub store: Arc<dyn IndexStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

/// Precomputed token statistics for one chunk.
struct TermStats {
    content: HashMap<String, usize>,
    heading: HashMap<String, usize>,
    /// Space-delimited normalized tokens, padded with a space on each side.
    content_phrase: String,
    heading_phrase: String,
}

impl TermStats {
    fn new(chunk: &Chunk) -> Self {
        let content_tokens = tokenize(&chunk.content_text);
        let heading_tokens = tokenize(&chunk.heading);
        Self {
            content_phrase: format!(" {} ", content_tokens.join(" ")),
            heading_phrase: format!(" {} ", heading_tokens.join(" ")),
            content: counts(content_tokens),
            heading: counts(heading_tokens),
        }
    }
}

fn counts(tokens: Vec<String>) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for t in tokens {
        *map.entry(t).or_insert(0) += 1;
    }
    map
}

/// Normalized form of a query: distinct tokens plus the padded phrase.
struct ParsedQuery {
    tokens: Vec<String>,
    phrase: String,
}

impl ParsedQuery {
    fn new(query: &str) -> Self {
        let all = tokenize(query);
        let phrase = format!(" {} ", all.join(" "));
        let mut seen = HashSet::new();
        let tokens = all.into_iter().filter(|t| seen.insert(t.clone())).collect();
        Self { tokens, phrase }
    }
}

/// Read-only query engine over one build's chunks.
pub struct SearchEngine {
    /// Ordered by filepath, then `chunk_index`.
    pub(crate) chunks: Vec<Chunk>,
    stats: Vec<TermStats>,
    pub(crate) by_id: HashMap<String, usize>,
    /// Filepath → index range into `chunks`.
    pub(crate) files: BTreeMap<String, std::ops::Range<usize>>,
    pub(crate) metadata: CorpusMetadata,
    settings: SearchSettings,
    cursor: CursorCodec,
    vector: Option<VectorSignal>,
}

impl SearchEngine {
    pub fn new(
        mut chunks: Vec<Chunk>,
        metadata: CorpusMetadata,
        settings: SearchSettings,
        cursor: CursorCodec,
    ) -> Self {
        chunks.sort_by(|a, b| {
            a.filepath
                .cmp(&b.filepath)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        let stats = chunks.iter().map(TermStats::new).collect();
        let by_id = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.chunk_id.clone(), i))
            .collect();

        let mut files: BTreeMap<String, std::ops::Range<usize>> = BTreeMap::new();
        for (i, c) in chunks.iter().enumerate() {
            files
                .entry(c.filepath.clone())
                .and_modify(|r| r.end = i + 1)
                .or_insert(i..i + 1);
        }

        Self {
            chunks,
            stats,
            by_id,
            files,
            metadata,
            settings,
            cursor,
            vector: None,
        }
    }

    pub fn with_vector_signal(mut self, signal: VectorSignal) -> Self {
        self.vector = Some(signal);
        self
    }

    pub fn has_vector_signal(&self) -> bool {
        self.vector.is_some()
    }

    pub fn corpus_metadata(&self) -> &CorpusMetadata {
        &self.metadata
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub async fn search(&self, request: &SearchQuery) -> QueryResult<SearchResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(QueryError::validation("query must not be empty"));
        }

        let limit = request
            .limit
            .unwrap_or(self.settings.default_limit)
            .clamp(1, self.settings.max_limit.max(1));

        self.validate_filters(&request.filters)?;
        if let Some(keys) = &request.taxonomy_keys {
            self.validate_keys(keys)?;
        }

        let weights = match &request.weights {
            Some(overrides) => self.settings.weights.apply(overrides),
            None => self.settings.weights,
        };
        weights.validate()?;

        let offset = match &request.cursor {
            Some(token) => self.cursor.decode(token, query, &request.filters)?.offset,
            None => 0,
        };

        let parsed = ParsedQuery::new(query);
        let ranked = self.rank(&parsed, query, &request.filters, &weights).await?;
        let ranked = self.collapse(ranked, &request.filters);

        if ranked.is_empty() {
            return Ok(SearchResponse {
                hits: Vec::new(),
                next_cursor: None,
                hint: Some(self.hint(&parsed, query, &request.filters, &weights)),
            });
        }

        let end = offset.saturating_add(limit).min(ranked.len());
        let hits = ranked
            .get(offset..end)
            .unwrap_or(&[])
            .iter()
            .map(|&(idx, score)| self.hit(idx, score, &parsed, request.taxonomy_keys.as_deref()))
            .collect();
        let next_cursor = (end < ranked.len() && offset < end)
            .then(|| self.cursor.encode(query, &request.filters, end, limit));

        Ok(SearchResponse {
            hits,
            next_cursor,
            hint: None,
        })
    }

    pub(crate) fn validate_filters(&self, filters: &BTreeMap<String, String>) -> QueryResult<()> {
        for (key, value) in filters {
            let Some(entry) = self.metadata.taxonomy.get(key) else {
                return Err(QueryError::validation(format!(
                    "unknown filter key '{}'. Available keys: {}",
                    key,
                    self.available_keys()
                )));
            };
            if !self.metadata.allows(key, value) {
                return Err(QueryError::validation(format!(
                    "'{}' is not a valid value for '{}'. Expected one of: {}",
                    value,
                    key,
                    entry.values.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn validate_keys(&self, keys: &[String]) -> QueryResult<()> {
        for key in keys {
            if !self.metadata.taxonomy.contains_key(key) {
                return Err(QueryError::validation(format!(
                    "unknown taxonomy key '{}'. Available keys: {}",
                    key,
                    self.available_keys()
                )));
            }
        }
        Ok(())
    }

    fn available_keys(&self) -> String {
        let keys: Vec<&str> = self.metadata.taxonomy.keys().map(String::as_str).collect();
        if keys.is_empty() {
            "(none)".to_string()
        } else {
            keys.join(", ")
        }
    }

    /// Lexical score and whether the normalized phrase matched.
    fn lexical(&self, idx: usize, query: &ParsedQuery, weights: &Weights) -> (f64, bool) {
        let stats = &self.stats[idx];
        let mut score = 0usize;
        for token in &query.tokens {
            score += stats.content.get(token).copied().unwrap_or(0);
            score += 3 * stats.heading.get(token).copied().unwrap_or(0);
        }
        let phrase = !query.tokens.is_empty()
            && (stats.content_phrase.contains(&query.phrase)
                || stats.heading_phrase.contains(&query.phrase));
        let mut total = score as f64;
        if phrase {
            total += weights.proximity_bonus;
        }
        (total, phrase)
    }

    /// Ranked `(chunk index, score)` pairs before collapse.
    async fn rank(
        &self,
        query: &ParsedQuery,
        raw_query: &str,
        filters: &BTreeMap<String, String>,
        weights: &Weights,
    ) -> QueryResult<Vec<(usize, f64)>> {
        let mut lexical: Vec<(usize, f64, bool)> = (0..self.chunks.len())
            .filter(|&i| passes_filters(&self.chunks[i], filters))
            .map(|i| {
                let (score, phrase) = self.lexical(i, query, weights);
                (i, score, phrase)
            })
            .filter(|(_, score, _)| *score > 0.0)
            .collect();
        lexical.sort_by(|a, b| self.by_score(a.0, a.1, b.0, b.1));

        let Some(signal) = &self.vector else {
            return Ok(lexical.into_iter().map(|(i, s, _)| (i, s)).collect());
        };

        let neighbours = self.vector_candidates(signal, raw_query, filters).await?;

        let mut fused: HashMap<usize, f64> = HashMap::new();
        for (rank, (idx, _, _)) in lexical.iter().enumerate() {
            *fused.entry(*idx).or_insert(0.0) += weights.lexical / (weights.rrf_k + (rank + 1) as f64);
        }
        for (rank, (idx, _, _)) in lexical.iter().filter(|(_, _, phrase)| *phrase).enumerate() {
            *fused.entry(*idx).or_insert(0.0) += weights.phrase / (weights.rrf_k + (rank + 1) as f64);
        }
        for (rank, idx) in neighbours.iter().enumerate() {
            *fused.entry(*idx).or_insert(0.0) += weights.vector / (weights.rrf_k + (rank + 1) as f64);
        }

        let mut ranked: Vec<(usize, f64)> = fused.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| self.by_score(a.0, a.1, b.0, b.1));
        Ok(ranked)
    }

    async fn vector_candidates(
        &self,
        signal: &VectorSignal,
        raw_query: &str,
        filters: &BTreeMap<String, String>,
    ) -> QueryResult<Vec<usize>> {
        let query_vec = embed_query(signal.embedder.as_ref(), raw_query)
            .await
            .map_err(|e| QueryError::Backend(format!("query embedding failed: {}", e)))?;

        let filter = |c: &Chunk| passes_filters(c, filters);
        let found = tokio::time::timeout(
            self.settings.store_timeout,
            signal
                .store
                .vector_search(&query_vec, self.settings.candidate_k, &filter),
        )
        .await
        .map_err(|_| {
            QueryError::Backend(format!(
                "vector store timed out after {:?}",
                self.settings.store_timeout
            ))
        })?
        .map_err(|e| QueryError::Backend(format!("vector search failed: {:#}", e)))?;

        Ok(found
            .into_iter()
            .filter(|c| c.similarity >= self.settings.min_vector_similarity)
            .filter_map(|c| self.by_id.get(&c.chunk_id).copied())
            .collect())
    }

    fn by_score(&self, ia: usize, sa: f64, ib: usize, sb: f64) -> std::cmp::Ordering {
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.chunks[ia].chunk_id.cmp(&self.chunks[ib].chunk_id))
    }

    /// Collapse variants once per collapsible key that no filter pins. Each
    /// pass runs on the previous pass's output and treats two chunks as
    /// variants only when their ids match with that key's value removed.
    fn collapse(&self, ranked: Vec<(usize, f64)>, filters: &BTreeMap<String, String>) -> Vec<(usize, f64)> {
        self.metadata
            .collapse_keys()
            .into_iter()
            .filter(|k| !filters.contains_key(*k))
            .fold(ranked, |ranked, key| {
                let mut seen = HashSet::new();
                ranked
                    .into_iter()
                    .filter(|&(idx, _)| {
                        let chunk = &self.chunks[idx];
                        match chunk.metadata.get(key) {
                            Some(value) => seen.insert(remove_segment(&chunk.chunk_id, value)),
                            None => true,
                        }
                    })
                    .collect()
            })
    }

    fn hint(
        &self,
        query: &ParsedQuery,
        raw_query: &str,
        filters: &BTreeMap<String, String>,
        weights: &Weights,
    ) -> Hint {
        let mut suggested: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        if !filters.is_empty() {
            for idx in 0..self.chunks.len() {
                if self.lexical(idx, query, weights).0 <= 0.0 {
                    continue;
                }
                let chunk = &self.chunks[idx];
                for (key, active) in filters {
                    if let Some(v) = chunk.metadata.get(key) {
                        if v != active {
                            suggested.entry(key.clone()).or_default().insert(v.clone());
                        }
                    }
                }
            }
        }

        let message = if filters.is_empty() {
            format!(
                "No results for \"{}\". Try different or fewer terms.",
                raw_query
            )
        } else {
            let active: Vec<String> = filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!(
                "No results for \"{}\" with filters {}. Try a suggested filter value or remove a filter.",
                raw_query,
                active.join(", ")
            )
        };

        Hint {
            message,
            suggested_filters: suggested
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
        }
    }

    fn hit(&self, idx: usize, score: f64, query: &ParsedQuery, keys: Option<&[String]>) -> Hit {
        let chunk = &self.chunks[idx];
        let metadata = match keys {
            Some(keys) => chunk
                .metadata
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => chunk.metadata.clone(),
        };
        Hit {
            chunk_id: chunk.chunk_id.clone(),
            heading: chunk.heading.clone(),
            breadcrumb: chunk.breadcrumb.clone(),
            snippet: snippet(&chunk.content_text, &query.tokens),
            filepath: chunk.filepath.clone(),
            metadata,
            score,
        }
    }
}

/// Auto-include filter: a missing key matches every value.
pub fn passes_filters(chunk: &Chunk, filters: &BTreeMap<String, String>) -> bool {
    filters
        .iter()
        .all(|(k, v)| chunk.metadata.get(k).map_or(true, |cv| cv == v))
}

fn is_id_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'#' | b'.' | b'-' | b'_')
}

/// Remove every occurrence of `value` from `id` that spans whole segments
/// (bounded by `/ # . - _` or the string ends). Case-insensitive.
pub fn remove_segment(id: &str, value: &str) -> String {
    if value.is_empty() {
        return id.to_string();
    }
    let hay = id.to_ascii_lowercase();
    let needle = value.to_ascii_lowercase();
    let bytes = hay.as_bytes();

    let mut out = String::with_capacity(id.len());
    let mut cursor = 0;
    let mut search_from = 0;
    while let Some(found) = hay[search_from..].find(&needle) {
        let start = search_from + found;
        let end = start + needle.len();
        let before_ok = start == 0 || is_id_delimiter(bytes[start - 1]);
        let after_ok = end == bytes.len() || is_id_delimiter(bytes[end]);
        if before_ok && after_ok {
            out.push_str(&id[cursor..start]);
            cursor = end;
            search_from = end;
        } else {
            // Advance by one character to keep slicing on a char boundary.
            let step = hay[start..].chars().next().map_or(1, char::len_utf8);
            search_from = start + step;
        }
        if search_from >= hay.len() {
            break;
        }
    }
    out.push_str(&id[cursor..]);
    out
}

/// About [`SNIPPET_CHARS`] characters around the first query token match.
fn snippet(text: &str, tokens: &[String]) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= SNIPPET_CHARS {
        return text.to_string();
    }

    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let first_match = tokens
        .iter()
        .filter_map(|t| {
            let needle: Vec<char> = t.chars().collect();
            lowered
                .windows(needle.len().max(1))
                .position(|w| w == needle.as_slice())
        })
        .min();

    let mut start = first_match.map_or(0, |p| p.saturating_sub(SNIPPET_LEAD));
    if start + SNIPPET_CHARS > chars.len() {
        start = chars.len() - SNIPPET_CHARS;
    }
    let end = start + SNIPPET_CHARS;

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::build_chunks;
    use crate::embedding::EmbedError;
    use crate::manifest::TaxonomyConfig;
    use crate::models::ChunkingStrategy;
    use crate::store::memory::MemoryStore;
    use crate::store::IndexRow;
    use crate::taxonomy::{build_taxonomy, CorpusStats, IndexDescriptor, METADATA_VERSION};
    use async_trait::async_trait;

    fn tags(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn corpus() -> Vec<Chunk> {
        let mut chunks = Vec::new();
        chunks.extend(build_chunks(
            "sdk/python/retries.md",
            "# Retries\n\n## Retry policy\n\nConfigure the retry policy with backoff.\n",
            &ChunkingStrategy::default(),
            &tags(&[("language", "python"), ("scope", "api")]),
        ));
        chunks.extend(build_chunks(
            "sdk/go/retries.md",
            "# Retries\n\n## Retry policy\n\nConfigure the retry policy with backoff.\n",
            &ChunkingStrategy::default(),
            &tags(&[("language", "go"), ("scope", "api")]),
        ));
        chunks.extend(build_chunks(
            "guide/overview.md",
            "# Overview\n\n## Concepts\n\nClients send requests. A retry happens on failure.\n\n## Setup\n\nInstall the package.\n",
            &ChunkingStrategy::default(),
            &Metadata::new(),
        ));
        chunks.extend(build_chunks(
            "guide/errors.md",
            "# Errors\n\n## Timeouts\n\nTimeouts surface as errors.\n",
            &ChunkingStrategy::default(),
            &tags(&[("language", "python")]),
        ));
        chunks
    }

    fn metadata_for(chunks: &[Chunk]) -> CorpusMetadata {
        let mut declared = BTreeMap::new();
        declared.insert(
            "language".to_string(),
            TaxonomyConfig {
                vector_collapse: true,
                ..Default::default()
            },
        );
        CorpusMetadata {
            metadata_version: METADATA_VERSION.into(),
            corpus_description: "SDK docs".into(),
            instructions: None,
            taxonomy: build_taxonomy(chunks, &declared),
            stats: CorpusStats {
                chunk_count: chunks.len(),
                file_count: 4,
                built_at: chrono::Utc::now(),
                source_commit: None,
            },
            embedding: None,
            index: IndexDescriptor {
                path: "index.json".into(),
                table: "chunks".into(),
            },
        }
    }

    fn engine() -> SearchEngine {
        let chunks = corpus();
        let meta = metadata_for(&chunks);
        SearchEngine::new(chunks, meta, SearchSettings::default(), CursorCodec::unsigned())
    }

    fn ids(resp: &SearchResponse) -> Vec<&str> {
        resp.hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let err = engine().search(&SearchQuery::new("   ")).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_heading_matches_outrank_body_matches() {
        let resp = engine().search(&SearchQuery::new("retry")).await.unwrap();
        // The python/go pair collapses to its first-ranked member; "Retries"
        // headings do not match the token "retry".
        assert_eq!(
            ids(&resp),
            vec![
                "sdk/go/retries.md#retries/retry-policy",
                "guide/overview.md#overview/concepts",
            ]
        );
        assert!(resp.hint.is_none());
        assert!(resp.hits[0].score > resp.hits[1].score);
    }

    #[tokio::test]
    async fn test_collapse_runs_per_key() {
        let doc = "# Install\n\n## Install steps\n\nRun the installer.\n";
        let mut chunks = Vec::new();
        for (language, platform) in [("python", "linux"), ("go", "macos"), ("python", "macos")] {
            chunks.extend(build_chunks(
                &format!("sdk/{}/{}/setup.md", language, platform),
                doc,
                &ChunkingStrategy::default(),
                &tags(&[("language", language), ("platform", platform)]),
            ));
        }
        let mut meta = metadata_for(&chunks);
        let mut declared = BTreeMap::new();
        for key in ["language", "platform"] {
            declared.insert(
                key.to_string(),
                TaxonomyConfig {
                    vector_collapse: true,
                    ..Default::default()
                },
            );
        }
        meta.taxonomy = build_taxonomy(&chunks, &declared);
        let e = SearchEngine::new(chunks, meta, SearchSettings::default(), CursorCodec::unsigned());

        let resp = e.search(&SearchQuery::new("installer")).await.unwrap();
        // python/macos is a language variant of go/macos; python/linux differs
        // from go/macos in both keys and is kept.
        assert_eq!(
            ids(&resp),
            vec![
                "sdk/go/macos/setup.md#install/install-steps",
                "sdk/python/linux/setup.md#install/install-steps",
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_include_and_pinned_collapse_key() {
        let resp = engine()
            .search(&SearchQuery::new("retry").filter("language", "python"))
            .await
            .unwrap();
        let got = ids(&resp);
        assert!(got.contains(&"sdk/python/retries.md#retries/retry-policy"));
        // Untagged chunks apply to every language.
        assert!(got.contains(&"guide/overview.md#overview/concepts"));
        assert!(!got.iter().any(|id| id.starts_with("sdk/go/")));
    }

    #[tokio::test]
    async fn test_limit_zero_clamps_to_one_and_paginates() {
        let e = engine();
        let first = e.search(&SearchQuery::new("retry").limit(0)).await.unwrap();
        assert_eq!(first.hits.len(), 1);
        let cursor = first.next_cursor.clone().unwrap();

        let second = e
            .search(&SearchQuery::new("retry").limit(1).cursor(cursor.clone()))
            .await
            .unwrap();
        assert_eq!(second.hits.len(), 1);
        assert_ne!(second.hits[0].chunk_id, first.hits[0].chunk_id);

        let err = e
            .search(&SearchQuery::new("backoff").cursor(cursor))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCursor));
    }

    #[tokio::test]
    async fn test_last_page_has_no_cursor() {
        let resp = engine().search(&SearchQuery::new("retry").limit(50)).await.unwrap();
        assert!(resp.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_zero_results_hint_suggests_other_values() {
        let resp = engine()
            .search(&SearchQuery::new("timeouts").filter("language", "go"))
            .await
            .unwrap();
        assert!(resp.hits.is_empty());
        assert!(resp.next_cursor.is_none());
        let hint = resp.hint.unwrap();
        assert!(hint.message.contains("timeouts"));
        assert!(hint.message.contains("language=go"));
        assert_eq!(hint.suggested_filters["language"], vec!["python"]);
    }

    #[tokio::test]
    async fn test_unknown_filter_and_value_are_validation_errors() {
        let e = engine();
        let err = e
            .search(&SearchQuery::new("retry").filter("platform", "linux"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("language"));
        let err = e
            .search(&SearchQuery::new("retry").filter("language", "cobol"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("go, python"));
    }

    #[tokio::test]
    async fn test_taxonomy_keys_project_metadata() {
        let e = engine();
        let mut q = SearchQuery::new("retry policy");
        q.taxonomy_keys = Some(vec!["scope".into()]);
        let resp = e.search(&q).await.unwrap();
        assert_eq!(resp.hits[0].metadata, tags(&[("scope", "api")]));

        q.taxonomy_keys = Some(vec!["nope".into()]);
        assert!(e.search(&q).await.is_err());
    }

    #[tokio::test]
    async fn test_negative_weight_override_is_rejected() {
        let mut q = SearchQuery::new("retry");
        q.weights = Some(WeightOverrides {
            vector: Some(-0.5),
            ..Default::default()
        });
        assert!(engine().search(&q).await.is_err());

        q.weights = Some(WeightOverrides {
            lexical: Some(f64::NAN),
            ..Default::default()
        });
        assert!(engine().search(&q).await.is_err());
    }

    #[test]
    fn test_remove_segment_is_bounded() {
        assert_eq!(
            remove_segment("sdk/python/retry.md#retry", "python"),
            "sdk//retry.md#retry"
        );
        assert_eq!(
            remove_segment("sdk/go/retry.md#go-setup", "go"),
            "sdk//retry.md#-setup"
        );
        // Not a whole segment: left alone.
        assert_eq!(remove_segment("sdk/golang/x.md#a", "go"), "sdk/golang/x.md#a");
        assert_eq!(remove_segment("sdk/Python/x.md", "python"), "sdk//x.md");
    }

    #[test]
    fn test_snippet_window() {
        let text = format!("{} needle {}", "a ".repeat(300), "b ".repeat(300));
        let s = snippet(&text, &["needle".to_string()]);
        assert!(s.contains("needle"));
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
        assert!(s.chars().count() <= SNIPPET_CHARS + 6);

        assert_eq!(snippet("short", &["x".to_string()]), "short");
    }

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn model(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_vector_signal_fuses_and_adds_semantic_hits() {
        let chunks = corpus();
        let meta = metadata_for(&chunks);
        let store = MemoryStore::new();
        let rows = chunks
            .iter()
            .map(|c| IndexRow {
                chunk: c.clone(),
                // Only the setup chunk points along the query vector.
                vector: Some(if c.chunk_id == "guide/overview.md#overview/setup" {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }),
                file_fingerprint: "fp".into(),
            })
            .collect();
        store.insert_rows(rows).await.unwrap();

        let e = SearchEngine::new(chunks, meta, SearchSettings::default(), CursorCodec::unsigned())
            .with_vector_signal(VectorSignal {
                store: Arc::new(store),
                embedder: Arc::new(FixedEmbedder),
            });
        assert!(e.has_vector_signal());

        let resp = e.search(&SearchQuery::new("retry policy").limit(50)).await.unwrap();
        let got = ids(&resp);
        // Lexical + phrase + vector agreement keeps the policy chunk on top.
        assert_eq!(got[0], "sdk/go/retries.md#retries/retry-policy");
        // Semantic-only neighbour is included.
        assert!(got.contains(&"guide/overview.md#overview/setup"));
        for pair in resp.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_dissimilar_neighbours_leave_room_for_a_hint() {
        let chunks = corpus();
        let meta = metadata_for(&chunks);
        let store = MemoryStore::new();
        let rows = chunks
            .iter()
            .map(|c| IndexRow {
                chunk: c.clone(),
                vector: Some(vec![0.0, 1.0]),
                file_fingerprint: "fp".into(),
            })
            .collect();
        store.insert_rows(rows).await.unwrap();

        let e = SearchEngine::new(chunks, meta, SearchSettings::default(), CursorCodec::unsigned())
            .with_vector_signal(VectorSignal {
                store: Arc::new(store),
                embedder: Arc::new(FixedEmbedder),
            });
        let resp = e.search(&SearchQuery::new("zebra quartz")).await.unwrap();
        assert!(resp.hits.is_empty());
        assert!(resp.hint.is_some());
    }
}
