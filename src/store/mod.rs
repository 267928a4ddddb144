//! Storage abstraction for the built index.
//!
//! The [`IndexStore`] trait covers what the build pipeline and the search
//! engine need from a storage engine: bulk row insert, filtered vector
//! similarity queries, and the per-file fingerprints of the last build.
//! [`memory::MemoryStore`] is the bundled implementation; an external
//! vector/FTS engine can be plugged in behind the same trait.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Chunk;

/// One stored chunk with its optional vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub chunk: Chunk,
    /// `None` when embeddings are disabled or the chunk's batch failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// SHA-256 of the source file the chunk came from.
    pub file_fingerprint: String,
}

/// A nearest-neighbour match from [`IndexStore::vector_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorCandidate {
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
}

/// Predicate deciding which chunks a vector query may return.
pub type ChunkFilter<'a> = &'a (dyn Fn(&Chunk) -> bool + Send + Sync);

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_rows`](IndexStore::insert_rows) | Bulk insert chunk rows |
/// | [`vector_search`](IndexStore::vector_search) | Filtered cosine similarity search |
/// | [`file_fingerprints`](IndexStore::file_fingerprints) | Filepath → fingerprint of stored files |
/// | [`rows`](IndexStore::rows) | Every stored row, in insertion order |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn insert_rows(&self, rows: Vec<IndexRow>) -> Result<()>;

    /// Up to `limit` chunks passing `filter`, most similar first. Ties are
    /// broken by `chunk_id`. Rows without a vector never match.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: ChunkFilter<'_>,
    ) -> Result<Vec<VectorCandidate>>;

    async fn file_fingerprints(&self) -> Result<BTreeMap<String, String>>;

    async fn rows(&self) -> Result<Vec<IndexRow>>;
}
