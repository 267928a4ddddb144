//! In-memory [`IndexStore`] persisted as a single JSON file.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over every stored vector.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;

use super::{ChunkFilter, IndexRow, IndexStore, VectorCandidate};

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const TABLE_NAME: &str = "chunks";

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    table: String,
    rows: Vec<IndexRow>,
}

/// In-memory store for the bundled build/serve pipeline and tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<IndexRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store written by [`MemoryStore::persist`].
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        let file: IndexFile = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse index: {}", path.display()))?;
        if file.version != INDEX_FORMAT_VERSION {
            anyhow::bail!(
                "unsupported index version {} (expected {})",
                file.version,
                INDEX_FORMAT_VERSION
            );
        }
        Ok(Self {
            rows: RwLock::new(file.rows),
        })
    }

    /// Like [`MemoryStore::open`], but a missing file yields an empty store.
    pub fn open_or_empty(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = IndexFile {
            version: INDEX_FORMAT_VERSION,
            table: TABLE_NAME.to_string(),
            rows: self.read()?.clone(),
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&file)?)
            .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace index: {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexRow>>> {
        self.rows
            .read()
            .map_err(|_| anyhow::anyhow!("index store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexRow>>> {
        self.rows
            .write()
            .map_err(|_| anyhow::anyhow!("index store lock poisoned"))
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn insert_rows(&self, rows: Vec<IndexRow>) -> Result<()> {
        self.write()?.extend(rows);
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: ChunkFilter<'_>,
    ) -> Result<Vec<VectorCandidate>> {
        let rows = self.read()?;
        let mut candidates: Vec<VectorCandidate> = rows
            .iter()
            .filter(|row| filter(&row.chunk))
            .filter_map(|row| {
                let v = row.vector.as_ref()?;
                Some(VectorCandidate {
                    chunk_id: row.chunk.chunk_id.clone(),
                    similarity: cosine_similarity(query_vec, v) as f64,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn file_fingerprints(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .read()?
            .iter()
            .map(|row| (row.chunk.filepath.clone(), row.file_fingerprint.clone()))
            .collect())
    }

    async fn rows(&self) -> Result<Vec<IndexRow>> {
        Ok(self.read()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};

    fn row(id: &str, lang: Option<&str>, vector: Option<Vec<f32>>) -> IndexRow {
        let mut metadata = Metadata::new();
        if let Some(l) = lang {
            metadata.insert("language".into(), l.into());
        }
        let filepath = id.split('#').next().unwrap().to_string();
        IndexRow {
            chunk: Chunk {
                chunk_id: id.into(),
                filepath: filepath.clone(),
                heading: "H".into(),
                heading_level: 2,
                content: "c".into(),
                content_text: "c".into(),
                breadcrumb: "H".into(),
                chunk_index: 0,
                metadata,
            },
            vector,
            file_fingerprint: format!("fp-{}", filepath),
        }
    }

    #[tokio::test]
    async fn test_vector_search_orders_and_filters() {
        let store = MemoryStore::new();
        store
            .insert_rows(vec![
                row("a.md#x", Some("rust"), Some(vec![1.0, 0.0])),
                row("b.md#x", Some("go"), Some(vec![0.9, 0.1])),
                row("c.md#x", None, Some(vec![0.0, 1.0])),
                row("d.md#x", Some("rust"), None),
            ])
            .await
            .unwrap();

        let all = store.vector_search(&[1.0, 0.0], 10, &|_: &Chunk| true).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a.md#x", "b.md#x", "c.md#x"]);

        let rust_only = |c: &Chunk| c.metadata.get("language").map(String::as_str) != Some("go");
        let some = store.vector_search(&[1.0, 0.0], 1, &rust_only).await.unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].chunk_id, "a.md#x");
    }

    #[tokio::test]
    async fn test_persist_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/index.json");
        let store = MemoryStore::new();
        store
            .insert_rows(vec![row("a.md#x", None, Some(vec![0.5])), row("b.md#y", None, None)])
            .await
            .unwrap();
        store.persist(&path).unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.rows().await.unwrap(), store.rows().await.unwrap());
        let fps = reopened.file_fingerprints().await.unwrap();
        assert_eq!(fps["a.md"], "fp-a.md");

        assert!(MemoryStore::open_or_empty(&dir.path().join("none.json"))
            .unwrap()
            .is_empty());
    }
}
