//! Corpus metadata: the build-time snapshot served alongside the index.
//!
//! [`CorpusMetadata`] records the taxonomy (every tag key with its sorted
//! distinct values), corpus statistics, the embedding descriptor, and where
//! the index lives. It is computed once per build, written as
//! `corpus-metadata.json`, and re-validated when loaded at serve time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::manifest::TaxonomyConfig;
use crate::models::Chunk;

pub const METADATA_VERSION: &str = "1.0.0";
pub const SUPPORTED_MAJOR: u64 = 1;

pub const MAX_KEYS: usize = 64;
pub const MAX_KEY_LEN: usize = 64;
pub const MAX_VALUES_PER_KEY: usize = 512;
pub const MAX_VALUE_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    pub metadata_version: String,
    pub corpus_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub taxonomy: BTreeMap<String, TaxonomyEntry>,
    pub stats: CorpusStats,
    pub embedding: Option<EmbeddingDescriptor>,
    pub index: IndexDescriptor,
}

/// One taxonomy dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sorted, distinct values observed in the corpus.
    pub values: Vec<String>,
    #[serde(default)]
    pub vector_collapse: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub chunk_count: usize,
    pub file_count: usize,
    pub built_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDescriptor {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub path: String,
    pub table: String,
}

/// Merge declared taxonomy settings with the values observed on `chunks`.
///
/// Declared keys appear even when no chunk carries them.
pub fn build_taxonomy(
    chunks: &[Chunk],
    declared: &BTreeMap<String, TaxonomyConfig>,
) -> BTreeMap<String, TaxonomyEntry> {
    let mut observed: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for chunk in chunks {
        for (k, v) in &chunk.metadata {
            observed.entry(k.as_str()).or_default().insert(v.as_str());
        }
    }

    let mut taxonomy = BTreeMap::new();
    for (key, cfg) in declared {
        taxonomy.insert(
            key.clone(),
            TaxonomyEntry {
                description: cfg.description.clone(),
                values: Vec::new(),
                vector_collapse: cfg.vector_collapse,
                properties: cfg.properties.clone(),
            },
        );
    }
    for (key, values) in observed {
        let entry = taxonomy.entry(key.to_string()).or_insert_with(TaxonomyEntry::default);
        entry.values = values.into_iter().map(str::to_string).collect();
    }
    taxonomy
}

impl CorpusMetadata {
    pub fn validate(&self) -> Result<()> {
        let major = parse_major(&self.metadata_version)?;
        if major != SUPPORTED_MAJOR {
            bail!(
                "corpus metadata version {} is not supported (expected major {})",
                self.metadata_version,
                SUPPORTED_MAJOR
            );
        }

        if self.taxonomy.len() > MAX_KEYS {
            bail!(
                "taxonomy has {} keys (limit {})",
                self.taxonomy.len(),
                MAX_KEYS
            );
        }
        for (key, entry) in &self.taxonomy {
            if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
                bail!("taxonomy key '{}' must be 1..={} characters", key, MAX_KEY_LEN);
            }
            if entry.values.len() > MAX_VALUES_PER_KEY {
                bail!(
                    "taxonomy key '{}' has {} values (limit {})",
                    key,
                    entry.values.len(),
                    MAX_VALUES_PER_KEY
                );
            }
            if let Some(v) = entry.values.iter().find(|v| v.chars().count() > MAX_VALUE_LEN) {
                bail!(
                    "taxonomy value '{}' for key '{}' exceeds {} characters",
                    v,
                    key,
                    MAX_VALUE_LEN
                );
            }
        }

        if let Some(commit) = &self.stats.source_commit {
            validate_commit(commit)?;
        }
        if let Some(e) = &self.embedding {
            if e.dimensions == 0 {
                bail!("embedding.dimensions must be > 0");
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus metadata: {}", path.display()))?;
        let meta: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse corpus metadata: {}", path.display()))?;
        meta.validate()
            .with_context(|| format!("Invalid corpus metadata: {}", path.display()))?;
        Ok(meta)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write corpus metadata: {}", path.display()))?;
        Ok(())
    }

    /// Whether `value` is an enumerated value of `key`.
    pub fn allows(&self, key: &str, value: &str) -> bool {
        self.taxonomy
            .get(key)
            .is_some_and(|e| e.values.binary_search_by(|v| v.as_str().cmp(value)).is_ok())
    }

    /// Keys whose near-duplicates collapse in search results.
    pub fn collapse_keys(&self) -> Vec<&str> {
        self.taxonomy
            .iter()
            .filter(|(_, e)| e.vector_collapse)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

fn parse_major(version: &str) -> Result<u64> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        bail!("metadata_version '{}' is not MAJOR.MINOR.PATCH", version);
    }
    parts[0]
        .parse()
        .with_context(|| format!("metadata_version '{}' has an invalid major", version))
}

/// A source commit is a full 40-character lowercase hex SHA-1.
pub fn validate_commit(commit: &str) -> Result<()> {
    let ok = commit.len() == 40 && commit.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
    if !ok {
        bail!(
            "source_commit '{}' must be 40 lowercase hexadecimal characters",
            commit
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn chunk(id: &str, tags: &[(&str, &str)]) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            filepath: id.split('#').next().unwrap().to_string(),
            heading: "H".into(),
            heading_level: 2,
            content: "c".into(),
            content_text: "c".into(),
            breadcrumb: "H".into(),
            chunk_index: 0,
            metadata: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Metadata>(),
        }
    }

    fn meta(taxonomy: BTreeMap<String, TaxonomyEntry>) -> CorpusMetadata {
        CorpusMetadata {
            metadata_version: METADATA_VERSION.into(),
            corpus_description: "docs".into(),
            instructions: None,
            taxonomy,
            stats: CorpusStats {
                chunk_count: 0,
                file_count: 0,
                built_at: Utc::now(),
                source_commit: None,
            },
            embedding: None,
            index: IndexDescriptor {
                path: "index.json".into(),
                table: "chunks".into(),
            },
        }
    }

    #[test]
    fn test_build_taxonomy_sorts_values_and_keeps_declared() {
        let chunks = vec![
            chunk("a.md#x", &[("language", "rust")]),
            chunk("b.md#x", &[("language", "go"), ("scope", "api")]),
            chunk("c.md#x", &[("language", "rust")]),
        ];
        let mut declared = BTreeMap::new();
        declared.insert(
            "language".to_string(),
            TaxonomyConfig {
                vector_collapse: true,
                ..Default::default()
            },
        );
        declared.insert("audience".to_string(), TaxonomyConfig::default());

        let taxonomy = build_taxonomy(&chunks, &declared);
        assert_eq!(taxonomy["language"].values, vec!["go", "rust"]);
        assert!(taxonomy["language"].vector_collapse);
        assert_eq!(taxonomy["scope"].values, vec!["api"]);
        assert!(taxonomy["audience"].values.is_empty());

        let m = meta(taxonomy);
        assert!(m.allows("language", "go"));
        assert!(!m.allows("language", "java"));
        assert!(!m.allows("nope", "go"));
        assert_eq!(m.collapse_keys(), vec!["language"]);
    }

    #[test]
    fn test_version_checks() {
        let mut m = meta(BTreeMap::new());
        assert!(m.validate().is_ok());
        m.metadata_version = "1.4.2".into();
        assert!(m.validate().is_ok());
        m.metadata_version = "2.0.0".into();
        assert!(m.validate().is_err());
        m.metadata_version = "1.0".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_limits() {
        let mut taxonomy = BTreeMap::new();
        for i in 0..=MAX_KEYS {
            taxonomy.insert(format!("k{}", i), TaxonomyEntry::default());
        }
        assert!(meta(taxonomy).validate().is_err());

        let mut taxonomy = BTreeMap::new();
        taxonomy.insert(
            "k".to_string(),
            TaxonomyEntry {
                values: vec!["v".repeat(MAX_VALUE_LEN + 1)],
                ..Default::default()
            },
        );
        assert!(meta(taxonomy).validate().is_err());
    }

    #[test]
    fn test_commit_format() {
        assert!(validate_commit(&"a".repeat(40)).is_ok());
        assert!(validate_commit(&"A".repeat(40)).is_err());
        assert!(validate_commit("abc123").is_err());
    }

    #[test]
    fn test_save_and_load_revalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus-metadata.json");
        let m = meta(BTreeMap::new());
        m.save(&path).unwrap();
        assert_eq!(CorpusMetadata::load(&path).unwrap(), m);

        let mut bad = m.clone();
        bad.metadata_version = "9.0.0".into();
        bad.save(&path).unwrap();
        assert!(CorpusMetadata::load(&path).is_err());
    }
}
