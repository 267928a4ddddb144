//! Directory-scoped manifests and per-file rule resolution.
//!
//! A `docs-manifest.json` placed in any corpus directory configures every
//! file below it until a deeper manifest takes over. The nearest ancestor
//! wins; manifests are never merged with each other and the lookup never
//! walks above the corpus root.
//!
//! # Example
//!
//! ```json
//! {
//!   "version": 1,
//!   "strategy": { "chunk_by": "h2", "max_chunk_size": 4000 },
//!   "metadata": { "scope": "guide" },
//!   "taxonomy": {
//!     "language": { "vector_collapse": true, "description": "SDK language" }
//!   },
//!   "overrides": [
//!     { "pattern": "api/**/*.md", "strategy": { "chunk_by": "h3" }, "metadata": { "scope": "api" } }
//!   ]
//! }
//! ```
//!
//! Resolution precedence, lowest to highest: manifest defaults, matching
//! overrides in array order, frontmatter `metadata`, frontmatter
//! `docs_harness_metadata`, frontmatter `chunk_by`.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::frontmatter::parse_frontmatter;
use crate::models::{ChunkingStrategy, Metadata};
use crate::taxonomy::{MAX_KEY_LEN, MAX_VALUE_LEN};

pub const MANIFEST_FILE_NAME: &str = "docs-manifest.json";
pub const SUPPORTED_MANIFEST_VERSION: u32 = 1;

/// Per-key taxonomy settings declared in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxonomyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Near-duplicate chunks that differ only by this key's value are
    /// collapsed in search results unless the key is filtered on.
    #[serde(default)]
    pub vector_collapse: bool,
    /// Free-form properties attached to individual values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// A glob-scoped rule. Later overrides win for the fields they set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Override {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ChunkingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub strategy: ChunkingStrategy,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub taxonomy: BTreeMap<String, TaxonomyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub overrides: Vec<Override>,
}

/// A parsed, validated manifest together with its compiled override globs.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    /// Absolute path of the manifest file.
    pub path: PathBuf,
    /// Directory that override patterns are relative to.
    pub base_dir: PathBuf,
    pub manifest: Manifest,
    matchers: Vec<GlobMatcher>,
}

impl LoadedManifest {
    /// Parse and validate manifest JSON read from `path`.
    pub fn from_json(path: &Path, json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        validate_manifest(&manifest)
            .with_context(|| format!("Invalid manifest: {}", path.display()))?;

        let mut matchers = Vec::with_capacity(manifest.overrides.len());
        for ov in &manifest.overrides {
            let glob = Glob::new(&ov.pattern).with_context(|| {
                format!(
                    "Invalid override pattern '{}' in {}",
                    ov.pattern,
                    path.display()
                )
            })?;
            matchers.push(glob.compile_matcher());
        }

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            path: path.to_path_buf(),
            base_dir,
            manifest,
            matchers,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::from_json(path, &json)
    }

    /// Overrides whose pattern matches `relative` (a `/`-separated path
    /// relative to [`Self::base_dir`]), in declaration order.
    fn matching_overrides<'a>(&'a self, relative: &'a str) -> impl Iterator<Item = &'a Override> {
        self.manifest
            .overrides
            .iter()
            .zip(&self.matchers)
            .filter(move |(_, m)| m.is_match(relative))
            .map(|(ov, _)| ov)
    }
}

fn validate_manifest(manifest: &Manifest) -> Result<()> {
    if manifest.version != SUPPORTED_MANIFEST_VERSION {
        bail!(
            "unsupported manifest version {} (expected {})",
            manifest.version,
            SUPPORTED_MANIFEST_VERSION
        );
    }
    validate_strategy(&manifest.strategy).context("strategy")?;
    validate_tags(&manifest.metadata).context("metadata")?;
    for key in manifest.taxonomy.keys() {
        validate_key(key).context("taxonomy")?;
    }
    for (i, ov) in manifest.overrides.iter().enumerate() {
        if ov.pattern.trim().is_empty() {
            bail!("overrides[{}].pattern must not be empty", i);
        }
        if let Some(strategy) = &ov.strategy {
            validate_strategy(strategy).with_context(|| format!("overrides[{}].strategy", i))?;
        }
        if let Some(metadata) = &ov.metadata {
            validate_tags(metadata).with_context(|| format!("overrides[{}].metadata", i))?;
        }
    }
    Ok(())
}

/// Size bounds must be positive and ordered.
pub fn validate_strategy(strategy: &ChunkingStrategy) -> Result<()> {
    if strategy.max_chunk_size == Some(0) {
        bail!("max_chunk_size must be > 0");
    }
    if strategy.min_chunk_size == Some(0) {
        bail!("min_chunk_size must be > 0");
    }
    if let (Some(min), Some(max)) = (strategy.min_chunk_size, strategy.max_chunk_size) {
        if min > max {
            bail!(
                "min_chunk_size ({}) must not exceed max_chunk_size ({})",
                min,
                max
            );
        }
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
        bail!("tag key '{}' must be 1..={} characters", key, MAX_KEY_LEN);
    }
    Ok(())
}

fn validate_tags(tags: &Metadata) -> Result<()> {
    for (k, v) in tags {
        validate_key(k)?;
        if v.chars().count() > MAX_VALUE_LEN {
            bail!(
                "value for tag '{}' exceeds {} characters",
                k,
                MAX_VALUE_LEN
            );
        }
    }
    Ok(())
}

/// Lazily loaded manifests for one build, keyed by absolute directory.
///
/// Owned by the caller and threaded through lookups; a directory without a
/// manifest is remembered as `None` so each directory is probed at most once.
#[derive(Debug, Default)]
pub struct ManifestCache {
    dirs: HashMap<PathBuf, Option<Arc<LoadedManifest>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directories probed so far.
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    fn manifest_in(&mut self, dir: &Path) -> Result<Option<Arc<LoadedManifest>>> {
        if let Some(cached) = self.dirs.get(dir) {
            return Ok(cached.clone());
        }
        let candidate = dir.join(MANIFEST_FILE_NAME);
        let loaded = if candidate.is_file() {
            let manifest = LoadedManifest::load(&candidate)?;
            tracing::debug!(path = %candidate.display(), "loaded manifest");
            Some(Arc::new(manifest))
        } else {
            None
        };
        self.dirs.insert(dir.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Taxonomy declared across every manifest loaded so far, outermost
    /// first. A key declared differently by two manifests is an error.
    pub fn declared_taxonomy(&self) -> Result<BTreeMap<String, TaxonomyConfig>> {
        let mut loaded: Vec<&LoadedManifest> = self.dirs.values().flatten().map(Arc::as_ref).collect();
        loaded.sort_by(|a, b| {
            a.path
                .components()
                .count()
                .cmp(&b.path.components().count())
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut merged: BTreeMap<String, (TaxonomyConfig, &Path)> = BTreeMap::new();
        for m in loaded {
            for (key, cfg) in &m.manifest.taxonomy {
                match merged.get(key) {
                    Some((existing, source)) if existing != cfg => bail!(
                        "taxonomy key '{}' is declared differently in {} and {}",
                        key,
                        source.display(),
                        m.path.display()
                    ),
                    Some(_) => {}
                    None => {
                        merged.insert(key.clone(), (cfg.clone(), m.path.as_path()));
                    }
                }
            }
        }
        Ok(merged.into_iter().map(|(k, (cfg, _))| (k, cfg)).collect())
    }

    /// Nearest manifest at or above `file`'s directory, stopping at
    /// `corpus_root` inclusive.
    pub fn find_nearest(
        &mut self,
        corpus_root: &Path,
        file: &Path,
    ) -> Result<Option<Arc<LoadedManifest>>> {
        if !file.starts_with(corpus_root) {
            bail!(
                "{} is outside the corpus root {}",
                file.display(),
                corpus_root.display()
            );
        }

        let mut dir = file.parent();
        while let Some(current) = dir {
            if !current.starts_with(corpus_root) {
                break;
            }
            if let Some(found) = self.manifest_in(current)? {
                return Ok(Some(found));
            }
            if current == corpus_root {
                break;
            }
            dir = current.parent();
        }
        Ok(None)
    }
}

/// Effective rules for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub strategy: ChunkingStrategy,
    pub metadata: Metadata,
    /// Manifest that applied, or `None` when the file had no manifest and
    /// the default `h2` strategy was used.
    pub manifest_path: Option<PathBuf>,
}

/// Merge manifest and frontmatter rules for `file`.
///
/// `markdown`, when given, is inspected for frontmatter directives; a
/// malformed frontmatter block is an error naming the file.
pub fn resolve(
    file: &Path,
    manifest: Option<&LoadedManifest>,
    markdown: Option<&str>,
) -> Result<Resolution> {
    let mut strategy = ChunkingStrategy::default();
    let mut metadata = Metadata::new();
    let mut manifest_path = None;

    match manifest {
        Some(loaded) => {
            strategy = loaded.manifest.strategy.clone();
            metadata = loaded.manifest.metadata.clone();
            manifest_path = Some(loaded.path.clone());

            let relative = file
                .strip_prefix(&loaded.base_dir)
                .unwrap_or(file)
                .to_string_lossy()
                .replace('\\', "/");
            for ov in loaded.matching_overrides(&relative) {
                if let Some(s) = &ov.strategy {
                    strategy = s.clone();
                }
                if let Some(m) = &ov.metadata {
                    for (k, v) in m {
                        metadata.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        None => {
            tracing::debug!(file = %file.display(), "no manifest applies; using default h2 strategy");
        }
    }

    if let Some(markdown) = markdown {
        let (fm, _) = parse_frontmatter(markdown)
            .with_context(|| format!("Invalid frontmatter in {}", file.display()))?;
        for (k, v) in fm.merged_metadata() {
            metadata.insert(k, v);
        }
        if let Some(chunk_by) = fm.chunk_by {
            strategy.chunk_by = chunk_by;
        }
    }

    Ok(Resolution {
        strategy,
        metadata,
        manifest_path,
    })
}
