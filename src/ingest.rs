//! Build pipeline orchestration.
//!
//! Coordinates the full build: corpus walk → manifest resolution →
//! frontmatter stripping → chunking → incremental embedding → storage.
//! Writes two artifacts under `output.dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `index.json` | Chunk rows with optional vectors and file fingerprints |
//! | `corpus-metadata.json` | Taxonomy, stats, embedding descriptor |
//!
//! The embedding cache (`embedding-cache.json` by default) makes rebuilds
//! of an unchanged corpus free: every chunk is a cache hit and the provider
//! is never called. Cache failures are logged and never fail a build.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::build_chunks;
use crate::config::Config;
use crate::cursor::CursorCodec;
use crate::embed_cache::{embed_incremental, EmbedInput, EmbedOptions, EmbedStats, EmbeddingCache};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::fingerprint::file_fingerprint;
use crate::frontmatter::parse_frontmatter;
use crate::manifest::{resolve, ManifestCache, MANIFEST_FILE_NAME};
use crate::models::Chunk;
use crate::search::{SearchEngine, SearchSettings, VectorSignal};
use crate::store::memory::{MemoryStore, TABLE_NAME};
use crate::store::{IndexRow, IndexStore};
use crate::taxonomy::{
    build_taxonomy, CorpusMetadata, CorpusStats, EmbeddingDescriptor, IndexDescriptor,
    METADATA_VERSION,
};

pub const INDEX_FILE_NAME: &str = "index.json";
pub const METADATA_FILE_NAME: &str = "corpus-metadata.json";
pub const CACHE_FILE_NAME: &str = "embedding-cache.json";

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Re-embed every chunk, ignoring cached vectors.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub files: usize,
    pub chunks: usize,
    /// Files whose bytes match the previous index.
    pub unchanged_files: usize,
    /// `None` when embeddings are disabled.
    pub embedding: Option<EmbedStats>,
    pub taxonomy_keys: usize,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// One corpus file selected for indexing.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the corpus root.
    pub relative: String,
}

/// Files under `corpus.root` matching the include globs and none of the
/// exclude globs, sorted by relative path.
pub fn walk_corpus(config: &Config) -> Result<Vec<CorpusFile>> {
    let root = &config.corpus.root;
    if !root.is_dir() {
        bail!("corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.corpus.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.corpus.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.corpus.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if relative == MANIFEST_FILE_NAME || relative.ends_with(&format!("/{}", MANIFEST_FILE_NAME)) {
            continue;
        }
        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }
        files.push(CorpusFile {
            path: path.to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Build the index and corpus metadata for `config`, creating a provider
/// from the embedding configuration.
pub async fn run_build(config: &Config, options: &BuildOptions) -> Result<BuildReport> {
    let provider = create_provider(&config.embedding)?;
    run_build_with_provider(config, options, provider).await
}

/// Like [`run_build`], with an explicit provider. A provider named
/// `disabled` skips embedding.
pub async fn run_build_with_provider(
    config: &Config,
    options: &BuildOptions,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<BuildReport> {
    let root = &config.corpus.root;
    let files = walk_corpus(config)?;
    tracing::info!(root = %root.display(), files = files.len(), "building corpus index");

    let mut manifests = ManifestCache::new();
    let mut chunks: Vec<(Chunk, String)> = Vec::new();
    let mut inputs: Vec<EmbedInput> = Vec::new();
    let mut fingerprints: BTreeMap<String, String> = BTreeMap::new();

    for file in &files {
        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;
        let fp = file_fingerprint(&bytes);
        let text = String::from_utf8(bytes)
            .with_context(|| format!("{} is not valid UTF-8", file.path.display()))?;

        let manifest = manifests.find_nearest(root, &file.path)?;
        let resolution = resolve(&file.path, manifest.as_deref(), Some(text.as_str()))?;
        let (_, body) = parse_frontmatter(&text)
            .with_context(|| format!("Invalid frontmatter in {}", file.path.display()))?;

        let file_chunks = build_chunks(&file.relative, body, &resolution.strategy, &resolution.metadata);
        tracing::debug!(
            file = %file.relative,
            chunks = file_chunks.len(),
            chunk_by = resolution.strategy.chunk_by.as_str(),
            "chunked"
        );
        for chunk in file_chunks {
            inputs.push(EmbedInput::from_chunk(&chunk, &resolution.strategy));
            chunks.push((chunk, fp.clone()));
        }
        fingerprints.insert(file.relative.clone(), fp);
    }

    let mut seen = HashSet::with_capacity(chunks.len());
    for (chunk, _) in &chunks {
        if !seen.insert(chunk.chunk_id.as_str()) {
            bail!(
                "duplicate chunk id '{}'; rename a heading or adjust the chunking strategy",
                chunk.chunk_id
            );
        }
    }

    let index_path = config.index_path();
    let previous = previous_fingerprints(&index_path).await;
    let unchanged_files = fingerprints
        .iter()
        .filter(|(path, fp)| previous.get(*path) == Some(*fp))
        .count();

    let root_manifest = manifests.find_nearest(root, &root.join(MANIFEST_FILE_NAME))?;
    let declared = manifests.declared_taxonomy()?;
    let bare_chunks: Vec<Chunk> = chunks.iter().map(|(c, _)| c.clone()).collect();
    let taxonomy = build_taxonomy(&bare_chunks, &declared);

    let embedding_enabled = provider.name() != "disabled";
    let (mut vectors, embed_stats) = if embedding_enabled {
        let cache_path = config.cache_path();
        let prior = EmbeddingCache::load_or_empty(&cache_path);
        let embed_options = EmbedOptions {
            batch_size: config.embedding.batch_size,
            max_concurrency: config.embedding.max_concurrency,
            max_retries: config.embedding.max_retries,
            force: options.force,
            ..Default::default()
        };
        let outcome = embed_incremental(&inputs, provider.as_ref(), prior, &embed_options).await;
        outcome.cache.save_best_effort(&cache_path);
        (outcome.vectors, Some(outcome.stats))
    } else {
        (Default::default(), None)
    };

    let metadata = CorpusMetadata {
        metadata_version: METADATA_VERSION.to_string(),
        corpus_description: config.corpus.description.clone(),
        instructions: root_manifest.as_ref().and_then(|m| m.manifest.instructions.clone()),
        taxonomy,
        stats: CorpusStats {
            chunk_count: chunks.len(),
            file_count: files.len(),
            built_at: chrono::Utc::now(),
            source_commit: config.corpus.source_commit.clone(),
        },
        embedding: embedding_enabled.then(|| EmbeddingDescriptor {
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            dimensions: provider.dims(),
        }),
        index: IndexDescriptor {
            path: INDEX_FILE_NAME.to_string(),
            table: TABLE_NAME.to_string(),
        },
    };
    metadata.validate().context("Invalid corpus metadata")?;

    let chunk_count = chunks.len();
    let rows: Vec<IndexRow> = chunks
        .into_iter()
        .map(|(chunk, file_fingerprint)| IndexRow {
            vector: vectors.remove(&chunk.chunk_id),
            chunk,
            file_fingerprint,
        })
        .collect();
    let store = MemoryStore::new();
    store.insert_rows(rows).await?;
    store.persist(&index_path)?;

    let metadata_path = config.metadata_path();
    metadata.save(&metadata_path)?;

    tracing::info!(
        files = files.len(),
        chunks = chunk_count,
        unchanged_files,
        index = %index_path.display(),
        "build complete"
    );

    Ok(BuildReport {
        files: files.len(),
        chunks: chunk_count,
        unchanged_files,
        embedding: embed_stats,
        taxonomy_keys: metadata.taxonomy.len(),
        index_path,
        metadata_path,
    })
}

async fn previous_fingerprints(index_path: &Path) -> BTreeMap<String, String> {
    let store = match MemoryStore::open_or_empty(index_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "previous index unreadable; treating every file as changed");
            return BTreeMap::new();
        }
    };
    store.file_fingerprints().await.unwrap_or_default()
}

/// Load the built artifacts for `config` into a [`SearchEngine`].
///
/// The vector signal is attached when the index was built with embeddings
/// and the configured provider still matches the recorded descriptor.
pub async fn load_engine(config: &Config) -> Result<SearchEngine> {
    let metadata_path = config.metadata_path();
    let metadata = CorpusMetadata::load(&metadata_path)
        .context("Corpus metadata missing or invalid; run `docs-harness build` first")?;

    let store = Arc::new(MemoryStore::open(&config.index_path())?);
    let chunks: Vec<Chunk> = store.rows().await?.into_iter().map(|r| r.chunk).collect();

    let cursor = match config.cursor_secret() {
        Some(secret) => CursorCodec::with_secret(&secret)?,
        None => CursorCodec::unsigned(),
    };
    let engine = SearchEngine::new(
        chunks,
        metadata.clone(),
        SearchSettings::from_config(&config.search),
        cursor,
    );

    let Some(recorded) = &metadata.embedding else {
        return Ok(engine);
    };
    if !config.embedding.is_enabled() {
        tracing::info!("index has vectors but embeddings are disabled; using lexical ranking only");
        return Ok(engine);
    }

    let embedder = create_provider(&config.embedding)?;
    if embedder.name() != recorded.provider
        || embedder.model() != recorded.model
        || embedder.dims() != recorded.dimensions
    {
        tracing::warn!(
            built_with = %format!("{}/{}", recorded.provider, recorded.model),
            configured = %format!("{}/{}", embedder.name(), embedder.model()),
            "embedding configuration differs from the index; rebuild to enable semantic ranking"
        );
        return Ok(engine);
    }

    Ok(engine.with_vector_signal(VectorSignal { store, embedder }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config(tmp: &TempDir) -> Config {
        let toml = format!(
            "[corpus]\nroot = {:?}\nexclude_globs = [\"drafts/**\"]\n\n[output]\ndir = {:?}\n",
            tmp.path().join("docs"),
            tmp.path().join("out")
        );
        parse_config(&toml).unwrap()
    }

    #[test]
    fn test_walk_applies_globs_and_default_excludes() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        write(&docs, "b.md", "# B");
        write(&docs, "a/a.md", "# A");
        write(&docs, "notes.txt", "x");
        write(&docs, "drafts/wip.md", "# WIP");
        write(&docs, "node_modules/pkg/readme.md", "# Pkg");
        write(&docs, MANIFEST_FILE_NAME, "{\"version\":1}");

        let files = walk_corpus(&config(&tmp)).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["a/a.md", "b.md"]);
    }

    #[tokio::test]
    async fn test_repeated_headings_build_with_distinct_ids() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        write(&docs, "a.md", "# A\n\nx\n\n# A\n\ny\n\n# A 2\n\nz\n");
        let cfg = config(&tmp);
        let report = run_build(&cfg, &BuildOptions::default()).await.unwrap();
        assert_eq!(report.chunks, 3);

        let engine = load_engine(&cfg).await.unwrap();
        for id in ["a.md#a", "a.md#a-2", "a.md#a-2-2"] {
            assert_eq!(engine.get_doc(id, 0).unwrap().chunk_id, id);
        }
    }

    #[tokio::test]
    async fn test_build_writes_artifacts_and_counts_unchanged() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        write(
            &docs,
            MANIFEST_FILE_NAME,
            r#"{"version":1,"instructions":"Prefer the guide.","taxonomy":{"language":{"description":"SDK"}}}"#,
        );
        write(&docs, "guide.md", "# Guide\n\n## Install\n\nRun it.\n");
        write(
            &docs,
            "sdk/py.md",
            "---\nmetadata:\n  language: python\n---\n# Python\n\n## Client\n\nUse it.\n",
        );
        let cfg = config(&tmp);

        let first = run_build(&cfg, &BuildOptions::default()).await.unwrap();
        assert_eq!(first.files, 2);
        assert_eq!(first.chunks, 4);
        assert_eq!(first.unchanged_files, 0);
        assert!(first.embedding.is_none());
        assert!(first.index_path.is_file());

        let meta = CorpusMetadata::load(&first.metadata_path).unwrap();
        assert_eq!(meta.taxonomy["language"].values, vec!["python"]);
        assert_eq!(meta.instructions.as_deref(), Some("Prefer the guide."));
        assert!(meta.embedding.is_none());

        write(&docs, "guide.md", "# Guide\n\n## Install\n\nRun it twice.\n");
        let second = run_build(&cfg, &BuildOptions::default()).await.unwrap();
        assert_eq!(second.unchanged_files, 1);

        let engine = load_engine(&cfg).await.unwrap();
        assert_eq!(engine.chunk_count(), 4);
        assert!(!engine.has_vector_signal());
        let doc = engine.get_doc("sdk/py.md#python/client", 0).unwrap();
        assert!(!doc.text.contains("metadata:"));
    }

    #[tokio::test]
    async fn test_nested_manifest_taxonomy_reaches_corpus_metadata() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        write(
            &docs,
            MANIFEST_FILE_NAME,
            r#"{"version":1,"taxonomy":{"language":{"vector_collapse":true}}}"#,
        );
        write(
            &docs,
            "sdk/docs-manifest.json",
            r#"{"version":1,"metadata":{"platform":"linux"},"taxonomy":{"platform":{"vector_collapse":true}}}"#,
        );
        write(&docs, "sdk/setup.md", "# Setup\n\n## Steps\n\nRun it.\n");

        let report = run_build(&config(&tmp), &BuildOptions::default()).await.unwrap();
        let meta = CorpusMetadata::load(&report.metadata_path).unwrap();
        assert!(meta.taxonomy["language"].vector_collapse);
        assert!(meta.taxonomy["platform"].vector_collapse);
        assert_eq!(meta.taxonomy["platform"].values, vec!["linux"]);
    }

    #[tokio::test]
    async fn test_invalid_frontmatter_names_the_file() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        write(&docs, "bad.md", "---\nchunk_by: h9\n---\n# Bad\n");
        let err = run_build(&config(&tmp), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("bad.md"));
    }

    #[tokio::test]
    async fn test_load_engine_without_build_fails() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        assert!(load_engine(&config(&tmp)).await.is_err());
    }
}
