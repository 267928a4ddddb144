//! Core data models used throughout docs-harness.
//!
//! These types represent the chunks, chunking strategies, and tag maps that
//! flow from the manifest resolver through the chunk builder and into the
//! search engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed tag map attached to every chunk.
///
/// A `BTreeMap` keeps serialization and fingerprinting order-independent.
pub type Metadata = BTreeMap<String, String>;

/// Heading level at which a document is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkBy {
    H1,
    #[default]
    H2,
    H3,
    /// The whole file is a single chunk.
    File,
}

impl ChunkBy {
    /// Maximum heading level that opens a new chunk, or `None` for `file`.
    pub fn split_level(self) -> Option<u8> {
        match self {
            ChunkBy::H1 => Some(1),
            ChunkBy::H2 => Some(2),
            ChunkBy::H3 => Some(3),
            ChunkBy::File => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkBy::H1 => "h1",
            ChunkBy::H2 => "h2",
            ChunkBy::H3 => "h3",
            ChunkBy::File => "file",
        }
    }

    /// Parse a frontmatter hint such as `"h3"` or `"file"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "h1" => Some(ChunkBy::H1),
            "h2" => Some(ChunkBy::H2),
            "h3" => Some(ChunkBy::H3),
            "file" => Some(ChunkBy::File),
            _ => None,
        }
    }
}

/// How a file is cut into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ChunkingStrategy {
    #[serde(default)]
    pub chunk_by: ChunkBy,
    /// Chunks longer than this many characters are split at paragraph boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_size: Option<usize>,
    /// A final chunk shorter than this many characters is merged backwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_chunk_size: Option<usize>,
}

/// A retrievable unit of documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `filepath#heading/path`, unique across the corpus.
    pub chunk_id: String,
    /// Corpus-relative path with `/` separators.
    pub filepath: String,
    pub heading: String,
    /// `0` for preamble and whole-file chunks without a heading.
    pub heading_level: u8,
    /// Raw markdown, fences intact.
    pub content: String,
    /// Plain-text projection of `content`, used only for scoring.
    pub content_text: String,
    pub breadcrumb: String,
    pub chunk_index: usize,
    pub metadata: Metadata,
}

impl Chunk {
    /// Text submitted to the embedding provider for this chunk.
    pub fn embedding_text(&self) -> String {
        if self.breadcrumb.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.breadcrumb, self.content)
        }
    }
}
