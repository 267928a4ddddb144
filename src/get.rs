//! Document retrieval by chunk id.
//!
//! `get_doc` returns a chunk together with a window of its neighbours from
//! the same file; `list_filepaths` enumerates the indexed files. Both read the
//! engine's immutable chunk set and are used by the CLI and the protocol
//! dispatcher.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{QueryError, QueryResult};
use crate::models::{Chunk, Metadata};
use crate::search::SearchEngine;

/// Smallest accepted `context`; `-1` means the whole file.
pub const MIN_CONTEXT: i64 = -1;
pub const MAX_CONTEXT: i64 = 5;

/// Response for `get_doc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocResponse {
    pub chunk_id: String,
    pub filepath: String,
    /// Chunk ids included in `text`, in document order.
    pub chunk_ids: Vec<String>,
    pub text: String,
}

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub filepath: String,
    /// Id of the file's first chunk.
    pub chunk_id: String,
    pub metadata: Metadata,
}

/// Split `filepath#anchor`, rejecting ids with an empty side.
pub fn parse_chunk_id(chunk_id: &str) -> QueryResult<(&str, &str)> {
    match chunk_id.split_once('#') {
        Some((path, anchor)) if !path.is_empty() && !anchor.is_empty() => Ok((path, anchor)),
        _ => Err(QueryError::MalformedChunkId(chunk_id.to_string())),
    }
}

impl SearchEngine {
    /// A chunk plus `context` neighbours on each side (`-1` for the whole
    /// file). Each chunk is labelled `Target` or `Context: ±k` with its
    /// position in the file.
    pub fn get_doc(&self, chunk_id: &str, context: i64) -> QueryResult<DocResponse> {
        let chunk_id = chunk_id.trim();
        parse_chunk_id(chunk_id)?;
        if !(MIN_CONTEXT..=MAX_CONTEXT).contains(&context) {
            return Err(QueryError::validation(format!(
                "context must be between {} and {} (got {})",
                MIN_CONTEXT, MAX_CONTEXT, context
            )));
        }

        let &target = self
            .by_id
            .get(chunk_id)
            .ok_or_else(|| QueryError::ChunkNotFound(chunk_id.to_string()))?;
        let target_chunk = &self.chunks[target];
        let range = self
            .files
            .get(&target_chunk.filepath)
            .cloned()
            .unwrap_or(target..target + 1);

        let window = if context < 0 {
            range.clone()
        } else {
            let k = context as usize;
            target.saturating_sub(k).max(range.start)..(target + k + 1).min(range.end)
        };

        let total = range.len();
        let sections: Vec<String> = window
            .clone()
            .map(|i| {
                let offset = i as i64 - target as i64;
                let label = if offset == 0 {
                    "Target".to_string()
                } else {
                    format!("Context: {:+}", offset)
                };
                render(&label, i - range.start + 1, total, &self.chunks[i])
            })
            .collect();

        Ok(DocResponse {
            chunk_id: chunk_id.to_string(),
            filepath: target_chunk.filepath.clone(),
            chunk_ids: window.map(|i| self.chunks[i].chunk_id.clone()).collect(),
            text: sections.join("\n\n---\n\n"),
        })
    }

    /// Files whose first chunk carries every filter value exactly. Untagged
    /// files do not match a filter on that key.
    pub fn list_filepaths(&self, filters: &BTreeMap<String, String>) -> QueryResult<Vec<FileEntry>> {
        self.validate_filters(filters)?;
        Ok(self
            .files
            .iter()
            .filter_map(|(path, range)| {
                let first = &self.chunks[range.start];
                let matches = filters
                    .iter()
                    .all(|(k, v)| first.metadata.get(k) == Some(v));
                matches.then(|| FileEntry {
                    filepath: path.clone(),
                    chunk_id: first.chunk_id.clone(),
                    metadata: first.metadata.clone(),
                })
            })
            .collect())
    }

    /// Raw markdown of a whole file, reassembled from its chunks.
    pub fn read_file(&self, filepath: &str) -> Option<String> {
        let range = self.files.get(filepath)?;
        let parts: Vec<&str> = self.chunks[range.clone()]
            .iter()
            .map(|c| c.content.as_str())
            .collect();
        Some(parts.join("\n\n"))
    }
}

fn render(label: &str, position: usize, total: usize, chunk: &Chunk) -> String {
    format!(
        "[{}] Chunk {} of {}: {}\n{}\n\n{}",
        label, position, total, chunk.chunk_id, chunk.breadcrumb, chunk.content
    )
}
