//! Content and configuration fingerprints.
//!
//! Fingerprints are lowercase hex SHA-256 digests. Fields are fed to the
//! hasher with a length prefix so that no two distinct inputs concatenate
//! to the same byte stream.

use sha2::{Digest, Sha256};

use crate::models::{ChunkingStrategy, Metadata};

/// Fingerprint of everything that determines a chunk's embedding input.
///
/// Changes to the chunking strategy, the tag map, or the embedded text
/// (which carries the raw markdown) all change the fingerprint.
pub fn content_fingerprint(
    strategy: &ChunkingStrategy,
    metadata: &Metadata,
    embedding_text: &str,
) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, strategy.chunk_by.as_str());
    feed(&mut hasher, &size_field(strategy.max_chunk_size));
    feed(&mut hasher, &size_field(strategy.min_chunk_size));
    feed(&mut hasher, &metadata.len().to_string());
    for (k, v) in metadata {
        feed(&mut hasher, k);
        feed(&mut hasher, v);
    }
    feed(&mut hasher, embedding_text);
    hex::encode(hasher.finalize())
}

/// Fingerprint of a provider configuration; a change invalidates a cache.
pub fn config_fingerprint(provider: &str, model: &str, dims: usize) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, provider);
    feed(&mut hasher, model);
    feed(&mut hasher, &dims.to_string());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's raw bytes.
pub fn file_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn feed(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn size_field(size: Option<usize>) -> String {
    size.map(|s| s.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkBy;

    fn tags(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_content_fingerprint_is_stable() {
        let s = ChunkingStrategy::default();
        let m = tags(&[("language", "rust")]);
        let a = content_fingerprint(&s, &m, "Guide\n\nbody");
        let b = content_fingerprint(&s, &m, "Guide\n\nbody");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_each_input_changes_fingerprint() {
        let s = ChunkingStrategy::default();
        let m = tags(&[("language", "rust")]);
        let base = content_fingerprint(&s, &m, "text");

        let h3 = ChunkingStrategy {
            chunk_by: ChunkBy::H3,
            ..Default::default()
        };
        assert_ne!(base, content_fingerprint(&h3, &m, "text"));
        assert_ne!(
            base,
            content_fingerprint(&s, &tags(&[("language", "python")]), "text")
        );
        assert_ne!(base, content_fingerprint(&s, &m, "text!"));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let s = ChunkingStrategy::default();
        let a = content_fingerprint(&s, &tags(&[("ab", "c")]), "x");
        let b = content_fingerprint(&s, &tags(&[("a", "bc")]), "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_fingerprint() {
        let a = config_fingerprint("openai", "text-embedding-3-small", 1536);
        assert_eq!(a, config_fingerprint("openai", "text-embedding-3-small", 1536));
        assert_ne!(a, config_fingerprint("openai", "text-embedding-3-small", 512));
        assert_ne!(a, config_fingerprint("openai", "text-embedding-3-large", 1536));
    }
}
