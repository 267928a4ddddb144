//! # docs-harness
//!
//! Manifest-driven indexing and grounded search over a markdown
//! documentation corpus, for AI tools.
//!
//! A corpus directory carries `docs-manifest.json` files that decide how
//! each file is chunked and which tags (language, scope, ...) its chunks
//! receive; per-file frontmatter can refine both. A build turns the corpus
//! into addressable chunks, embeds only what changed, and writes an index
//! plus a corpus metadata document. Serving answers ranked, filterable
//! searches and chunk lookups over that immutable snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Manifests  │──▶│ Chunk+Embed  │──▶│  index.json  │
//! │ frontmatter │   │ (cached)     │   │ metadata.json│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │ Protocol │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunks, strategies, tag maps |
//! | [`manifest`] | Manifest discovery and rule resolution |
//! | [`frontmatter`] | Per-file YAML directives |
//! | [`markdown`] | Fence tracking, headings, slugs, plain text |
//! | [`chunk`] | Heading-aware chunking |
//! | [`fingerprint`] | Content, configuration, and file hashes |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cache`] | Fingerprint-keyed incremental embedding |
//! | [`store`] | Index storage trait and in-memory store |
//! | [`taxonomy`] | Corpus metadata document |
//! | [`cursor`] | Pagination cursor codec |
//! | [`search`] | Filtering, ranking, collapse, pagination |
//! | [`get`] | Chunk retrieval with context |
//! | [`protocol`] | Tool schemas and dispatch |
//! | [`ingest`] | Build pipeline and engine loading |
//! | [`error`] | Query-path error types |

pub mod chunk;
pub mod config;
pub mod cursor;
pub mod embed_cache;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod frontmatter;
pub mod get;
pub mod ingest;
pub mod manifest;
pub mod markdown;
pub mod models;
pub mod protocol;
pub mod search;
pub mod store;
pub mod taxonomy;
