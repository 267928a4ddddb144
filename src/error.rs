//! Typed errors for the query path.
//!
//! Build and configuration code uses `anyhow`; everything a protocol caller
//! can trigger surfaces as a [`QueryError`] so the transport layer can map
//! each category to its own response code.

pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Malformed or out-of-range request input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Cursor could not be decoded or was issued for another query.
    #[error("invalid cursor")]
    InvalidCursor,

    #[error("malformed chunk id '{0}': expected '<filepath>#<anchor>'")]
    MalformedChunkId(String),

    #[error("chunk not found: {0}. Use search_docs to discover valid chunk ids")]
    ChunkNotFound(String),

    #[error("unknown tool '{name}'. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("unknown resource '{0}'. List resources or use search_docs to discover documents")]
    UnknownResource(String),

    /// Embedding provider or storage failure while answering a query.
    #[error("backend error: {0}")]
    Backend(String),
}

impl QueryError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueryError::Validation(message.into())
    }

    /// Stable machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Validation(_) | QueryError::MalformedChunkId(_) => "bad_request",
            QueryError::InvalidCursor => "invalid_cursor",
            QueryError::ChunkNotFound(_)
            | QueryError::UnknownTool { .. }
            | QueryError::UnknownResource(_) => "not_found",
            QueryError::Backend(_) => "internal",
        }
    }
}
