//! Tool-calling surface over a [`SearchEngine`].
//!
//! Exposes two tools and a resource listing, shaped for MCP-style hosts:
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `search_docs` | Ranked, filterable search with cursor pagination |
//! | `get_doc` | A chunk plus surrounding context by `chunk_id` |
//!
//! Resources are whole files addressed as `docs://<filepath>`.
//!
//! The `search_docs` input schema is generated from the loaded taxonomy, so
//! every filter key is an enumerated string and hosts can offer valid values
//! without a round trip. Requests are parsed with `deny_unknown_fields`;
//! a misspelled argument is a validation error rather than silently ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::get::{MAX_CONTEXT, MIN_CONTEXT};
use crate::search::{SearchEngine, SearchQuery, WeightOverrides};
use crate::taxonomy::TaxonomyEntry;

pub const SEARCH_TOOL: &str = "search_docs";
pub const GET_DOC_TOOL: &str = "get_doc";
pub const RESOURCE_SCHEME: &str = "docs://";

/// Accepted `limit` range in requests.
pub const MIN_LIMIT: i64 = 1;
pub const MAX_LIMIT: i64 = 50;
pub const DEFAULT_LIMIT: i64 = 10;

/// Name, description, and input schema of one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    /// Id of the file's first chunk, usable with `get_doc`.
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    filters: BTreeMap<String, String>,
    cursor: Option<String>,
    taxonomy_keys: Option<Vec<String>>,
    weights: Option<WeightOverrides>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetDocArgs {
    chunk_id: String,
    #[serde(default)]
    context: i64,
}

/// JSON schema for `search_docs`, with one enumerated property per
/// taxonomy key under `filters`.
pub fn build_search_schema(taxonomy: &BTreeMap<String, TaxonomyEntry>) -> Value {
    let mut filter_props = Map::new();
    for (key, entry) in taxonomy {
        let mut prop = Map::new();
        prop.insert("type".into(), json!("string"));
        prop.insert("enum".into(), json!(entry.values));
        if let Some(desc) = &entry.description {
            prop.insert("description".into(), json!(desc));
        }
        filter_props.insert(key.clone(), Value::Object(prop));
    }

    let mut weight_props = Map::new();
    for name in ["lexical", "phrase", "vector", "proximity_bonus"] {
        weight_props.insert(name.into(), json!({ "type": "number", "minimum": 0 }));
    }
    let weights = json!({
        "type": "object",
        "properties": weight_props,
        "additionalProperties": false,
        "description": "Per-request ranking weight overrides"
    });

    let keys: Vec<&String> = taxonomy.keys().collect();
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Search terms", "minLength": 1 },
            "limit": {
                "type": "integer",
                "minimum": MIN_LIMIT,
                "maximum": MAX_LIMIT,
                "default": DEFAULT_LIMIT
            },
            "cursor": {
                "type": "string",
                "description": "next_cursor from a previous response with the same query and filters"
            },
            "taxonomy_keys": {
                "type": "array",
                "items": { "type": "string", "enum": keys },
                "description": "Metadata keys to include on each hit"
            },
            "weights": weights,
            "filters": {
                "type": "object",
                "properties": filter_props,
                "additionalProperties": false,
                "description": "Documents without a value for a key match every value of that key"
            }
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

pub fn build_get_doc_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "chunk_id": { "type": "string", "description": "chunk_id from a search_docs hit" },
            "context": {
                "type": "integer",
                "minimum": MIN_CONTEXT,
                "maximum": MAX_CONTEXT,
                "default": 0,
                "description": "Neighbouring chunks on each side; -1 returns the whole file"
            }
        },
        "required": ["chunk_id"],
        "additionalProperties": false
    })
}

/// Routes tool calls and resource reads to a shared engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<SearchEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let meta = self.engine.corpus_metadata();
        let mut search_description = String::from("Search the documentation corpus.");
        if !meta.corpus_description.is_empty() {
            search_description.push(' ');
            search_description.push_str(&meta.corpus_description);
        }
        if let Some(instructions) = &meta.instructions {
            search_description.push_str("\n\n");
            search_description.push_str(instructions);
        }

        vec![
            ToolDescriptor {
                name: SEARCH_TOOL.into(),
                description: search_description,
                input_schema: build_search_schema(&meta.taxonomy),
            },
            ToolDescriptor {
                name: GET_DOC_TOOL.into(),
                description: "Fetch a chunk by chunk_id with surrounding context.".into(),
                input_schema: build_get_doc_schema(),
            },
        ]
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> QueryResult<Value> {
        tracing::debug!(tool = name, "tool call");
        match name {
            SEARCH_TOOL => self.search_docs(args).await,
            GET_DOC_TOOL => self.get_doc(args),
            other => Err(QueryError::UnknownTool {
                name: other.to_string(),
                available: [SEARCH_TOOL, GET_DOC_TOOL].join(", "),
            }),
        }
    }

    async fn search_docs(&self, args: Value) -> QueryResult<Value> {
        let args: SearchArgs = parse_args(args)?;
        let query = args.query.unwrap_or_default();
        if query.trim().is_empty() {
            return Err(QueryError::validation("query is required and must not be empty"));
        }
        let limit = match args.limit {
            Some(l) if !(MIN_LIMIT..=MAX_LIMIT).contains(&l) => {
                return Err(QueryError::validation(format!(
                    "limit must be between {} and {} (got {})",
                    MIN_LIMIT, MAX_LIMIT, l
                )));
            }
            Some(l) => Some(l as usize),
            None => None,
        };

        let request = SearchQuery {
            query,
            limit,
            filters: args.filters,
            cursor: args.cursor,
            taxonomy_keys: args.taxonomy_keys,
            weights: args.weights,
        };
        let response = self.engine.search(&request).await?;
        to_value(&response)
    }

    fn get_doc(&self, args: Value) -> QueryResult<Value> {
        let args: GetDocArgs = parse_args(args)?;
        let doc = self.engine.get_doc(&args.chunk_id, args.context)?;
        to_value(&doc)
    }

    pub fn list_resources(&self, filters: &BTreeMap<String, String>) -> QueryResult<Vec<Resource>> {
        Ok(self
            .engine
            .list_filepaths(filters)?
            .into_iter()
            .map(|f| Resource {
                uri: format!("{}{}", RESOURCE_SCHEME, f.filepath),
                name: f.filepath,
                mime_type: "text/markdown".into(),
                chunk_id: f.chunk_id,
            })
            .collect())
    }

    pub fn read_resource(&self, uri: &str) -> QueryResult<ResourceContents> {
        let text = uri
            .strip_prefix(RESOURCE_SCHEME)
            .and_then(|path| self.engine.read_file(path))
            .ok_or_else(|| QueryError::UnknownResource(uri.to_string()))?;
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: "text/markdown".into(),
            text,
        })
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> QueryResult<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| QueryError::validation(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> QueryResult<Value> {
    serde_json::to_value(value).map_err(|e| QueryError::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::build_chunks;
    use crate::cursor::CursorCodec;
    use crate::manifest::TaxonomyConfig;
    use crate::models::{ChunkingStrategy, Metadata};
    use crate::search::SearchSettings;
    use crate::taxonomy::{build_taxonomy, CorpusMetadata, CorpusStats, IndexDescriptor, METADATA_VERSION};

    fn dispatcher() -> Dispatcher {
        let mut py = Metadata::new();
        py.insert("language".into(), "python".into());
        let mut go = Metadata::new();
        go.insert("language".into(), "go".into());
        let strategy = ChunkingStrategy::default();
        let mut chunks = build_chunks("py/auth.md", "# Auth\n\n## Tokens\n\nRotate tokens.\n", &strategy, &py);
        chunks.extend(build_chunks("go/auth.md", "# Auth\n\n## Tokens\n\nRotate tokens.\n", &strategy, &go));
        chunks.extend(build_chunks("intro.md", "# Intro\n\nWelcome.\n", &strategy, &Metadata::new()));

        let mut declared = BTreeMap::new();
        declared.insert(
            "language".to_string(),
            TaxonomyConfig {
                description: Some("SDK language".into()),
                ..Default::default()
            },
        );
        let meta = CorpusMetadata {
            metadata_version: METADATA_VERSION.into(),
            corpus_description: "SDK docs.".into(),
            instructions: Some("Filter by language.".into()),
            taxonomy: build_taxonomy(&chunks, &declared),
            stats: CorpusStats {
                chunk_count: chunks.len(),
                file_count: 3,
                built_at: chrono::Utc::now(),
                source_commit: None,
            },
            embedding: None,
            index: IndexDescriptor {
                path: "index.json".into(),
                table: "chunks".into(),
            },
        };
        let engine = SearchEngine::new(chunks, meta, SearchSettings::default(), CursorCodec::unsigned());
        Dispatcher::new(Arc::new(engine))
    }

    #[test]
    fn test_search_schema_enumerates_taxonomy() {
        let d = dispatcher();
        let tools = d.list_tools();
        assert_eq!(tools[0].name, SEARCH_TOOL);
        assert!(tools[0].description.contains("Filter by language."));
        let schema = &tools[0].input_schema;
        assert_eq!(
            schema["properties"]["filters"]["properties"]["language"]["enum"],
            json!(["go", "python"])
        );
        assert_eq!(schema["properties"]["limit"]["maximum"], json!(50));
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(tools[1].input_schema["properties"]["context"]["minimum"], json!(-1));
    }

    #[tokio::test]
    async fn test_search_tool_call() {
        let d = dispatcher();
        let out = d
            .call_tool(SEARCH_TOOL, json!({ "query": "tokens", "filters": { "language": "go" } }))
            .await
            .unwrap();
        assert_eq!(out["hits"][0]["chunk_id"], "go/auth.md#auth/tokens");
        assert!(out["hint"].is_null());
    }

    #[tokio::test]
    async fn test_request_validation() {
        let d = dispatcher();
        for args in [
            json!({ "query": "" }),
            json!({}),
            json!({ "query": "x", "limit": 0 }),
            json!({ "query": "x", "limit": 51 }),
            json!({ "query": "x", "mode": "fast" }),
        ] {
            let err = d.call_tool(SEARCH_TOOL, args).await.unwrap_err();
            assert!(matches!(err, QueryError::Validation(_)), "{}", err);
        }
        let err = d
            .call_tool(GET_DOC_TOOL, json!({ "chunk_id": "intro.md#intro", "context": 9 }))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_doc_and_unknown_tool() {
        let d = dispatcher();
        let out = d
            .call_tool(GET_DOC_TOOL, json!({ "chunk_id": "intro.md#intro" }))
            .await
            .unwrap();
        assert!(out["text"].as_str().unwrap().contains("Welcome."));

        let err = d.call_tool("delete_docs", Value::Null).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("search_docs") && msg.contains("get_doc"));
    }

    #[test]
    fn test_resources() {
        let d = dispatcher();
        let all = d.list_resources(&BTreeMap::new()).unwrap();
        let uris: Vec<&str> = all.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["docs://go/auth.md", "docs://intro.md", "docs://py/auth.md"]);

        let body = d.read_resource("docs://intro.md").unwrap();
        assert_eq!(body.text, "# Intro\n\nWelcome.");
        assert!(matches!(
            d.read_resource("docs://missing.md"),
            Err(QueryError::UnknownResource(_))
        ));
        assert!(d.read_resource("file:///intro.md").is_err());
    }
}
