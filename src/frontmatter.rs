//! Per-file frontmatter directives.
//!
//! A markdown file may open with a YAML block delimited by `---` lines:
//!
//! ```yaml
//! ---
//! chunk_by: h3
//! metadata:
//!   language: python
//! docs_harness_metadata:
//!   scope: api
//! ---
//! ```
//!
//! `metadata` is merged first and `docs_harness_metadata` over it; both
//! outrank every manifest setting. `chunk_by` replaces the resolved
//! strategy's split level. Other keys are ignored so files can carry
//! frontmatter for other tools.

use anyhow::{bail, Context, Result};
use serde_yaml::Value;

use crate::models::{ChunkBy, Metadata};

pub const CHUNK_BY_KEY: &str = "chunk_by";
pub const METADATA_KEY: &str = "metadata";
pub const TOOL_METADATA_KEY: &str = "docs_harness_metadata";

/// Directives extracted from a file's frontmatter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    pub chunk_by: Option<ChunkBy>,
    /// Generic metadata map.
    pub metadata: Metadata,
    /// Tool-specific map, applied over `metadata`.
    pub tool_metadata: Metadata,
}

impl Frontmatter {
    /// Generic map with the tool-specific map merged over it.
    pub fn merged_metadata(&self) -> Metadata {
        let mut merged = self.metadata.clone();
        for (k, v) in &self.tool_metadata {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// Split a document into its raw YAML frontmatter (if any) and the body.
pub fn split_frontmatter(markdown: &str) -> (Option<&str>, &str) {
    let text = markdown.strip_prefix('\u{feff}').unwrap_or(markdown);
    let Some(after_open) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return (None, markdown);
    };

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            let yaml = &after_open[..offset];
            let body = &after_open[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }

    // Unterminated block: treat the whole file as body.
    (None, markdown)
}

/// Parse frontmatter directives and return them with the remaining body.
///
/// Documents without frontmatter yield [`Frontmatter::default`].
pub fn parse_frontmatter(markdown: &str) -> Result<(Frontmatter, &str)> {
    let (yaml, body) = split_frontmatter(markdown);
    let Some(yaml) = yaml else {
        return Ok((Frontmatter::default(), body));
    };

    let value: Value = serde_yaml::from_str(yaml).context("Failed to parse frontmatter YAML")?;
    let map = match value {
        Value::Null => return Ok((Frontmatter::default(), body)),
        Value::Mapping(map) => map,
        _ => bail!("frontmatter must be a YAML mapping"),
    };

    let mut fm = Frontmatter::default();

    if let Some(v) = map.get(CHUNK_BY_KEY) {
        let raw = v
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("frontmatter '{}' must be a string", CHUNK_BY_KEY))?;
        fm.chunk_by = Some(ChunkBy::parse(raw).ok_or_else(|| {
            anyhow::anyhow!(
                "frontmatter '{}' must be one of h1, h2, h3, file (got '{}')",
                CHUNK_BY_KEY,
                raw
            )
        })?);
    }
    if let Some(v) = map.get(METADATA_KEY) {
        fm.metadata = metadata_map(METADATA_KEY, v)?;
    }
    if let Some(v) = map.get(TOOL_METADATA_KEY) {
        fm.tool_metadata = metadata_map(TOOL_METADATA_KEY, v)?;
    }

    Ok((fm, body))
}

fn metadata_map(field: &str, value: &Value) -> Result<Metadata> {
    let map = match value {
        Value::Null => return Ok(Metadata::new()),
        Value::Mapping(map) => map,
        _ => bail!("frontmatter '{}' must be a mapping of tag names to values", field),
    };

    let mut out = Metadata::new();
    for (k, v) in map {
        let key = scalar_to_string(k)
            .ok_or_else(|| anyhow::anyhow!("frontmatter '{}' has a non-scalar key", field))?;
        match v {
            Value::Null => continue,
            other => {
                let val = scalar_to_string(other).ok_or_else(|| {
                    anyhow::anyhow!(
                        "frontmatter '{}.{}' must be a string, number, or boolean",
                        field,
                        key
                    )
                })?;
                out.insert(key, val);
            }
        }
    }
    Ok(out)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
