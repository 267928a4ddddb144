//! Opaque pagination cursors.
//!
//! A cursor is URL-safe base64 of `{"offset", "limit", "checksum"}`. The
//! checksum covers the trimmed query, the filters in key order, and the
//! offset/limit pair, so a cursor replayed against a different query or
//! edited by hand fails to decode. With a configured secret the checksum is
//! an HMAC-SHA256 instead of a plain SHA-256. Nothing is stored
//! server-side.

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{QueryError, QueryResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub offset: usize,
    /// Page size the cursor was issued with.
    pub limit: usize,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    offset: usize,
    limit: usize,
    checksum: String,
}

#[derive(Clone)]
pub struct CursorCodec {
    mac: Option<HmacSha256>,
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec")
            .field("signed", &self.mac.is_some())
            .finish()
    }
}

impl Default for CursorCodec {
    fn default() -> Self {
        Self::unsigned()
    }
}

impl CursorCodec {
    pub fn unsigned() -> Self {
        Self { mac: None }
    }

    pub fn with_secret(secret: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("invalid cursor secret: {}", e))?;
        Ok(Self { mac: Some(mac) })
    }

    pub fn encode(
        &self,
        query: &str,
        filters: &BTreeMap<String, String>,
        offset: usize,
        limit: usize,
    ) -> String {
        let input = checksum_input(query, filters, offset, limit);
        let payload = Payload {
            offset,
            limit,
            checksum: self.checksum(&input),
        };
        // Serializing two integers and a string cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode `token` and check it was issued for this query and filter set.
    pub fn decode(
        &self,
        token: &str,
        query: &str,
        filters: &BTreeMap<String, String>,
    ) -> QueryResult<CursorState> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| QueryError::InvalidCursor)?;
        let payload: Payload =
            serde_json::from_slice(&bytes).map_err(|_| QueryError::InvalidCursor)?;
        if payload.limit == 0 {
            return Err(QueryError::InvalidCursor);
        }

        let input = checksum_input(query, filters, payload.offset, payload.limit);
        let valid = match &self.mac {
            Some(mac) => {
                let Ok(expected) = hex::decode(&payload.checksum) else {
                    return Err(QueryError::InvalidCursor);
                };
                let mut mac = mac.clone();
                mac.update(input.as_bytes());
                mac.verify_slice(&expected).is_ok()
            }
            None => self.checksum(&input) == payload.checksum,
        };
        if !valid {
            return Err(QueryError::InvalidCursor);
        }

        Ok(CursorState {
            offset: payload.offset,
            limit: payload.limit,
        })
    }

    fn checksum(&self, input: &str) -> String {
        match &self.mac {
            Some(mac) => {
                let mut mac = mac.clone();
                mac.update(input.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            None => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

fn checksum_input(
    query: &str,
    filters: &BTreeMap<String, String>,
    offset: usize,
    limit: usize,
) -> String {
    let mut input = String::new();
    input.push_str(query.trim());
    input.push('\0');
    for (k, v) in filters {
        input.push_str(k);
        input.push('=');
        input.push_str(v);
        input.push('\0');
    }
    input.push_str(&format!("{}:{}", offset, limit));
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_roundtrip_ignores_surrounding_whitespace() {
        let codec = CursorCodec::unsigned();
        let f = filters(&[("language", "rust"), ("scope", "api")]);
        let token = codec.encode("retry policy", &f, 20, 10);
        let state = codec.decode(&token, "  retry policy ", &f).unwrap();
        assert_eq!(state, CursorState { offset: 20, limit: 10 });
    }

    #[test]
    fn test_mismatched_context_is_rejected() {
        let codec = CursorCodec::unsigned();
        let f = filters(&[("language", "rust")]);
        let token = codec.encode("retry", &f, 10, 10);
        assert!(matches!(
            codec.decode(&token, "backoff", &f),
            Err(QueryError::InvalidCursor)
        ));
        assert!(matches!(
            codec.decode(&token, "retry", &filters(&[("language", "go")])),
            Err(QueryError::InvalidCursor)
        ));
        assert!(codec.decode(&token, "retry", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_garbage_and_tampering_are_rejected() {
        let codec = CursorCodec::unsigned();
        let f = BTreeMap::new();
        assert!(codec.decode("not base64!!", "q", &f).is_err());
        assert!(codec.decode(&URL_SAFE_NO_PAD.encode("{}"), "q", &f).is_err());

        let token = codec.encode("q", &f, 10, 10);
        let bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let edited = String::from_utf8(bytes).unwrap().replace("\"offset\":10", "\"offset\":90");
        let forged = URL_SAFE_NO_PAD.encode(edited);
        assert!(codec.decode(&forged, "q", &f).is_err());
    }

    #[test]
    fn test_signed_cursors_need_the_same_secret() {
        let a = CursorCodec::with_secret(b"alpha").unwrap();
        let b = CursorCodec::with_secret(b"beta").unwrap();
        let f = BTreeMap::new();
        let token = a.encode("q", &f, 5, 5);
        assert!(a.decode(&token, "q", &f).is_ok());
        assert!(b.decode(&token, "q", &f).is_err());
        assert!(CursorCodec::unsigned().decode(&token, "q", &f).is_err());
    }
}
