//! ID token payload decoding
//!
//! Only the payload segment is decoded. The signature segment is carried
//! along untouched and never verified here.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// `aud` claim: a single audience or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(a) => a == audience,
            Audience::Multiple(list) => list.iter().any(|a| a == audience),
        }
    }
}

/// Decoded claim set of an ID token.
#[derive(Debug, Clone, Default)]
pub struct IdTokenClaims {
    claims: Map<String, Value>,
}

impl IdTokenClaims {
    /// Decode the payload of a `header.payload.signature` token.
    pub fn decode(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::IdTokenDecode("empty token".into()));
        }
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(Error::IdTokenDecode(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| Error::IdTokenDecode(format!("payload is not base64url: {e}")))?;
        let value: Value = serde_json::from_slice(&payload)
            .map_err(|e| Error::IdTokenDecode(format!("payload is not JSON: {e}")))?;
        match value {
            Value::Object(claims) => Ok(Self { claims }),
            _ => Err(Error::IdTokenDecode("payload is not a JSON object".into())),
        }
    }

    pub fn from_map(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    /// `None` when absent or when any list entry is not a string.
    pub fn audience(&self) -> Option<Audience> {
        match self.get("aud")? {
            Value::String(a) => Some(Audience::Single(a.clone())),
            Value::Array(list) => list
                .iter()
                .map(|v| v.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .map(Audience::Multiple),
            _ => None,
        }
    }

    pub fn authorized_party(&self) -> Option<&str> {
        self.get("azp").and_then(Value::as_str)
    }

    /// `exp` as seconds since the epoch; integer or fractional.
    pub fn expiration(&self) -> Option<f64> {
        self.get("exp").and_then(Value::as_f64)
    }

    pub fn has_issued_at(&self) -> bool {
        self.claims.contains_key("iat")
    }
}
