//! Cache keys and their fingerprints
//!
//! A key is a resource name plus named parameters. Keys are reduced to a
//! canonical JSON form (object fields sorted at every depth) and hashed with
//! SHA256, so the same name and parameter values always give the same
//! fingerprint regardless of the order parameters were added in.

use crate::error::{LarderError, LarderResult};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of a key description
const DESCRIBE_MAX_CHARS: usize = 120;

/// Structured identifier of a cached resource
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    name: String,
    params: BTreeMap<String, Value>,
    /// First parameter conversion failure, reported by `fingerprint`
    invalid: Option<String>,
}

impl CacheKey {
    /// Create a key with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            invalid: None,
        }
    }

    /// Add a named parameter
    ///
    /// Values that cannot be represented as JSON (e.g. maps with non-string
    /// keys) make the key invalid; the error surfaces from `fingerprint`.
    pub fn param(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.params.insert(name, value);
            }
            Err(e) => {
                if self.invalid.is_none() {
                    self.invalid = Some(format!("parameter `{}`: {}", name, e));
                }
            }
        }
        self
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in canonical (sorted) order
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Canonical serialization used for hashing
    fn canonical(&self) -> LarderResult<String> {
        if let Some(reason) = &self.invalid {
            return Err(LarderError::InvalidKey(reason.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(LarderError::InvalidKey("name must not be empty".to_string()));
        }

        #[derive(Serialize)]
        struct Canonical<'a> {
            name: &'a str,
            params: &'a BTreeMap<String, Value>,
        }

        // serde_json::Map is ordered by key, so nested objects are sorted too.
        serde_json::to_string(&Canonical {
            name: &self.name,
            params: &self.params,
        })
        .map_err(|e| LarderError::InvalidKey(e.to_string()))
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CacheKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", describe(self))
    }
}

/// Fixed-length identifier derived from a cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of a fingerprint in hex characters
    pub const LEN: usize = 64;

    /// Parse a fingerprint from an on-disk name
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a key
pub fn fingerprint(key: &CacheKey) -> LarderResult<Fingerprint> {
    let canonical = key.canonical()?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Human-readable label for a key; not unique, never used for lookup
pub fn describe(key: &CacheKey) -> String {
    let mut label = key.name.clone();

    if !key.params.is_empty() {
        let params: Vec<String> = key
            .params
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect();
        label.push('[');
        label.push_str(&params.join(","));
        label.push(']');
    }

    if label.chars().count() > DESCRIBE_MAX_CHARS {
        let mut truncated: String = label.chars().take(DESCRIBE_MAX_CHARS - 3).collect();
        truncated.push_str("...");
        return truncated;
    }
    label
}
