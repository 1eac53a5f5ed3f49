use std::fmt;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(serde::Deserialize, serde::Serialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: NaiveDateTime,
}

/// Identifies a cached response by the namespace that owns it and a
/// fingerprint of the request parameters.
///
/// The fingerprint is computed over a canonical rendering of the parameters
/// (keys sorted, `key=value` pairs joined by `&`), so two mappings holding the
/// same pairs produce the same key regardless of insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    fingerprint: String,
}

impl CacheKey {
    pub fn new(namespace: &str, params: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_params(params));

        Self {
            namespace: namespace.to_string(),
            fingerprint: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.fingerprint)
    }
}

/// Renders a parameter mapping as sorted `key=value` pairs.
///
/// Strings are written bare, other scalars use their JSON spelling and nested
/// values are written as compact JSON. Keys and values are percent-encoded so
/// embedded `&` or `=` cannot alias another mapping. A non-object value is
/// rendered as a single JSON document.
pub fn canonical_params(params: &Value) -> String {
    let Some(obj) = params.as_object() else {
        return params.to_string();
    };

    let mut pairs = obj
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (
                urlencoding::encode(key).into_owned(),
                urlencoding::encode(&value).into_owned(),
            )
        })
        .collect::<Vec<_>>();
    pairs.sort();

    pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

pub trait Cache: Send + Sync {
    /// Returns the payload stored for `(namespace, params)`, or `None` when
    /// nothing is stored or the entry is older than the cache's max age.
    fn get(&self, namespace: &str, params: &Value) -> Result<Option<Value>>;

    /// Stores `value` for `(namespace, params)`, replacing any previous entry.
    fn set(&self, namespace: &str, params: &Value, value: &Value) -> Result<()>;

    /// Deletes every expired entry and returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;
}

/// Stores nothing; every lookup misses. Used when durable storage cannot be
/// opened.
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _namespace: &str, _params: &Value) -> Result<Option<Value>> {
        Ok(None)
    }

    fn set(&self, _namespace: &str, _params: &Value, _value: &Value) -> Result<()> {
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
