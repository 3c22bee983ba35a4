// Cache key generation - canonicalization and versioned, tenant-scoped hashing
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Namespace of in-flight lock keys. Distinct from every cache namespace.
pub const INFLIGHT_NAMESPACE: &str = "inflight";

/// Normalize semantically equivalent inputs to one representation.
///
/// - strings: trimmed, whitespace runs collapsed to a single space, lower-cased
/// - arrays: elements canonicalized, then sorted by their serialized form
/// - objects: values canonicalized, keys re-emitted in sorted order
/// - other scalars pass through unchanged
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_text(s)),
        Value::Array(items) => {
            let mut keyed: Vec<(String, Value)> = items
                .iter()
                .map(|item| {
                    let canonical = canonicalize(item);
                    (canonical.to_string(), canonical)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        }
        Value::Object(fields) => {
            let sorted: BTreeMap<&String, Value> = fields
                .iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Version strings folded into every key. Bumping any of them orphans all
/// previously generated keys, which is how cached results are invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersions {
    pub scoring: String,
    pub prompt: String,
    pub normalization: String,
}

impl Default for KeyVersions {
    fn default() -> Self {
        Self {
            scoring: "v1".to_string(),
            prompt: "v1".to_string(),
            normalization: "v1".to_string(),
        }
    }
}

/// The provider-independent part of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKeyInput<'a> {
    /// Operation type, e.g. `match` or `summarize`.
    pub operation: &'a str,
    pub payload: &'a Value,
    pub tenant: Option<&'a str>,
}

/// Builds deterministic `<namespace>:<operation>:<provider>:<sha256>` keys.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    namespace: String,
    versions: KeyVersions,
    default_tenant: String,
}

impl CacheKeyGenerator {
    pub fn new(namespace: impl Into<String>, versions: KeyVersions) -> Self {
        Self {
            namespace: namespace.into(),
            versions,
            default_tenant: "global".to_string(),
        }
    }

    pub fn with_default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.default_tenant = tenant.into();
        self
    }

    pub fn versions(&self) -> &KeyVersions {
        &self.versions
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Generate the cache key for `input` as computed by `provider`.
    pub fn generate(&self, input: &CacheKeyInput<'_>, provider: &str) -> String {
        let material = json!({
            "provider": provider,
            "versions": {
                "scoring": self.versions.scoring,
                "prompt": self.versions.prompt,
                "normalization": self.versions.normalization,
            },
            "payload": canonicalize(input.payload),
            "tenant": input.tenant.unwrap_or(&self.default_tenant),
        });

        // serde_json's Value::to_string cannot fail
        let digest = sha256_hex(material.to_string().as_bytes());
        format!(
            "{}:{}:{}:{}",
            self.namespace, input.operation, provider, digest
        )
    }

    /// Derive the short in-flight lock key guarding computation of `cache_key`.
    pub fn inflight_key(&self, cache_key: &str) -> String {
        let digest = sha256_hex(cache_key.as_bytes());
        format!("{}:{}", INFLIGHT_NAMESPACE, &digest[..16])
    }

    /// Prefix shared by every key of an operation, for prefix scans.
    pub fn operation_prefix(&self, operation: &str) -> String {
        format!("{}:{}:", self.namespace, operation)
    }

    /// Prefix shared by every key an operation cached under one provider.
    pub fn provider_prefix(&self, operation: &str, provider: &str) -> String {
        format!("{}:{}:{}:", self.namespace, operation, provider)
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new("analysis", KeyVersions::default())
    }
}
