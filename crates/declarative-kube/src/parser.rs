//! Manifest parsing from rendered byte streams

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use declarative_core::is_blank_document;
use sha2::{Digest, Sha256};

use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;

/// Default time a parsed manifest stays cached
pub const DEFAULT_PARSE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Turns rendered bytes into resource handles
pub trait ManifestParser: Send + Sync {
    fn parse(&self, manifest: &[u8]) -> Result<Vec<ResourceHandle>>;
}

/// Multi-document YAML parser
///
/// Empty and comment-only documents are skipped. Errors name the zero-based
/// index of the offending document.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlManifestParser;

impl YamlManifestParser {
    pub fn new() -> Self {
        Self
    }
}

impl ManifestParser for YamlManifestParser {
    fn parse(&self, manifest: &[u8]) -> Result<Vec<ResourceHandle>> {
        let text = std::str::from_utf8(manifest)
            .map_err(|e| DeclarativeError::InvalidManifest(format!("manifest is not UTF-8: {}", e)))?;

        let mut handles = Vec::new();
        for (index, doc) in split_documents(text).into_iter().enumerate() {
            if is_blank_document(doc) {
                continue;
            }

            let value: serde_json::Value =
                serde_yaml::from_str(doc).map_err(|e| in_document(index, e.to_string()))?;
            if value.is_null() {
                continue;
            }

            let handle = ResourceHandle::from_value(value).map_err(|e| match e {
                DeclarativeError::InvalidManifest(message) => in_document(index, message),
                other => in_document(index, other.to_string()),
            })?;
            handles.push(handle);
        }

        Ok(handles)
    }
}

fn in_document(index: usize, message: String) -> DeclarativeError {
    DeclarativeError::InvalidManifest(format!("document {}: {}", index, message))
}

/// Split on `---` lines, ignoring separators inside block content
fn split_documents(text: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            docs.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&text[start..]);
    docs
}

struct CacheEntry {
    parsed_at: Instant,
    handles: Vec<ResourceHandle>,
}

/// Memoizes another parser by the sha256 of the manifest bytes
#[derive(Clone)]
pub struct CachedManifestParser<P = YamlManifestParser> {
    inner: P,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl CachedManifestParser<YamlManifestParser> {
    pub fn new(ttl: Duration) -> Self {
        Self::wrap(YamlManifestParser, ttl)
    }
}

impl Default for CachedManifestParser<YamlManifestParser> {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_CACHE_TTL)
    }
}

impl<P: ManifestParser> CachedManifestParser<P> {
    pub fn wrap(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cache key of a manifest
    pub fn key(manifest: &[u8]) -> String {
        hex::encode(Sha256::digest(manifest))
    }

    /// Drop the cached parse of a manifest
    pub fn evict(&self, manifest: &[u8]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&Self::key(manifest));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: ManifestParser> ManifestParser for CachedManifestParser<P> {
    fn parse(&self, manifest: &[u8]) -> Result<Vec<ResourceHandle>> {
        let key = Self::key(manifest);

        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, entry| entry.parsed_at.elapsed() < self.ttl);
            if let Some(entry) = entries.get(&key) {
                tracing::debug!(key = %&key[..12], "parsed manifest cache hit");
                return Ok(entry.handles.clone());
            }
        }

        let handles = self.inner.parse(manifest)?;

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CacheEntry {
                    parsed_at: Instant::now(),
                    handles: handles.clone(),
                },
            );
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"---
# Source: configmap.yaml
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
data:
  script: |
    echo "---"
---
# only a comment
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: prod
"#;

    #[test]
    fn test_parse_multi_document() {
        let handles = YamlManifestParser.parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].name(), "app-config");
        assert_eq!(handles[0].data()["data"]["script"], "echo \"---\"\n");
        assert_eq!(handles[1].gvk.kind, "Deployment");
        assert_eq!(handles[1].namespace(), Some("prod"));
    }

    #[test]
    fn test_parse_error_names_document() {
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\nkind: Secret\nmetadata:\n  name: b\n";
        let err = YamlManifestParser.parse(manifest.as_bytes()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("document 1"), "{}", message);
        assert!(message.contains("apiVersion"));
    }

    #[test]
    fn test_cached_parser_memoizes_and_evicts() {
        let parser: CachedManifestParser = CachedManifestParser::default();

        let first = parser.parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(parser.len(), 1);
        let second = parser.parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(first, second);
        assert_eq!(parser.len(), 1);

        parser.evict(MANIFEST.as_bytes());
        assert!(parser.is_empty());
    }

    #[test]
    fn test_cached_parser_expires() {
        let parser = CachedManifestParser::new(Duration::ZERO);
        parser.parse(MANIFEST.as_bytes()).unwrap();
        parser.parse(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: other\n").unwrap();
        assert_eq!(parser.len(), 1);
    }
}
