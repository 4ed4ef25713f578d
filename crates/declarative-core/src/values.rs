//! Values handling with deep merge support and content hashing

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Number of hex characters kept from the content hash
const HASH_LEN: usize = 16;

/// Values container with deep merge capability
///
/// Values are renderer-specific: the template backend expects a map, the
/// overlay backend accepts either a map of processor options or a pre-built
/// options object serialized into one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Build values from any serializable options object
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Borrow the values as a generic key-value map
    ///
    /// Fails with [`CoreError::UnsupportedValues`] when the values have any
    /// other shape. `null` is treated as an empty map by callers that want
    /// to degrade gracefully, not here.
    pub fn as_map(&self) -> Result<&serde_json::Map<String, JsonValue>> {
        self.0.as_object().ok_or_else(|| CoreError::UnsupportedValues {
            expected: "map",
            found: self.type_name(),
        })
    }

    /// Name of the JSON type held, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match &self.0 {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "bool",
            JsonValue::Number(_) => "number",
            JsonValue::String(_) => "string",
            JsonValue::Array(_) => "array",
            JsonValue::Object(_) => "map",
        }
    }

    /// Stable content hash of the values
    ///
    /// Object keys are hashed in sorted order, so two maps with the same
    /// entries hash identically regardless of insertion order.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hash_canonical(&self.0, &mut hasher);
        let digest = hex::encode(hasher.finalize());
        digest[..HASH_LEN].to_string()
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

/// Feed a canonical encoding of `value` into the hasher
fn hash_canonical(value: &JsonValue, hasher: &mut Sha256) {
    match value {
        JsonValue::Null => hasher.update(b"n"),
        JsonValue::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        JsonValue::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
            hasher.update(b";");
        }
        JsonValue::String(s) => {
            hasher.update(b"s");
            hasher.update(s.len().to_le_bytes());
            hasher.update(s.as_bytes());
        }
        JsonValue::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.len().to_le_bytes());
                hasher.update(key.as_bytes());
                hash_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
    }
}

/// Deep merge two JSON values
pub fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.0["image"]["repository"], "nginx");
        assert_eq!(base.0["image"]["tag"], "2.0");
        assert_eq!(base.0["replicas"], 3);
    }

    #[test]
    fn test_arrays_are_replaced() {
        let mut base = Values(json!({"ports": [80, 443]}));
        base.merge(&Values(json!({"ports": [8080]})));
        assert_eq!(base.0["ports"], json!([8080]));
    }

    #[test]
    fn test_as_map_rejects_other_shapes() {
        assert!(Values(json!({"replicas": 1})).as_map().is_ok());

        let err = Values(json!(["a", "b"])).as_map().unwrap_err();
        assert!(err.to_string().contains("array"));
        assert!(err.to_string().contains("map"));
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let a = Values::from_json(r#"{"replicas": 1, "image": {"tag": "a", "repo": "x"}}"#).unwrap();
        let b = Values::from_json(r#"{"image": {"repo": "x", "tag": "a"}, "replicas": 1}"#).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), HASH_LEN);
    }

    #[test]
    fn test_content_hash_changes_with_values() {
        let one = Values(json!({"replicas": 1}));
        let two = Values(json!({"replicas": 2}));
        assert_ne!(one.content_hash(), two.content_hash());

        // "1" and 1 must not collide
        let string_one = Values(json!({"replicas": "1"}));
        assert_ne!(one.content_hash(), string_one.content_hash());
    }

    #[test]
    fn test_is_empty() {
        assert!(Values::new().is_empty());
        assert!(Values(JsonValue::Null).is_empty());
        assert!(!Values(json!({"a": 1})).is_empty());
        assert!(!Values(json!(3)).is_empty());
    }
}
