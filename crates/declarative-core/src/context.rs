//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::pack::PackageMetadata;
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Package defaults merged with the caller's values
    pub values: JsonValue,

    pub release: ReleaseInfo,

    pub pack: PackInfo,
}

/// The object being rendered for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Name of the reconciled object
    pub name: String,

    /// Target namespace of the rendered resources
    pub namespace: String,
}

impl ReleaseInfo {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackInfo {
    pub name: String,
    pub version: String,
}

impl From<&PackageMetadata> for PackInfo {
    fn from(meta: &PackageMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
        }
    }
}

impl TemplateContext {
    pub fn new(values: Values, release: ReleaseInfo, pack: &PackageMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            pack: PackInfo::from(pack),
        }
    }
}
