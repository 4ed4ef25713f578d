//! File-backed configuration for the static subset of [`crate::Options`]

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ManifestCache;
use crate::error::{DeclarativeError, Result};
use crate::options::{
    ConsistencyCheck, DEFAULT_FIELD_OWNER, DEFAULT_FINALIZER, DEFAULT_NAMESPACE,
};
use crate::parser::DEFAULT_PARSE_CACHE_TTL;

/// How the engine requeues objects after a successful pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ConsistencyCheckConfig {
    #[default]
    Disabled,
    Permanent,
    Periodic {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
}

impl From<&ConsistencyCheckConfig> for ConsistencyCheck {
    fn from(config: &ConsistencyCheckConfig) -> Self {
        match config {
            ConsistencyCheckConfig::Disabled => ConsistencyCheck::Disabled,
            ConsistencyCheckConfig::Permanent => ConsistencyCheck::Permanent,
            ConsistencyCheckConfig::Periodic { interval } => ConsistencyCheck::Periodic(*interval),
        }
    }
}

/// Engine configuration file (YAML or JSON)
///
/// ```yaml
/// namespace: apps
/// createNamespace: true
/// manifestCache: /var/cache/declarative   # or "no-cache"
/// consistencyCheck:
///   mode: periodic
///   interval: 5m
/// parseCacheTtl: 12h
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Namespace namespaced resources are placed in
    pub namespace: String,

    /// Apply the namespace before any other resource
    pub create_namespace: bool,

    pub finalizer: String,

    /// Field manager used for server-side apply
    pub field_owner: String,

    pub manifest_cache: ManifestCache,

    pub consistency_check: ConsistencyCheckConfig,

    /// Lifetime of parsed manifests in the parser cache
    #[serde(with = "humantime_serde")]
    pub parse_cache_ttl: Duration,

    /// Remove prerequisite types when an object is deleted
    pub delete_prerequisites: bool,

    /// Extra labels put on every applied resource
    pub custom_resource_labels: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            create_namespace: false,
            finalizer: DEFAULT_FINALIZER.to_string(),
            field_owner: DEFAULT_FIELD_OWNER.to_string(),
            manifest_cache: ManifestCache::default(),
            consistency_check: ConsistencyCheckConfig::default(),
            parse_cache_ttl: DEFAULT_PARSE_CACHE_TTL,
            delete_prerequisites: false,
            custom_resource_labels: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML (or JSON) file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(DeclarativeError::InvalidConfig("namespace must not be empty".into()));
        }
        if self.field_owner.is_empty() {
            return Err(DeclarativeError::InvalidConfig("fieldOwner must not be empty".into()));
        }
        if let ConsistencyCheckConfig::Periodic { interval } = self.consistency_check
            && interval.is_zero()
        {
            return Err(DeclarativeError::InvalidConfig(
                "periodic consistency check needs a non-zero interval".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.finalizer, "declarative.io/finalizer");
        assert_eq!(config.parse_cache_ttl, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_yaml(
            r#"
namespace: apps
createNamespace: true
fieldOwner: platform
manifestCache: no-cache
consistencyCheck:
  mode: periodic
  interval: 5m
parseCacheTtl: 90s
deletePrerequisites: true
customResourceLabels:
  team: core
"#,
        )
        .unwrap();

        assert_eq!(config.namespace, "apps");
        assert!(config.create_namespace);
        assert_eq!(config.manifest_cache, ManifestCache::Disabled);
        assert_eq!(
            ConsistencyCheck::from(&config.consistency_check),
            ConsistencyCheck::Periodic(Duration::from_secs(300))
        );
        assert_eq!(config.parse_cache_ttl, Duration::from_secs(90));
        assert_eq!(config.custom_resource_labels["team"], "core");
    }

    #[test]
    fn test_cache_dir_and_validation() {
        let config = EngineConfig::from_yaml("manifestCache: /var/cache/declarative").unwrap();
        assert_eq!(
            config.manifest_cache,
            ManifestCache::Dir(PathBuf::from("/var/cache/declarative"))
        );

        let err = EngineConfig::from_yaml("consistencyCheck:\n  mode: periodic\n  interval: 0s\n")
            .unwrap_err();
        assert!(matches!(err, DeclarativeError::InvalidConfig(_)));
        assert!(EngineConfig::from_yaml("namespace: \"\"").is_err());
    }
}
