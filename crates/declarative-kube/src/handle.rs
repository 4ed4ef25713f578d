//! Parsed resources ready to be transformed and applied

use std::collections::BTreeMap;
use std::fmt;

use declarative_core::{GroupVersionKind, Resource};
use kube::api::DynamicObject;
use serde_json::Value as JsonValue;

use crate::error::{DeclarativeError, Result};

/// A rendered resource together with its type
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl ResourceHandle {
    /// Build a handle from a decoded manifest
    ///
    /// `apiVersion`, `kind` and `metadata.name` are required.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DeclarativeError::InvalidManifest("missing apiVersion".to_string()))?
            .to_string();
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DeclarativeError::InvalidManifest("missing kind".to_string()))?
            .to_string();

        let object: DynamicObject = serde_json::from_value(value)?;
        if object.metadata.name.as_deref().is_none_or(str::is_empty) {
            return Err(DeclarativeError::InvalidManifest(format!(
                "{} is missing metadata.name",
                kind
            )));
        }

        Ok(Self {
            gvk: GroupVersionKind::from_api_version(&api_version, &kind),
            object,
        })
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
    }

    pub fn set_namespace(&mut self, namespace: Option<&str>) {
        self.object.metadata.namespace = namespace.map(str::to_string);
    }

    /// Identity used for status tracking and orphan diffing
    pub fn resource(&self) -> Resource {
        Resource::new(
            self.name(),
            self.namespace().unwrap_or_default(),
            self.gvk.clone(),
        )
    }

    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.object.metadata.labels.get_or_insert_with(BTreeMap::new)
    }

    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.object
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.object
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    /// Everything outside `apiVersion`, `kind` and `metadata`
    pub fn data(&self) -> &JsonValue {
        &self.object.data
    }

    pub fn data_mut(&mut self) -> &mut JsonValue {
        &mut self.object.data
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.resource().fmt(f)
    }
}

/// Identities of a set of handles, in order
pub fn resources_of(handles: &[ResourceHandle]) -> Vec<Resource> {
    handles.iter().map(ResourceHandle::resource).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let handle = ResourceHandle::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"replicas": 2}
        }))
        .unwrap();

        assert_eq!(handle.gvk, GroupVersionKind::new("apps", "v1", "Deployment"));
        assert_eq!(handle.name(), "web");
        assert_eq!(handle.namespace(), Some("prod"));
        assert_eq!(handle.data()["spec"]["replicas"], 2);
        assert_eq!(handle.to_string(), "Deployment/prod/web");
    }

    #[test]
    fn test_missing_fields() {
        let err = ResourceHandle::from_value(json!({"kind": "ConfigMap", "metadata": {"name": "a"}}))
            .unwrap_err();
        assert!(err.to_string().contains("apiVersion"));

        let err = ResourceHandle::from_value(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}))
            .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_labels_and_identity() {
        let mut handle = ResourceHandle::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "prod"}
        }))
        .unwrap();

        handle.labels_mut().insert("team".into(), "core".into());
        assert_eq!(handle.label("team"), Some("core"));
        assert_eq!(handle.resource().namespace, "");
        assert_eq!(handle.resource().gvk.group, "");
    }
}
