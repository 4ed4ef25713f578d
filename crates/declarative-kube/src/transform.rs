//! Post-render transforms applied to parsed resources before apply
//!
//! Transforms run in registration order. They only touch labels,
//! annotations and pod templates (image pull secrets, localized images),
//! and must give the same result when run twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;
use crate::object::Object;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "declarative";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const WATCHED_BY_LABEL: &str = "declarative.io/watched-by";
pub const OWNED_BY_ANNOTATION: &str = "declarative.io/owned-by";
pub const DISCLAIMER_ANNOTATION: &str = "declarative.io/managed-by-disclaimer";
pub const DISCLAIMER_VALUE: &str = "DO NOT EDIT - This resource is managed by the declarative engine.\n\
    Any modifications are discarded and the resource is reverted to the original state.";

/// Kinds whose pod template lives at `spec.template.spec`
const POD_TEMPLATE_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job"];

/// Kinds whose images are replaced by [`ImageRewrite`]
const IMAGE_REWRITE_KINDS: &[&str] = &["Deployment", "StatefulSet"];

/// A mutation of rendered resources
pub trait ObjectTransform: Send + Sync {
    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()>;
}

impl<F> ObjectTransform for F
where
    F: Fn(&dyn Object, &mut [ResourceHandle]) -> Result<()> + Send + Sync,
{
    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        self(obj, resources)
    }
}

/// Run every transform in order
pub fn apply_transforms(
    transforms: &[Arc<dyn ObjectTransform>],
    obj: &dyn Object,
    resources: &mut [ResourceHandle],
) -> Result<()> {
    for transform in transforms {
        transform.transform(obj, resources)?;
    }
    Ok(())
}

/// `app.kubernetes.io/managed-by=declarative`
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagedByLabel;

impl ObjectTransform for ManagedByLabel {
    fn transform(&self, _obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        for resource in resources {
            resource
                .labels_mut()
                .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        }
        Ok(())
    }
}

/// Watched-by label plus an owned-by annotation naming the object
#[derive(Debug, Clone)]
pub struct WatchedByOwnedBy {
    watcher: String,
}

impl WatchedByOwnedBy {
    pub fn new(watcher: impl Into<String>) -> Self {
        Self {
            watcher: watcher.into(),
        }
    }
}

impl Default for WatchedByOwnedBy {
    fn default() -> Self {
        Self::new(MANAGED_BY_VALUE)
    }
}

impl ObjectTransform for WatchedByOwnedBy {
    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        let owner = format!("{}/{}", obj.namespace(), obj.name());
        for resource in resources {
            resource
                .labels_mut()
                .insert(WATCHED_BY_LABEL.to_string(), self.watcher.clone());
            resource
                .annotations_mut()
                .insert(OWNED_BY_ANNOTATION.to_string(), owner.clone());
        }
        Ok(())
    }
}

/// Component and part-of labels
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentLabels;

impl ObjectTransform for ComponentLabels {
    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        for resource in resources {
            let labels = resource.labels_mut();
            labels.insert(COMPONENT_LABEL.to_string(), obj.component_name().to_string());
            labels.insert(PART_OF_LABEL.to_string(), obj.name().to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisclaimerAnnotation;

impl ObjectTransform for DisclaimerAnnotation {
    fn transform(&self, _obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        for resource in resources {
            resource
                .annotations_mut()
                .insert(DISCLAIMER_ANNOTATION.to_string(), DISCLAIMER_VALUE.to_string());
        }
        Ok(())
    }
}

/// Fixed extra labels on every resource
#[derive(Debug, Clone, Default)]
pub struct CustomLabels {
    labels: BTreeMap<String, String>,
}

impl CustomLabels {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

impl ObjectTransform for CustomLabels {
    fn transform(&self, _obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        for resource in resources {
            resource
                .labels_mut()
                .extend(self.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }
}

/// Add an image pull secret to every pod template
///
/// Existing entries are kept; the secret is appended once.
#[derive(Debug, Clone)]
pub struct ImagePullSecret {
    name: String,
}

impl ImagePullSecret {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ObjectTransform for ImagePullSecret {
    fn transform(&self, _obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        let entry = json!({ "name": self.name });

        for resource in resources {
            if !POD_TEMPLATE_KINDS.contains(&resource.gvk.kind.as_str()) {
                continue;
            }
            let Some(pod_spec) = resource
                .data_mut()
                .pointer_mut("/spec/template/spec")
                .and_then(JsonValue::as_object_mut)
            else {
                continue;
            };

            let secrets = pod_spec
                .entry("imagePullSecrets")
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            if let Some(list) = secrets.as_array_mut()
                && !list.contains(&entry)
            {
                list.push(entry.clone());
            }
        }
        Ok(())
    }
}

/// A localized image split at its last `/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetImage {
    pub host_and_path: String,
    pub name_and_tag: String,
}

impl TargetImage {
    pub fn parse(reference: &str) -> Result<Self> {
        let Some((host_and_path, name_and_tag)) = reference.rsplit_once('/') else {
            return Err(DeclarativeError::InvalidConfig(format!(
                "invalid image reference {:?}: missing '/'",
                reference
            )));
        };
        Ok(Self {
            host_and_path: host_and_path.to_string(),
            name_and_tag: name_and_tag.to_string(),
        })
    }

    pub fn reference(&self) -> String {
        format!("{}/{}", self.host_and_path, self.name_and_tag)
    }

    /// Container images match on the `<name>:<tag>` suffix alone
    fn matches(&self, image: &str) -> bool {
        image.ends_with(&self.name_and_tag)
    }

    /// Env values must also look like a registry reference: at least one
    /// `/` and a first segment that is a dotted host or `localhost`
    fn matches_env_value(&self, value: &str) -> bool {
        if !self.matches(value) {
            return false;
        }
        match value.split_once('/') {
            Some((host, _)) => host.contains('.') || host.contains("localhost"),
            None => false,
        }
    }
}

/// Replace pod template images with the object's localized images
///
/// Container and init container `image` fields are replaced by the first
/// target whose `<name>:<tag>` they end with. Plain `value` env vars holding
/// a matching registry reference are replaced too; `valueFrom` entries are
/// left alone. Only Deployments and StatefulSets are touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRewrite;

impl ObjectTransform for ImageRewrite {
    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        let targets = obj
            .localized_images()
            .iter()
            .map(|image| TargetImage::parse(image))
            .collect::<Result<Vec<_>>>()?;
        if targets.is_empty() {
            return Ok(());
        }

        for resource in resources {
            if !IMAGE_REWRITE_KINDS.contains(&resource.gvk.kind.as_str()) {
                continue;
            }
            let name = resource.name().to_string();
            for field in ["containers", "initContainers"] {
                let Some(containers) = resource
                    .data_mut()
                    .pointer_mut(&format!("/spec/template/spec/{}", field))
                    .and_then(JsonValue::as_array_mut)
                else {
                    continue;
                };
                for (index, container) in containers.iter_mut().enumerate() {
                    rewrite_container(container, &targets).map_err(|message| {
                        DeclarativeError::InvalidManifest(format!(
                            "{} {}[{}]: {}",
                            name, field, index, message
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

fn rewrite_container(container: &mut JsonValue, targets: &[TargetImage]) -> std::result::Result<(), String> {
    if let Some(image) = container.get("image").and_then(JsonValue::as_str)
        && let Some(target) = targets.iter().find(|t| t.matches(image))
    {
        container["image"] = JsonValue::String(target.reference());
    }

    let Some(env) = container.get_mut("env").and_then(JsonValue::as_array_mut) else {
        return Ok(());
    };
    for entry in env {
        let Some(var) = entry.as_object_mut() else {
            return Err(format!("env entry must be a map, found {}", entry));
        };
        let Some(value) = var.get("value") else {
            continue;
        };
        let Some(value) = value.as_str() else {
            return Err(format!("env value must be a string, found {}", value));
        };
        if let Some(target) = targets.iter().find(|t| t.matches_env_value(value)) {
            var.insert("value".to_string(), JsonValue::String(target.reference()));
        }
    }
    Ok(())
}

/// Transforms applied by default, in order
pub fn default_transforms() -> Vec<Arc<dyn ObjectTransform>> {
    vec![
        Arc::new(ManagedByLabel),
        Arc::new(WatchedByOwnedBy::default()),
        Arc::new(ComponentLabels),
        Arc::new(DisclaimerAnnotation),
        Arc::new(ImageRewrite),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::testing::TestObject;

    fn resources() -> Vec<ResourceHandle> {
        vec![
            ResourceHandle::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "cfg", "labels": {"team": "core"}}
            }))
            .unwrap(),
            ResourceHandle::from_value(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "web"},
                "spec": {"template": {"spec": {
                    "imagePullSecrets": [{"name": "existing"}],
                    "containers": [{"name": "web", "image": "nginx"}]
                }}}
            }))
            .unwrap(),
        ]
    }

    #[test]
    fn test_default_transforms() {
        let mut obj = TestObject::new("shop", "prod");
        obj.component = "frontend".to_string();
        let mut resources = resources();

        apply_transforms(&default_transforms(), &obj, &mut resources).unwrap();

        let cfg = &resources[0];
        assert_eq!(cfg.label("team"), Some("core"));
        assert_eq!(cfg.label(MANAGED_BY_LABEL), Some("declarative"));
        assert_eq!(cfg.label(WATCHED_BY_LABEL), Some("declarative"));
        assert_eq!(cfg.label(COMPONENT_LABEL), Some("frontend"));
        assert_eq!(cfg.label(PART_OF_LABEL), Some("shop"));
        assert_eq!(cfg.annotation(OWNED_BY_ANNOTATION), Some("prod/shop"));
        assert!(cfg.annotation(DISCLAIMER_ANNOTATION).is_some());
    }

    #[test]
    fn test_transforms_are_idempotent() {
        let obj = TestObject::new("shop", "prod");
        let transforms = default_transforms();

        let mut once = resources();
        apply_transforms(&transforms, &obj, &mut once).unwrap();
        let mut twice = once.clone();
        apply_transforms(&transforms, &obj, &mut twice).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_image_pull_secret() {
        let obj = TestObject::new("shop", "prod");
        let mut resources = resources();
        let transform = ImagePullSecret::new("registry");

        transform.transform(&obj, &mut resources).unwrap();
        transform.transform(&obj, &mut resources).unwrap();

        let secrets = resources[1].data()["spec"]["template"]["spec"]["imagePullSecrets"].clone();
        insta::assert_yaml_snapshot!(secrets, @r"
        - name: existing
        - name: registry
        ");
        assert!(resources[0].data().get("spec").is_none());
    }

    #[test]
    fn test_closure_transform_and_custom_labels() {
        let obj = TestObject::new("shop", "prod");
        let mut resources = resources();

        let rename = |_: &dyn Object, resources: &mut [ResourceHandle]| -> Result<()> {
            for r in resources {
                r.labels_mut().insert("stage".into(), "canary".into());
            }
            Ok(())
        };
        let transforms: Vec<Arc<dyn ObjectTransform>> = vec![
            Arc::new(rename),
            Arc::new(CustomLabels::new(BTreeMap::from([("stage".to_string(), "stable".to_string())]))),
        ];

        apply_transforms(&transforms, &obj, &mut resources).unwrap();
        assert_eq!(resources[0].label("stage"), Some("stable"));
    }

    fn workload(kind: &str, spec: JsonValue) -> ResourceHandle {
        ResourceHandle::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": kind,
            "metadata": {"name": "api", "namespace": "prod"},
            "spec": {"template": {"spec": spec}}
        }))
        .unwrap()
    }

    #[test]
    fn test_target_image_parse() {
        let target = TargetImage::parse("europe-docker.pkg.dev/mirror/team/app:1.2.3").unwrap();
        assert_eq!(target.host_and_path, "europe-docker.pkg.dev/mirror/team");
        assert_eq!(target.name_and_tag, "app:1.2.3");
        assert_eq!(target.reference(), "europe-docker.pkg.dev/mirror/team/app:1.2.3");

        assert!(matches!(
            TargetImage::parse("app:1.2.3"),
            Err(DeclarativeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_image_rewrite() {
        let mut obj = TestObject::new("shop", "prod");
        obj.localized_images = vec![
            "europe-docker.pkg.dev/mirror/app:1.2.3".to_string(),
            "localhost:5000/tools/init:0.1".to_string(),
        ];
        let mut resources = vec![
            workload(
                "Deployment",
                json!({
                    "initContainers": [{"name": "init", "image": "init:0.1"}],
                    "containers": [
                        {
                            "name": "api",
                            "image": "docker.io/org/app:1.2.3",
                            "env": [
                                {"name": "IMAGE", "value": "docker.io/org/app:1.2.3"},
                                {"name": "SHORT", "value": "app:1.2.3"},
                                {"name": "FROM", "valueFrom": {"fieldRef": {"fieldPath": "metadata.name"}}}
                            ]
                        },
                        {"name": "sidecar", "image": "envoy:1.30"}
                    ]
                }),
            ),
            workload("DaemonSet", json!({"containers": [{"name": "api", "image": "app:1.2.3"}]})),
        ];

        ImageRewrite.transform(&obj, &mut resources).unwrap();
        let once = resources.clone();
        ImageRewrite.transform(&obj, &mut resources).unwrap();
        assert_eq!(resources, once);

        let spec = &resources[0].data()["spec"]["template"]["spec"];
        assert_eq!(spec["containers"][0]["image"], "europe-docker.pkg.dev/mirror/app:1.2.3");
        assert_eq!(spec["containers"][1]["image"], "envoy:1.30");
        assert_eq!(spec["initContainers"][0]["image"], "localhost:5000/tools/init:0.1");

        let env = &spec["containers"][0]["env"];
        assert_eq!(env[0]["value"], "europe-docker.pkg.dev/mirror/app:1.2.3");
        assert_eq!(env[1]["value"], "app:1.2.3");
        assert!(env[2].get("value").is_none());

        let daemon = &resources[1].data()["spec"]["template"]["spec"];
        assert_eq!(daemon["containers"][0]["image"], "app:1.2.3");
    }

    #[test]
    fn test_image_rewrite_without_targets_is_noop() {
        let obj = TestObject::new("shop", "prod");
        let mut resources = resources();
        let before = resources.clone();

        ImageRewrite.transform(&obj, &mut resources).unwrap();
        assert_eq!(resources, before);
    }

    #[test]
    fn test_image_rewrite_rejects_non_string_env() {
        let mut obj = TestObject::new("shop", "prod");
        obj.localized_images = vec!["registry.example.io/app:1.0".to_string()];
        let mut resources = vec![workload(
            "StatefulSet",
            json!({"containers": [{"name": "api", "image": "app:1.0", "env": [{"name": "N", "value": 5}]}]}),
        )];

        let err = ImageRewrite.transform(&obj, &mut resources).unwrap_err();
        assert!(matches!(err, DeclarativeError::InvalidManifest(_)));
        assert!(err.to_string().contains("api containers[0]"));
    }
}
