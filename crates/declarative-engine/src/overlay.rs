//! Overlay processor
//!
//! An overlay directory holds an `overlay.yaml` listing base resources plus
//! the edits to apply on top of them. Resource entries may point at files or
//! at other overlay directories, which are processed first.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use declarative_core::{ResourceCategory, Values, deep_merge, is_blank_document};

use crate::engine::DOCUMENT_SEPARATOR;
use crate::error::{EngineError, Result};

pub const OVERLAY_FILE: &str = "overlay.yaml";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "declarative-overlay";

/// Kinds that never carry a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "IngressClass",
    "PriorityClass",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Where resource paths may point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadRestrictions {
    /// Paths must stay inside the overlay root
    #[default]
    RootOnly,
    None,
}

/// Processor options, taken from `Spec.values` for the overlay backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayOptions {
    pub load_restrictions: LoadRestrictions,
    pub add_managed_by_label: bool,
    /// Order output by resource category instead of declaration order
    pub sort_output: bool,
}

impl OverlayOptions {
    /// Build options from renderer values
    ///
    /// Null or empty values give the defaults; a map is deep-merged onto the
    /// serialized defaults so partial maps are accepted.
    pub fn from_values(values: &Values) -> Result<Self> {
        if values.is_empty() {
            return Ok(Self::default());
        }
        let overrides = values.as_map()?;

        let mut merged = serde_json::to_value(Self::default())?;
        deep_merge(&mut merged, &JsonValue::Object(overrides.clone()));
        Ok(serde_json::from_value(merged)?)
    }
}

/// Content of `overlay.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayFile {
    pub resources: Vec<String>,
    pub namespace: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,
    pub common_labels: BTreeMap<String, String>,
    pub common_annotations: BTreeMap<String, String>,
    pub patches: Vec<OverlayPatch>,
    pub images: Vec<ImageOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayPatch {
    #[serde(default)]
    pub target: PatchTarget,
    /// JSON merge patch
    pub patch: JsonValue,
}

/// Empty fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchTarget {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PatchTarget {
    fn matches(&self, resource: &JsonValue) -> bool {
        let kind_ok = self
            .kind
            .as_deref()
            .is_none_or(|k| resource["kind"].as_str() == Some(k));
        let name_ok = self
            .name
            .as_deref()
            .is_none_or(|n| resource["metadata"]["name"].as_str() == Some(n));
        kind_ok && name_ok
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverride {
    pub name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub new_tag: Option<String>,
}

/// Runs an overlay tree and produces a manifest stream
#[derive(Debug, Clone, Default)]
pub struct OverlayProcessor {
    options: OverlayOptions,
}

impl OverlayProcessor {
    pub fn new(options: OverlayOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    /// Run the overlay at `path` and serialize the result
    pub fn render(&self, path: &Path) -> Result<String> {
        let resources = self.run(path)?;
        let mut out = String::new();
        for resource in &resources {
            out.push_str(DOCUMENT_SEPARATOR);
            out.push_str(serde_yaml::to_string(resource)?.trim_end());
            out.push('\n');
        }
        Ok(out)
    }

    /// Run the overlay at `path` and return the resulting resources
    pub fn run(&self, path: &Path) -> Result<Vec<JsonValue>> {
        let root = path.canonicalize().map_err(|e| {
            EngineError::overlay(format!("overlay root {}: {}", path.display(), e))
        })?;

        let mut resources = self.load_dir(&root, &root, &mut Vec::new())?;

        if self.options.add_managed_by_label {
            for resource in &mut resources {
                set_metadata_entry(resource, "labels", MANAGED_BY_LABEL, MANAGED_BY_VALUE);
            }
        }

        if self.options.sort_output {
            resources.sort_by_key(|r| {
                ResourceCategory::from_resource(
                    r["kind"].as_str().unwrap_or_default(),
                    r["apiVersion"].as_str().unwrap_or_default(),
                )
            });
        }

        Ok(resources)
    }

    /// `chain` holds the directories currently being loaded; a directory may
    /// be shared by several overlays but never include itself.
    fn load_dir(&self, dir: &Path, root: &Path, chain: &mut Vec<PathBuf>) -> Result<Vec<JsonValue>> {
        if chain.iter().any(|d| d == dir) {
            return Err(EngineError::overlay(format!(
                "cycle detected: {} includes itself",
                dir.display()
            )));
        }

        let overlay_path = dir.join(OVERLAY_FILE);
        if !overlay_path.is_file() {
            return Err(EngineError::overlay(format!(
                "{} not found in {}",
                OVERLAY_FILE,
                dir.display()
            )));
        }
        let overlay: OverlayFile = serde_yaml::from_str(&std::fs::read_to_string(&overlay_path)?)?;

        chain.push(dir.to_path_buf());
        let mut resources = Vec::new();
        for entry in &overlay.resources {
            let target = self.resolve(dir, root, entry)?;
            if target.is_dir() {
                resources.extend(self.load_dir(&target, root, chain)?);
            } else {
                resources.extend(parse_documents(&std::fs::read_to_string(&target)?)?);
            }
        }
        chain.pop();

        for resource in &mut resources {
            apply_overlay(&overlay, resource);
        }

        Ok(resources)
    }

    fn resolve(&self, dir: &Path, root: &Path, entry: &str) -> Result<PathBuf> {
        let target = dir.join(entry).canonicalize().map_err(|e| {
            EngineError::overlay(format!("resource {} in {}: {}", entry, dir.display(), e))
        })?;

        if self.options.load_restrictions == LoadRestrictions::RootOnly && !target.starts_with(root) {
            return Err(EngineError::overlay(format!(
                "resource {} escapes overlay root {}",
                entry,
                root.display()
            )));
        }
        Ok(target)
    }
}

fn parse_documents(content: &str) -> Result<Vec<JsonValue>> {
    let mut docs = Vec::new();
    for doc in content.split("\n---") {
        let doc = doc.trim_start_matches("---");
        if is_blank_document(doc) {
            continue;
        }
        let value: JsonValue = serde_yaml::from_str(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Apply one overlay level to one resource
///
/// Patches match on the names the resource had before this level's prefix
/// and suffix are added.
fn apply_overlay(overlay: &OverlayFile, resource: &mut JsonValue) {
    let matching: Vec<&OverlayPatch> = overlay
        .patches
        .iter()
        .filter(|p| p.target.matches(resource))
        .collect();
    for patch in matching {
        merge_patch(resource, &patch.patch);
    }

    for image in &overlay.images {
        rewrite_images(resource, image);
    }

    let kind = resource["kind"].as_str().unwrap_or_default().to_string();
    let cluster_scoped = CLUSTER_SCOPED_KINDS.contains(&kind.as_str());

    if let Some(namespace) = &overlay.namespace
        && !cluster_scoped
        && let Some(meta) = resource.get_mut("metadata").and_then(JsonValue::as_object_mut)
    {
        meta.insert("namespace".into(), JsonValue::String(namespace.clone()));
    }

    let renamed = resource["metadata"]["name"].as_str().map(|name| {
        format!(
            "{}{}{}",
            overlay.name_prefix.as_deref().unwrap_or_default(),
            name,
            overlay.name_suffix.as_deref().unwrap_or_default()
        )
    });
    if !cluster_scoped && let Some(renamed) = renamed {
        resource["metadata"]["name"] = JsonValue::String(renamed);
    }

    for (key, value) in &overlay.common_labels {
        set_metadata_entry(resource, "labels", key, value);
        if resource["spec"]["template"]["metadata"].is_object()
            || resource["spec"]["template"]["spec"].is_object()
        {
            let template = &mut resource["spec"]["template"];
            set_metadata_entry(template, "labels", key, value);
        }
    }

    for (key, value) in &overlay.common_annotations {
        set_metadata_entry(resource, "annotations", key, value);
    }
}

/// RFC 7386 JSON merge patch: null deletes a key
fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(JsonValue::Null),
                    value,
                );
            }
        }
    }
}

fn set_metadata_entry(resource: &mut JsonValue, field: &str, key: &str, value: &str) {
    if !resource.is_object() {
        return;
    }
    let metadata = &mut resource["metadata"];
    if !metadata.is_object() {
        *metadata = JsonValue::Object(serde_json::Map::new());
    }
    let entries = &mut metadata[field];
    if !entries.is_object() {
        *entries = JsonValue::Object(serde_json::Map::new());
    }
    entries[key] = JsonValue::String(value.to_string());
}

/// Rewrite `image` fields of every container list found in the resource
fn rewrite_images(value: &mut JsonValue, image: &ImageOverride) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                if (key == "containers" || key == "initContainers")
                    && let JsonValue::Array(containers) = child
                {
                    for container in containers {
                        if let Some(current) = container["image"].as_str()
                            && let Some(updated) = override_image(current, image)
                        {
                            container["image"] = JsonValue::String(updated);
                        }
                    }
                } else {
                    rewrite_images(child, image);
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                rewrite_images(item, image);
            }
        }
        _ => {}
    }
}

/// Split an image reference into (name, tag-or-digest suffix)
fn split_image(reference: &str) -> (&str, &str) {
    if let Some(at) = reference.find('@') {
        return (&reference[..at], &reference[at..]);
    }
    let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_slash..].rfind(':') {
        Some(colon) => reference.split_at(last_slash + colon),
        None => (reference, ""),
    }
}

fn override_image(current: &str, image: &ImageOverride) -> Option<String> {
    let (name, suffix) = split_image(current);
    if name != image.name {
        return None;
    }
    let name = image.new_name.as_deref().unwrap_or(name);
    Some(match &image.new_tag {
        Some(tag) => format!("{}:{}", name, tag),
        None => format!("{}{}", name, suffix),
    })
}
