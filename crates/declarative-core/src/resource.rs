//! Resource identity and ordering

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Separator used when joining identity fields
const ID_SEPARATOR: &str = "/";

/// Group, version and kind of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse from an `apiVersion` string and a kind
    ///
    /// `v1` maps to the core group, `apps/v1` to group `apps`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        Self::new(group, version, kind)
    }

    /// Render back to an `apiVersion` string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Identity of a cluster object owned by the engine
///
/// Two resources with the same [`Resource::id`] refer to the same cluster
/// object, whatever else differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(flatten)]
    pub gvk: GroupVersionKind,
}

impl Resource {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, gvk: GroupVersionKind) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            gvk,
        }
    }

    /// Stable identity string used for set membership
    pub fn id(&self) -> String {
        [
            self.namespace.as_str(),
            self.name.as_str(),
            self.gvk.group.as_str(),
            self.gvk.version.as_str(),
            self.gvk.kind.as_str(),
        ]
        .join(ID_SEPARATOR)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.gvk.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.gvk.kind, self.namespace, self.name)
        }
    }
}

/// Elements of the larger set whose identity is absent from the smaller one
///
/// Called as `resources_diff(previous, current)` this yields the orphans of
/// a pass. When both sides have equal length, `a` is treated as the larger.
pub fn resources_diff(a: &[Resource], b: &[Resource]) -> Vec<Resource> {
    let (larger, smaller) = if a.len() < b.len() { (b, a) } else { (a, b) };

    let known: HashSet<String> = smaller.iter().map(Resource::id).collect();
    larger
        .iter()
        .filter(|r| !known.contains(&r.id()))
        .cloned()
        .collect()
}

/// Resource category for ordering output and apply batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    /// CustomResourceDefinition
    Crd = 0,
    Namespace = 1,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 2,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 21,
    /// NetworkPolicy, Service, Endpoints, Ingress
    Network = 30,
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod
    Workload = 40,
    /// Job, CronJob
    Batch = 50,
    /// HorizontalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 60,
    /// Instances of custom types
    CustomResource = 70,
    Other = 100,
}

impl ResourceCategory {
    /// Categorize a resource by its kind and apiVersion
    pub fn from_resource(kind: &str, api_version: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "VerticalPodAutoscaler" | "PodDisruptionBudget" => {
                Self::Autoscaling
            }
            _ if Self::is_custom_api_version(api_version) => Self::CustomResource,
            _ => Self::Other,
        }
    }

    /// Check if an apiVersion belongs to a non-builtin group
    pub fn is_custom_api_version(api_version: &str) -> bool {
        const BUILTIN_GROUPS: &[&str] = &[
            "",
            "apps",
            "batch",
            "autoscaling",
            "policy",
            "networking.k8s.io",
            "rbac.authorization.k8s.io",
            "storage.k8s.io",
            "admissionregistration.k8s.io",
            "apiextensions.k8s.io",
            "certificates.k8s.io",
            "coordination.k8s.io",
            "discovery.k8s.io",
            "events.k8s.io",
            "flowcontrol.apiserver.k8s.io",
            "node.k8s.io",
            "scheduling.k8s.io",
        ];

        let group = api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("");
        !BUILTIN_GROUPS.contains(&group)
    }
}
