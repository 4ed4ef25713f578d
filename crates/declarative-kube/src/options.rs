//! Reconciler options
//!
//! [`Options`] is a plain value: every option is a public field. Use
//! [`Options::builder`] to change a few of them, or
//! [`OptionsBuilder::from_config`] to start from an [`EngineConfig`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ManifestCache;
use crate::client_cache::{
    CACHE_KEY_LABEL, ClientCache, ClientCacheKeyFn, MemoryClientCache, TargetClusterResolver,
    key_from_label_or_resource,
};
use crate::config::EngineConfig;
use crate::events::{EventRecorder, TracingEventRecorder};
use crate::hooks::Hook;
use crate::object::Object;
use crate::parser::{CachedManifestParser, DEFAULT_PARSE_CACHE_TTL, ManifestParser};
use crate::ready::ReadyCheck;
use crate::transform::{ObjectTransform, default_transforms};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_FINALIZER: &str = "declarative.io/finalizer";
pub const DEFAULT_FIELD_OWNER: &str = "declarative.io/applier";
pub const SKIP_RECONCILIATION_LABEL: &str = "declarative.io/skip-reconciliation";

/// Decides whether a pass is skipped for an object
pub type SkipPredicate = Arc<dyn Fn(&dyn Object) -> bool + Send + Sync>;

/// Skip objects carrying `label=true`
pub fn skip_on_label(label: &str) -> SkipPredicate {
    let label = label.to_string();
    Arc::new(move |obj: &dyn Object| obj.labels().get(&label).is_some_and(|v| v == "true"))
}

/// Requeue policy after a successful pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsistencyCheck {
    /// Wait for the next change
    #[default]
    Disabled,
    /// Requeue immediately
    Permanent,
    /// Requeue after the interval
    Periodic(Duration),
}

/// Everything a [`crate::Reconciler`] can be configured with
#[derive(Clone)]
pub struct Options {
    /// Namespace namespaced resources are placed in
    pub namespace: String,
    /// Apply the namespace before anything else
    pub create_namespace: bool,
    /// Finalizer the caller keeps on reconciled objects
    pub finalizer: String,
    /// Field manager for server-side apply
    pub field_owner: String,
    /// Run in order on parsed resources before apply
    pub post_render_transforms: Vec<Arc<dyn ObjectTransform>>,
    pub consistency_check: ConsistencyCheck,
    pub manifest_cache: ManifestCache,
    pub manifest_parser: Arc<dyn ManifestParser>,
    pub skip_reconcile_on: SkipPredicate,
    /// Replaces the deep readiness check
    pub custom_ready_check: Option<Arc<dyn ReadyCheck>>,
    /// Resolves the cluster resources go to; the local one when unset
    pub remote_target_cluster: Option<Arc<dyn TargetClusterResolver>>,
    pub client_cache_key: ClientCacheKeyFn,
    pub client_cache: Arc<dyn ClientCache>,
    pub post_run: Vec<Arc<dyn Hook>>,
    pub pre_delete: Vec<Arc<dyn Hook>>,
    pub recorder: Arc<dyn EventRecorder>,
    /// Remove prerequisite types together with the object
    pub delete_prerequisites: bool,
    /// Extra labels put on every applied resource
    pub custom_resource_labels: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            create_namespace: false,
            finalizer: DEFAULT_FINALIZER.to_string(),
            field_owner: DEFAULT_FIELD_OWNER.to_string(),
            post_render_transforms: default_transforms(),
            consistency_check: ConsistencyCheck::Disabled,
            manifest_cache: ManifestCache::default(),
            manifest_parser: Arc::new(CachedManifestParser::new(DEFAULT_PARSE_CACHE_TTL)),
            skip_reconcile_on: skip_on_label(SKIP_RECONCILIATION_LABEL),
            custom_ready_check: None,
            remote_target_cluster: None,
            client_cache_key: key_from_label_or_resource(CACHE_KEY_LABEL),
            client_cache: Arc::new(MemoryClientCache::new()),
            post_run: Vec::new(),
            pre_delete: Vec::new(),
            recorder: Arc::new(TracingEventRecorder),
            delete_prerequisites: false,
            custom_resource_labels: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("namespace", &self.namespace)
            .field("create_namespace", &self.create_namespace)
            .field("finalizer", &self.finalizer)
            .field("field_owner", &self.field_owner)
            .field("post_render_transforms", &self.post_render_transforms.len())
            .field("consistency_check", &self.consistency_check)
            .field("manifest_cache", &self.manifest_cache)
            .field("custom_ready_check", &self.custom_ready_check.is_some())
            .field("remote_target_cluster", &self.remote_target_cluster.is_some())
            .field("post_run", &self.post_run.len())
            .field("pre_delete", &self.pre_delete.len())
            .field("delete_prerequisites", &self.delete_prerequisites)
            .field("custom_resource_labels", &self.custom_resource_labels)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Builder for [`Options`]
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Start from the static options of a configuration file
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::default()
            .namespace(&config.namespace, config.create_namespace)
            .finalizer(&config.finalizer)
            .field_owner(&config.field_owner)
            .manifest_cache(config.manifest_cache.clone())
            .consistency_check((&config.consistency_check).into())
            .manifest_parser(Arc::new(CachedManifestParser::new(config.parse_cache_ttl)))
            .delete_prerequisites(config.delete_prerequisites)
            .custom_resource_labels(config.custom_resource_labels.clone())
    }

    pub fn namespace(mut self, namespace: impl Into<String>, create: bool) -> Self {
        self.options.namespace = namespace.into();
        self.options.create_namespace = create;
        self
    }

    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.options.finalizer = finalizer.into();
        self
    }

    pub fn field_owner(mut self, owner: impl Into<String>) -> Self {
        self.options.field_owner = owner.into();
        self
    }

    /// Append a transform after the ones already registered
    pub fn post_render_transform(mut self, transform: Arc<dyn ObjectTransform>) -> Self {
        self.options.post_render_transforms.push(transform);
        self
    }

    /// Replace the transform pipeline, defaults included
    pub fn post_render_transforms(mut self, transforms: Vec<Arc<dyn ObjectTransform>>) -> Self {
        self.options.post_render_transforms = transforms;
        self
    }

    pub fn consistency_check(mut self, check: ConsistencyCheck) -> Self {
        self.options.consistency_check = check;
        self
    }

    pub fn permanent_consistency_check(self) -> Self {
        self.consistency_check(ConsistencyCheck::Permanent)
    }

    pub fn periodic_consistency_check(self, interval: Duration) -> Self {
        self.consistency_check(ConsistencyCheck::Periodic(interval))
    }

    pub fn manifest_cache(mut self, cache: impl Into<ManifestCache>) -> Self {
        self.options.manifest_cache = cache.into();
        self
    }

    pub fn manifest_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.options.manifest_parser = parser;
        self
    }

    pub fn skip_reconcile_on(mut self, predicate: SkipPredicate) -> Self {
        self.options.skip_reconcile_on = predicate;
        self
    }

    pub fn custom_ready_check(mut self, check: Arc<dyn ReadyCheck>) -> Self {
        self.options.custom_ready_check = Some(check);
        self
    }

    pub fn remote_target_cluster(mut self, resolver: Arc<dyn TargetClusterResolver>) -> Self {
        self.options.remote_target_cluster = Some(resolver);
        self
    }

    /// Key clients by the value of `label`, falling back to namespace/name
    pub fn client_cache_key_from_label_or_resource(mut self, label: &str) -> Self {
        self.options.client_cache_key = key_from_label_or_resource(label);
        self
    }

    pub fn client_cache(mut self, cache: Arc<dyn ClientCache>) -> Self {
        self.options.client_cache = cache;
        self
    }

    pub fn post_run(mut self, hook: Arc<dyn Hook>) -> Self {
        self.options.post_run.push(hook);
        self
    }

    pub fn pre_delete(mut self, hook: Arc<dyn Hook>) -> Self {
        self.options.pre_delete.push(hook);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.options.recorder = recorder;
        self
    }

    pub fn delete_prerequisites(mut self, delete: bool) -> Self {
        self.options.delete_prerequisites = delete;
        self
    }

    pub fn custom_resource_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.options.custom_resource_labels = labels;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
