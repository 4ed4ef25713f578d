//! The reconciliation pass
//!
//! One call to [`Reconciler::reconcile`] drives an object one step towards
//! its desired state: render, install prerequisites, apply, wait for
//! readiness, prune orphans, or tear everything down when the object is
//! being deleted. Retry signals are returned as errors; map them to a
//! requeue with [`error_policy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use declarative_core::{Condition, ConditionStatus, Resource, Spec, State, resources_diff};
use kube::discovery::Scope;
use kube::runtime::controller::Action;
use serde_json::json;

use crate::cleanup::{ConcurrentCleanup, orphans};
use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::events::EventType;
use crate::handle::{ResourceHandle, resources_of};
use crate::hooks::{HookPhase, run_hooks};
use crate::object::Object;
use crate::options::{ConsistencyCheck, Options};
use crate::ready::{ConcurrentReadyCheck, ReadyCheck};
use crate::render::{RenderContext, Renderer, fail, renderer_for};
use crate::ssa::ConcurrentSsa;
use crate::transform::{CustomLabels, ObjectTransform, apply_transforms};

pub const RESOURCES_CONDITION: &str = "Resources";
pub const INSTALLATION_CONDITION: &str = "Installation";

/// Requeue delay for retry signals
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Requeue delay after a hard failure
pub const ERROR_INTERVAL: Duration = Duration::from_secs(60);

/// Produces the [`Spec`] for an object at the start of each pass
#[async_trait]
pub trait SpecResolver: Send + Sync {
    async fn resolve(&self, client: &dyn ClusterClient, obj: &dyn Object) -> Result<Spec>;
}

/// Resolves every object to the same spec
#[derive(Debug, Clone)]
pub struct StaticSpecResolver(pub Spec);

#[async_trait]
impl SpecResolver for StaticSpecResolver {
    async fn resolve(&self, _client: &dyn ClusterClient, _obj: &dyn Object) -> Result<Spec> {
        Ok(self.0.clone())
    }
}

/// What the caller should do with the named finalizer on the object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizerDirective {
    Ensure(String),
    Remove(String),
}

impl FinalizerDirective {
    pub fn name(&self) -> &str {
        match self {
            Self::Ensure(name) | Self::Remove(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: Action,
    pub finalizer: FinalizerDirective,
}

/// Requeue policy for a failed pass
pub fn error_policy(err: &DeclarativeError) -> Action {
    if err.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::requeue(ERROR_INTERVAL)
    }
}

pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    resolver: Arc<dyn SpecResolver>,
    options: Options,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, resolver: Arc<dyn SpecResolver>, options: Options) -> Self {
        Self {
            client,
            resolver,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Run one pass for `obj`, rewriting its status along the way
    pub async fn reconcile(&self, obj: &mut dyn Object) -> Result<ReconcileOutcome> {
        if (self.options.skip_reconcile_on)(&*obj) {
            tracing::info!(
                object = %format_args!("{}/{}", obj.namespace(), obj.name()),
                "reconciliation skipped"
            );
            return Ok(ReconcileOutcome {
                action: Action::await_change(),
                finalizer: FinalizerDirective::Ensure(self.options.finalizer.clone()),
            });
        }

        self.init_conditions(obj);

        let cache_key = (self.options.client_cache_key)(&*obj);
        let client = match self.target_client(&cache_key, &*obj).await {
            Ok(client) => client,
            Err(e) => return Err(self.fail(obj, "ClientResolution", e)),
        };

        let spec = match self.resolver.resolve(&*client, &*obj).await {
            Ok(spec) => spec,
            Err(e) => return Err(self.fail(obj, "SpecResolution", e)),
        };
        tracing::debug!(
            object = obj.name(),
            manifest = %spec.manifest_name,
            mode = %spec.mode,
            "spec resolved"
        );

        let renderer = renderer_for(
            spec,
            RenderContext {
                client: Arc::clone(&client),
                recorder: Arc::clone(&self.options.recorder),
                namespace: self.options.namespace.clone(),
                field_owner: self.options.field_owner.clone(),
            },
            &self.options.manifest_cache,
        );
        renderer.initialize(obj)?;

        if obj.is_deleting() {
            self.delete(obj, &client, renderer.as_ref()).await
        } else {
            self.apply(obj, &client, &cache_key, renderer.as_ref()).await
        }
    }

    async fn apply(
        &self,
        obj: &mut dyn Object,
        client: &Arc<dyn ClusterClient>,
        cache_key: &str,
        renderer: &dyn Renderer,
    ) -> Result<ReconcileOutcome> {
        if self.options.create_namespace
            && let Err(e) = self.ensure_namespace(client).await
        {
            return Err(self.fail(obj, "NamespaceCreation", e));
        }

        renderer.ensure_prerequisites(obj).await?;

        let manifest = renderer.render(obj).await?;
        let mut resources = match self.options.manifest_parser.parse(&manifest) {
            Ok(resources) => resources,
            Err(e) => return Err(self.fail(obj, "ManifestParsing", e)),
        };

        if let Err(e) = self.transform(&*obj, &mut resources) {
            return Err(self.fail(obj, "PostRenderTransform", e));
        }
        if let Err(e) = self.normalize_namespaces(client.as_ref(), &mut resources).await {
            return Err(self.fail(obj, "NamespaceNormalization", e));
        }

        let status = obj.status().with_condition(
            Condition::new(RESOURCES_CONDITION, ConditionStatus::True)
                .with_reason("ResourcesAvailable")
                .with_message("resources are parsed and ready for use")
                .with_generation(obj.generation()),
        );
        obj.set_status(status);

        let ssa = ConcurrentSsa::new(Arc::clone(client), &self.options.field_owner);
        if let Err(e) = ssa.run(&resources).await {
            if matches!(e, DeclarativeError::ClientUnauthorized) {
                tracing::warn!(key = cache_key, "dropping cached client after unauthorized apply");
                self.options.client_cache.delete(cache_key);
            }
            return Err(self.fail(obj, "ServerSideApply", e));
        }

        let check: Arc<dyn ReadyCheck> = self
            .options
            .custom_ready_check
            .clone()
            .unwrap_or_else(|| Arc::new(ConcurrentReadyCheck));
        match check.run(Arc::clone(client), &*obj, &resources).await {
            Ok(()) => {}
            Err(e) if e.contains_not_ready() => {
                let message = "resources are not yet ready";
                self.options
                    .recorder
                    .event(&*obj, EventType::Normal, "ResourceReadyCheck", message);
                let status = obj
                    .status()
                    .with_state(State::Processing)
                    .with_operation(message);
                obj.set_status(status);
                return Err(DeclarativeError::ResourcesNotReady);
            }
            Err(e) => return Err(self.fail(obj, "ResourceReadyCheck", e)),
        }

        let current = resources_of(&resources);
        let previous = obj.status().synced;
        let pruned: Vec<Resource> = orphans(&previous, &current)
            .into_iter()
            .filter(|r| !self.is_target_namespace(r))
            .collect();
        if !pruned.is_empty() {
            tracing::info!(object = obj.name(), orphans = pruned.len(), "pruning orphaned resources");
        }
        match ConcurrentCleanup::new(Arc::clone(client)).run(&pruned).await {
            Ok(()) => {}
            Err(DeclarativeError::DeletionNotFinished) => {
                let status = obj
                    .status()
                    .with_state(State::Processing)
                    .with_operation("waiting for orphaned resources to be deleted");
                obj.set_status(status);
                return Err(DeclarativeError::DeletionNotFinished);
            }
            Err(e) => return Err(self.fail(obj, "OrphanCleanup", e)),
        }

        let status = obj.status().with_synced(current);
        obj.set_status(status);

        if let Err(e) = run_hooks(&self.options.post_run, HookPhase::PostRun, client.as_ref(), &*obj).await {
            if e.is_retryable() {
                return Err(e);
            }
            return Err(self.fail(obj, "PostRunHook", e));
        }

        let message = "installation is ready and resources can be used";
        let status = obj
            .status()
            .with_condition(
                Condition::new(INSTALLATION_CONDITION, ConditionStatus::True)
                    .with_reason("Ready")
                    .with_message(message)
                    .with_generation(obj.generation()),
            )
            .with_state(State::Ready)
            .with_operation(message);
        obj.set_status(status);
        tracing::info!(object = obj.name(), resources = resources.len(), "reconciliation finished");

        Ok(ReconcileOutcome {
            action: self.success_action(),
            finalizer: FinalizerDirective::Ensure(self.options.finalizer.clone()),
        })
    }

    async fn delete(
        &self,
        obj: &mut dyn Object,
        client: &Arc<dyn ClusterClient>,
        renderer: &dyn Renderer,
    ) -> Result<ReconcileOutcome> {
        let status = obj
            .status()
            .with_state(State::Deleting)
            .with_operation("deletion in progress");
        obj.set_status(status);

        if let Err(e) = run_hooks(&self.options.pre_delete, HookPhase::PreDelete, client.as_ref(), &*obj).await {
            if e.is_retryable() {
                return Err(e);
            }
            return Err(self.fail(obj, "PreDeleteHook", e));
        }

        let owned = resources_diff(&obj.status().synced, &[]);
        match ConcurrentCleanup::new(Arc::clone(client)).run(&owned).await {
            Ok(()) => {}
            Err(DeclarativeError::DeletionNotFinished) => {
                let message = "waiting for resources to be deleted";
                self.options
                    .recorder
                    .event(&*obj, EventType::Normal, "Deletion", message);
                let status = obj.status().with_operation(message);
                obj.set_status(status);
                return Err(DeclarativeError::DeletionNotFinished);
            }
            Err(e) => return Err(self.fail(obj, "ResourceDeletion", e)),
        }

        if self.options.delete_prerequisites {
            renderer.remove_prerequisites(obj).await?;
        }

        let status = obj
            .status()
            .with_synced(Vec::new())
            .with_operation("deletion finished");
        obj.set_status(status);
        tracing::info!(object = obj.name(), deleted = owned.len(), "owned resources removed");

        Ok(ReconcileOutcome {
            action: Action::await_change(),
            finalizer: FinalizerDirective::Remove(self.options.finalizer.clone()),
        })
    }

    /// Register `Resources` and `Installation` as False on first sight
    fn init_conditions(&self, obj: &mut dyn Object) {
        let mut status = obj.status();
        let mut changed = false;
        for (type_, reason) in [
            (RESOURCES_CONDITION, "ResourcesNotYetAvailable"),
            (INSTALLATION_CONDITION, "NotYetInstalled"),
        ] {
            if !status.conditions.contains(type_) {
                status = status.with_condition(
                    Condition::new(type_, ConditionStatus::False)
                        .with_reason(reason)
                        .with_generation(obj.generation()),
                );
                changed = true;
            }
        }
        if changed {
            obj.set_status(status.with_state(State::Processing));
        }
    }

    async fn target_client(&self, key: &str, obj: &dyn Object) -> Result<Arc<dyn ClusterClient>> {
        let Some(resolver) = &self.options.remote_target_cluster else {
            return Ok(Arc::clone(&self.client));
        };
        if let Some(client) = self.options.client_cache.get(key) {
            return Ok(client);
        }
        let client = resolver.resolve(Arc::clone(&self.client), obj).await?;
        self.options.client_cache.set(key, Arc::clone(&client));
        tracing::debug!(key, "target cluster client cached");
        Ok(client)
    }

    async fn ensure_namespace(&self, client: &Arc<dyn ClusterClient>) -> Result<()> {
        let namespace = ResourceHandle::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": self.options.namespace}
        }))?;
        client
            .patch_apply(&namespace, &self.options.field_owner, true)
            .await?;
        Ok(())
    }

    fn transform(&self, obj: &dyn Object, resources: &mut [ResourceHandle]) -> Result<()> {
        apply_transforms(&self.options.post_render_transforms, obj, resources)?;
        if !self.options.custom_resource_labels.is_empty() {
            CustomLabels::new(self.options.custom_resource_labels.clone()).transform(obj, resources)?;
        }
        Ok(())
    }

    /// Namespaced resources without a namespace get the target namespace;
    /// cluster-scoped ones lose theirs. Unknown types are left alone.
    async fn normalize_namespaces(
        &self,
        client: &dyn ClusterClient,
        resources: &mut [ResourceHandle],
    ) -> Result<()> {
        for resource in resources {
            match client.scope(&resource.gvk).await? {
                Some(Scope::Namespaced) if resource.namespace().is_none() => {
                    resource.set_namespace(Some(&self.options.namespace));
                }
                Some(Scope::Cluster) => resource.set_namespace(None),
                _ => {}
            }
        }
        Ok(())
    }

    fn is_target_namespace(&self, resource: &Resource) -> bool {
        resource.gvk.kind == "Namespace" && resource.name == self.options.namespace
    }

    fn success_action(&self) -> Action {
        match self.options.consistency_check {
            ConsistencyCheck::Disabled => Action::await_change(),
            ConsistencyCheck::Permanent => Action::requeue(Duration::ZERO),
            ConsistencyCheck::Periodic(interval) => Action::requeue(interval),
        }
    }

    fn fail(&self, obj: &mut dyn Object, reason: &str, err: DeclarativeError) -> DeclarativeError {
        fail(obj, &*self.options.recorder, reason, err)
    }
}
