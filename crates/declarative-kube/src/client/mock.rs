//! Mock cluster client for testing
//!
//! Objects are kept in memory keyed by [`Resource::id`], useful for unit and
//! integration tests without requiring a Kubernetes cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use declarative_core::{GroupVersionKind, Resource};
use kube::api::DynamicObject;
use kube::discovery::Scope;
use serde_json::{Value as JsonValue, json};

use super::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;

/// Kinds the mock treats as cluster scoped
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// In-memory cluster client for testing
#[derive(Clone)]
pub struct MockClusterClient {
    /// Stored objects: id -> (identity, object)
    store: Arc<RwLock<BTreeMap<String, (Resource, DynamicObject)>>>,
    /// Ids whose deletion was requested but is held by finalizers
    finalizing: Arc<RwLock<HashSet<String>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    faults: Arc<RwLock<Faults>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub applies: usize,
    pub discovery_resets: usize,
}

#[derive(Default)]
struct Faults {
    get: HashMap<String, u16>,
    apply: HashMap<String, u16>,
    delete: HashMap<String, u16>,
    scopes: HashMap<String, Option<Scope>>,
    discovery_reset: Option<u16>,
    hold_deletes: bool,
    crds_not_established: bool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn api_error(code: u16, reason: &str, message: String) -> DeclarativeError {
    DeclarativeError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn reason_for(code: u16) -> &'static str {
    match code {
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "Conflict",
        422 => "Invalid",
        _ => "InternalError",
    }
}

impl MockClusterClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(BTreeMap::new())),
            finalizing: Arc::new(RwLock::new(HashSet::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *write(&self.operations) = OperationCounts::default();
    }

    /// Store an object directly, bypassing counters and faults
    pub fn insert(&self, handle: ResourceHandle) {
        let resource = handle.resource();
        write(&self.store).insert(resource.id(), (resource, handle.object));
    }

    /// Replace the `status` of a stored object
    pub fn set_status(&self, resource: &Resource, status: JsonValue) {
        if let Some((_, object)) = write(&self.store).get_mut(&resource.id())
            && let Some(data) = object.data.as_object_mut()
        {
            data.insert("status".to_string(), status);
        }
    }

    pub fn contains(&self, resource: &Resource) -> bool {
        read(&self.store).contains_key(&resource.id())
    }

    pub fn object(&self, resource: &Resource) -> Option<DynamicObject> {
        read(&self.store).get(&resource.id()).map(|(_, o)| o.clone())
    }

    /// Identities of all stored objects, in id order
    pub fn resources(&self) -> Vec<Resource> {
        read(&self.store).values().map(|(r, _)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.store).is_empty()
    }

    /// Fail `get` for objects with this name
    pub fn fail_get(&self, name: &str, code: u16) {
        write(&self.faults).get.insert(name.to_string(), code);
    }

    /// Fail `patch_apply` for objects with this name
    pub fn fail_apply(&self, name: &str, code: u16) {
        write(&self.faults).apply.insert(name.to_string(), code);
    }

    /// Fail `delete` for objects with this name
    pub fn fail_delete(&self, name: &str, code: u16) {
        write(&self.faults).delete.insert(name.to_string(), code);
    }

    /// Fail every `reset_discovery` call
    pub fn fail_discovery_reset(&self, code: u16) {
        write(&self.faults).discovery_reset = Some(code);
    }

    pub fn clear_faults(&self) {
        let mut faults = write(&self.faults);
        faults.get.clear();
        faults.apply.clear();
        faults.delete.clear();
        faults.discovery_reset = None;
    }

    /// Override the scope reported for a kind; `None` marks it as unknown
    pub fn set_scope(&self, kind: &str, scope: Option<Scope>) {
        write(&self.faults).scopes.insert(kind.to_string(), scope);
    }

    /// Keep deleted objects visible until [`Self::release_finalizers`]
    pub fn hold_deletes(&self, hold: bool) {
        write(&self.faults).hold_deletes = hold;
    }

    /// Remove every object whose deletion was held
    pub fn release_finalizers(&self) {
        let ids: Vec<String> = write(&self.finalizing).drain().collect();
        let mut store = write(&self.store);
        for id in ids {
            store.remove(&id);
        }
    }

    /// Leave applied CRDs without the `Established` condition
    pub fn crds_not_established(&self, value: bool) {
        write(&self.faults).crds_not_established = value;
    }

    fn fault(&self, select: impl Fn(&Faults) -> &HashMap<String, u16>, name: &str) -> Option<u16> {
        select(&*read(&self.faults)).get(name).copied()
    }

    fn default_scope(kind: &str) -> Scope {
        if CLUSTER_SCOPED_KINDS.contains(&kind) {
            Scope::Cluster
        } else {
            Scope::Namespaced
        }
    }

    fn established(mut object: DynamicObject) -> DynamicObject {
        if let Some(data) = object.data.as_object_mut() {
            data.insert(
                "status".to_string(),
                json!({"conditions": [{"type": "Established", "status": "True"}]}),
            );
        }
        object
    }
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>> {
        write(&self.operations).gets += 1;

        if let Some(code) = self.fault(|f| &f.get, &resource.name) {
            return Err(api_error(code, reason_for(code), format!("get {} failed", resource)));
        }

        Ok(self.object(resource))
    }

    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        write(&self.operations).lists += 1;

        Ok(read(&self.store)
            .values()
            .filter(|(r, _)| &r.gvk == gvk)
            .filter(|(r, _)| namespace.is_none_or(|ns| r.namespace == ns))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, handle: &ResourceHandle) -> Result<DynamicObject> {
        write(&self.operations).creates += 1;

        let resource = handle.resource();
        let mut store = write(&self.store);
        if store.contains_key(&resource.id()) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", resource)));
        }
        store.insert(resource.id(), (resource, handle.object.clone()));
        Ok(handle.object.clone())
    }

    async fn update(&self, handle: &ResourceHandle) -> Result<DynamicObject> {
        write(&self.operations).updates += 1;

        let resource = handle.resource();
        let mut store = write(&self.store);
        match store.get_mut(&resource.id()) {
            Some((_, object)) => {
                *object = handle.object.clone();
                Ok(object.clone())
            }
            None => Err(api_error(404, "NotFound", format!("{} not found", resource))),
        }
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        write(&self.operations).deletes += 1;

        if let Some(code) = self.fault(|f| &f.delete, &resource.name) {
            return Err(api_error(code, reason_for(code), format!("delete {} failed", resource)));
        }

        let id = resource.id();
        if !read(&self.store).contains_key(&id) {
            return Err(api_error(404, "NotFound", format!("{} not found", resource)));
        }

        if read(&self.faults).hold_deletes {
            write(&self.finalizing).insert(id);
        } else {
            write(&self.store).remove(&id);
        }
        Ok(())
    }

    async fn patch_apply(
        &self,
        handle: &ResourceHandle,
        _field_owner: &str,
        _force: bool,
    ) -> Result<DynamicObject> {
        write(&self.operations).applies += 1;

        if let Some(code) = self.fault(|f| &f.apply, handle.name()) {
            return Err(api_error(code, reason_for(code), format!("apply {} failed", handle)));
        }

        let resource = handle.resource();
        let mut applied = handle.object.clone();
        applied.metadata.managed_fields = None;

        let mut store = write(&self.store);
        let previous_status = store
            .get(&resource.id())
            .and_then(|(_, o)| o.data.get("status").cloned());

        if handle.gvk.kind == "CustomResourceDefinition" && !read(&self.faults).crds_not_established {
            applied = Self::established(applied);
        } else if let Some(status) = previous_status
            && applied.data.get("status").is_none()
            && let Some(data) = applied.data.as_object_mut()
        {
            data.insert("status".to_string(), status);
        }

        store.insert(resource.id(), (resource, applied.clone()));
        Ok(applied)
    }

    async fn scope(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>> {
        if let Some(scope) = read(&self.faults).scopes.get(&gvk.kind) {
            return Ok(scope.clone());
        }
        Ok(Some(Self::default_scope(&gvk.kind)))
    }

    async fn reset_discovery(&self) -> Result<()> {
        write(&self.operations).discovery_resets += 1;
        if let Some(code) = read(&self.faults).discovery_reset {
            return Err(api_error(code, reason_for(code), "discovery failed".to_string()));
        }
        Ok(())
    }
}
