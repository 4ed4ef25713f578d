//! Cluster client abstraction
//!
//! The engine is handed an already connected client. Two implementations:
//! - [`KubeClusterClient`]: backed by `kube::Client` with cached discovery
//! - [`MockClusterClient`]: in-memory store for tests

mod cluster;
mod mock;

pub use cluster::KubeClusterClient;
pub use mock::{MockClusterClient, OperationCounts};

use async_trait::async_trait;
use declarative_core::{GroupVersionKind, Resource};
use kube::api::DynamicObject;
use kube::discovery::Scope;

use crate::error::Result;
use crate::handle::ResourceHandle;

/// Reads and writes against one target cluster
///
/// Implementations must be safe to share between the concurrent workers of
/// a pass. A missing object is `Ok(None)` on `get`, and a 404
/// [`crate::DeclarativeError::Api`] everywhere else.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object by identity
    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>>;

    /// List objects of a type, optionally within one namespace
    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>>;

    async fn create(&self, handle: &ResourceHandle) -> Result<DynamicObject>;

    async fn update(&self, handle: &ResourceHandle) -> Result<DynamicObject>;

    /// Request deletion with background propagation
    async fn delete(&self, resource: &Resource) -> Result<()>;

    /// Server-side apply under `field_owner`
    async fn patch_apply(
        &self,
        handle: &ResourceHandle,
        field_owner: &str,
        force: bool,
    ) -> Result<DynamicObject>;

    /// Scope of a type, `None` when the cluster does not serve it
    async fn scope(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>>;

    /// Drop cached type mappings, e.g. after installing new CRDs
    async fn reset_discovery(&self) -> Result<()>;
}
