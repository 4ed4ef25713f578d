//! `kube::Client` backed cluster client

use std::sync::Arc;

use async_trait::async_trait;
use declarative_core::{GroupVersionKind, Resource};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use tokio::sync::RwLock;

use super::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;

/// Cluster client with lazily populated, resettable discovery
pub struct KubeClusterClient {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(None),
        }
    }

    /// Connect with the default kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    async fn discovery(&self) -> Result<Arc<Discovery>> {
        if let Some(discovery) = self.discovery.read().await.as_ref() {
            return Ok(Arc::clone(discovery));
        }

        let mut guard = self.discovery.write().await;
        if let Some(discovery) = guard.as_ref() {
            return Ok(Arc::clone(discovery));
        }

        tracing::debug!("running API discovery");
        let discovery = Arc::new(Discovery::new(self.client.clone()).run().await?);
        *guard = Some(Arc::clone(&discovery));
        Ok(discovery)
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<Option<(ApiResource, ApiCapabilities)>> {
        let kube_gvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        Ok(self.discovery().await?.resolve_gvk(&kube_gvk))
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (api_resource, capabilities) = self
            .resolve(gvk)
            .await?
            .ok_or_else(|| DeclarativeError::UnknownResourceType(gvk.to_string()))?;

        let api = match (capabilities.scope, namespace.filter(|ns| !ns.is_empty())) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &api_resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), &api_resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &api_resource),
        };
        Ok(api)
    }

    async fn api_for_handle(&self, handle: &ResourceHandle) -> Result<Api<DynamicObject>> {
        self.api(&handle.gvk, handle.namespace()).await
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>> {
        let api = self.api(&resource.gvk, Some(&resource.namespace)).await?;
        Ok(api.get_opt(&resource.name).await?)
    }

    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let (api_resource, capabilities) = self
            .resolve(gvk)
            .await?
            .ok_or_else(|| DeclarativeError::UnknownResourceType(gvk.to_string()))?;

        let api: Api<DynamicObject> = match (capabilities.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &api_resource)
            }
            _ => Api::all_with(self.client.clone(), &api_resource),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create(&self, handle: &ResourceHandle) -> Result<DynamicObject> {
        let api = self.api_for_handle(handle).await?;
        Ok(api.create(&PostParams::default(), &handle.object).await?)
    }

    async fn update(&self, handle: &ResourceHandle) -> Result<DynamicObject> {
        let api = self.api_for_handle(handle).await?;
        Ok(api
            .replace(handle.name(), &PostParams::default(), &handle.object)
            .await?)
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let api = self.api(&resource.gvk, Some(&resource.namespace)).await?;
        api.delete(&resource.name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn patch_apply(
        &self,
        handle: &ResourceHandle,
        field_owner: &str,
        force: bool,
    ) -> Result<DynamicObject> {
        let api = self.api_for_handle(handle).await?;

        let mut params = PatchParams::apply(field_owner);
        params.force = force;

        let mut object = handle.object.clone();
        object.metadata.managed_fields = None;
        object.metadata.resource_version = None;

        Ok(api
            .patch(handle.name(), &params, &Patch::Apply(&object))
            .await?)
    }

    async fn scope(&self, gvk: &GroupVersionKind) -> Result<Option<Scope>> {
        Ok(self.resolve(gvk).await?.map(|(_, caps)| caps.scope))
    }

    async fn reset_discovery(&self) -> Result<()> {
        *self.discovery.write().await = None;
        Ok(())
    }
}
