//! Per-object cluster clients
//!
//! Objects may target a remote cluster. The client for an object is
//! resolved once, cached under a key derived from the object, and dropped
//! from the cache when the target cluster stops accepting it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::client::ClusterClient;
use crate::error::Result;
use crate::object::Object;

/// Label whose value selects a shared cache entry
pub const CACHE_KEY_LABEL: &str = "declarative.io/cache-key";

/// Derives the client cache key of an object
pub type ClientCacheKeyFn = Arc<dyn Fn(&dyn Object) -> String + Send + Sync>;

/// `<namespace>/<label value>`, or `<namespace>/<name>` without the label
pub fn key_from_label_or_resource(label: &str) -> ClientCacheKeyFn {
    let label = label.to_string();
    Arc::new(move |obj: &dyn Object| match obj.labels().get(&label) {
        Some(value) if !value.is_empty() => format!("{}/{}", obj.namespace(), value),
        _ => format!("{}/{}", obj.namespace(), obj.name()),
    })
}

/// Storage for resolved clients
pub trait ClientCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<dyn ClusterClient>>;

    fn set(&self, key: &str, client: Arc<dyn ClusterClient>);

    fn delete(&self, key: &str);
}

#[derive(Default, Clone)]
pub struct MemoryClientCache {
    clients: Arc<RwLock<HashMap<String, Arc<dyn ClusterClient>>>>,
}

impl MemoryClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientCache for MemoryClientCache {
    fn get(&self, key: &str) -> Option<Arc<dyn ClusterClient>> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(key).cloned()
    }

    fn set(&self, key: &str, client: Arc<dyn ClusterClient>) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(key.to_string(), client);
    }

    fn delete(&self, key: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.remove(key);
    }
}

/// Picks the cluster an object's resources are applied to
#[async_trait]
pub trait TargetClusterResolver: Send + Sync {
    async fn resolve(
        &self,
        local: Arc<dyn ClusterClient>,
        obj: &dyn Object,
    ) -> Result<Arc<dyn ClusterClient>>;
}

/// Always the local cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCluster;

#[async_trait]
impl TargetClusterResolver for LocalCluster {
    async fn resolve(
        &self,
        local: Arc<dyn ClusterClient>,
        _obj: &dyn Object,
    ) -> Result<Arc<dyn ClusterClient>> {
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::object::testing::TestObject;

    #[test]
    fn test_key_from_label_or_resource() {
        let key_fn = key_from_label_or_resource(CACHE_KEY_LABEL);

        let mut obj = TestObject::new("app", "team-a");
        assert_eq!(key_fn(&obj), "team-a/app");

        obj.labels
            .insert(CACHE_KEY_LABEL.to_string(), "cluster-7".to_string());
        assert_eq!(key_fn(&obj), "team-a/cluster-7");
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryClientCache::new();
        assert!(cache.get("k").is_none());

        cache.set("k", Arc::new(MockClusterClient::new()));
        assert!(cache.get("k").is_some());
        assert_eq!(cache.len(), 1);

        cache.delete("k");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_local_cluster_resolver() {
        let local: Arc<dyn ClusterClient> = Arc::new(MockClusterClient::new());
        let resolved = LocalCluster
            .resolve(Arc::clone(&local), &TestObject::new("app", "ns"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&local, &resolved));
    }
}
