//! Orphan computation and concurrent deletion

use std::collections::HashSet;
use std::sync::Arc;

use declarative_core::Resource;
use tokio::sync::mpsc;

use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};

/// Resources present in `previous` but absent from `current`
///
/// This is the one-way difference used for pruning; a grown render never
/// yields its new resources here.
pub fn orphans(previous: &[Resource], current: &[Resource]) -> Vec<Resource> {
    let known: HashSet<String> = current.iter().map(Resource::id).collect();
    previous
        .iter()
        .filter(|r| !known.contains(&r.id()))
        .cloned()
        .collect()
}

/// Deletes resources concurrently and reports whether they are gone
pub struct ConcurrentCleanup {
    client: Arc<dyn ClusterClient>,
}

impl ConcurrentCleanup {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Request deletion of every resource
    ///
    /// Already missing resources are fine. Returns
    /// [`DeclarativeError::DeletionNotFinished`] while any of them is still
    /// visible, e.g. held by finalizers.
    pub async fn run(&self, resources: &[Resource]) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(resources.len());
        for resource in resources {
            let tx = tx.clone();
            let client = Arc::clone(&self.client);
            let resource = resource.clone();
            tokio::spawn(async move {
                let result = match client.delete(&resource).await {
                    Ok(()) => Ok(Some(resource)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(DeclarativeError::for_resource(&resource, e)),
                };
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut pending = Vec::new();
        let mut errors = Vec::new();
        while let Some(result) = rx.recv().await {
            match result {
                Ok(Some(resource)) => pending.push(resource),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Err(DeclarativeError::Multiple(errors));
        }

        for resource in &pending {
            if self.client.get(resource).await?.is_some() {
                tracing::debug!(resource = %resource, "deletion still in progress");
                return Err(DeclarativeError::DeletionNotFinished);
            }
        }

        tracing::debug!(deleted = pending.len(), "cleanup finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::handle::ResourceHandle;
    use declarative_core::GroupVersionKind;
    use serde_json::json;

    fn config_map(name: &str) -> ResourceHandle {
        ResourceHandle::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "ns"}
        }))
        .unwrap()
    }

    #[test]
    fn test_orphans_is_one_way() {
        let gvk = GroupVersionKind::new("", "v1", "ConfigMap");
        let a = Resource::new("a", "ns", gvk.clone());
        let b = Resource::new("b", "ns", gvk.clone());
        let c = Resource::new("c", "ns", gvk);

        assert_eq!(orphans(&[a.clone(), b.clone()], &[a.clone()]), vec![b.clone()]);
        assert!(orphans(&[a.clone()], &[a.clone(), b.clone(), c]).is_empty());
        assert!(orphans(&[b.clone(), a.clone()], &[a, b]).is_empty());
    }

    #[tokio::test]
    async fn test_deletes_and_tolerates_missing() {
        let client = MockClusterClient::new();
        client.insert(config_map("a"));
        client.insert(config_map("b"));

        let targets = vec![
            config_map("a").resource(),
            config_map("b").resource(),
            config_map("gone").resource(),
        ];
        ConcurrentCleanup::new(Arc::new(client.clone()))
            .run(&targets)
            .await
            .unwrap();
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_not_finished_while_finalizing() {
        let client = MockClusterClient::new();
        client.insert(config_map("a"));
        client.hold_deletes(true);

        let cleanup = ConcurrentCleanup::new(Arc::new(client.clone()));
        let targets = vec![config_map("a").resource()];

        let err = cleanup.run(&targets).await.unwrap_err();
        assert!(matches!(err, DeclarativeError::DeletionNotFinished));

        client.release_finalizers();
        cleanup.run(&targets).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_errors_are_aggregated() {
        let client = MockClusterClient::new();
        client.insert(config_map("a"));
        client.insert(config_map("b"));
        client.fail_delete("a", 500);
        client.fail_delete("b", 403);

        let err = ConcurrentCleanup::new(Arc::new(client))
            .run(&[config_map("a").resource(), config_map("b").resource()])
            .await
            .unwrap_err();
        match err {
            DeclarativeError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }
}
