//! Concurrent server-side apply

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;

/// Applies a batch of resources concurrently under one field owner
///
/// Unlike readiness checks, apply never stops early: every per-resource
/// failure is collected so the caller sees all of them.
pub struct ConcurrentSsa {
    client: Arc<dyn ClusterClient>,
    owner: String,
}

impl ConcurrentSsa {
    /// Apply with conflicts forced in favour of `owner`
    pub fn new(client: Arc<dyn ClusterClient>, owner: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
        }
    }

    pub async fn run(&self, resources: &[ResourceHandle]) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel(resources.len());

        for handle in resources {
            let tx = tx.clone();
            let client = Arc::clone(&self.client);
            let owner = self.owner.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = client
                    .patch_apply(&handle, &owner, true)
                    .await
                    .map(|_| ())
                    .map_err(|e| DeclarativeError::for_resource(&handle, e));
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut errors = Vec::new();
        while let Some(result) = rx.recv().await {
            if let Err(e) = result {
                errors.push(e);
            }
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            owner = %self.owner,
            resources = resources.len(),
            failed = errors.len(),
            elapsed = ?elapsed,
            "server-side apply finished"
        );

        if errors.is_empty() {
            return Ok(());
        }
        if errors.iter().all(DeclarativeError::is_unauthorized) {
            return Err(DeclarativeError::ClientUnauthorized);
        }
        Err(DeclarativeError::ServerSideApplyFailed { elapsed, errors })
    }
}
