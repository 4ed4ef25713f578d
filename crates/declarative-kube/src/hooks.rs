//! Caller-supplied hooks run after a successful apply or before deletion

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::object::Object;

/// When a hook runs in the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// After resources are applied, ready and pruned
    PostRun,
    /// Before owned resources are deleted
    PreDelete,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::PostRun => f.write_str("post-run"),
            HookPhase::PreDelete => f.write_str("pre-delete"),
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, client: &dyn ClusterClient, obj: &dyn Object) -> Result<()>;
}

/// Run hooks in order, stopping at the first failure
///
/// Retry signals pass through unchanged; anything else is reported as a
/// [`DeclarativeError::Hook`] naming the hook.
pub async fn run_hooks(
    hooks: &[Arc<dyn Hook>],
    phase: HookPhase,
    client: &dyn ClusterClient,
    obj: &dyn Object,
) -> Result<()> {
    for hook in hooks {
        tracing::debug!(hook = hook.name(), %phase, "running hook");
        match hook.run(client, obj).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                return Err(DeclarativeError::Hook {
                    name: hook.name().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(())
}
