//! Lifecycle of prerequisite types (CRDs shipped with a package)
//!
//! Progress is tracked on the object through the `PrerequisitesReady`
//! condition; its reason carries the [`PrerequisiteState`].

use std::sync::Arc;

use declarative_core::{Condition, ConditionStatus, CrdManifest, State, Status};

use crate::cleanup::ConcurrentCleanup;
use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::events::{EventRecorder, EventType};
use crate::handle::{ResourceHandle, resources_of};
use crate::object::Object;
use crate::parser::{ManifestParser, YamlManifestParser};
use crate::ready::{ConcurrentReadyCheck, ReadyCheck};
use crate::ssa::ConcurrentSsa;

pub const PREREQUISITES_CONDITION: &str = "PrerequisitesReady";

const CONDITION_MESSAGE: &str = "CustomResourceDefinitions from the package 'crds' directory are installed and ready for use";

/// Where the prerequisite types of an object stand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteState {
    NotInstalled,
    Installing,
    InstalledNotReady,
    Ready,
    Removing,
}

impl PrerequisiteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrerequisiteState::NotInstalled => "NotInstalled",
            PrerequisiteState::Installing => "Installing",
            PrerequisiteState::InstalledNotReady => "InstalledNotReady",
            PrerequisiteState::Ready => "Ready",
            PrerequisiteState::Removing => "Removing",
        }
    }

    /// Read the state back from a status
    pub fn of(status: &Status) -> Self {
        let Some(condition) = status.conditions.get(PREREQUISITES_CONDITION) else {
            return PrerequisiteState::NotInstalled;
        };
        if condition.status == ConditionStatus::True {
            return PrerequisiteState::Ready;
        }
        match condition.reason.as_str() {
            "Installing" => PrerequisiteState::Installing,
            "InstalledNotReady" => PrerequisiteState::InstalledNotReady,
            "Removing" => PrerequisiteState::Removing,
            _ => PrerequisiteState::NotInstalled,
        }
    }

    fn condition(&self, obj: &dyn Object) -> Condition {
        let status = if *self == PrerequisiteState::Ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        Condition::new(PREREQUISITES_CONDITION, status)
            .with_reason(self.as_str())
            .with_message(CONDITION_MESSAGE)
            .with_generation(obj.generation())
    }
}

fn set_state(obj: &mut dyn Object, state: PrerequisiteState) -> Status {
    let status = obj.status().with_condition(state.condition(obj));
    obj.set_status(status.clone());
    status
}

/// Parse CRD manifests into handles
pub fn crd_handles(crds: &[CrdManifest]) -> Result<Vec<ResourceHandle>> {
    let mut handles = Vec::with_capacity(crds.len());
    for crd in crds {
        handles.extend(YamlManifestParser.parse(crd.content.as_bytes())?);
    }
    Ok(handles)
}

/// Installs, verifies and removes prerequisite types
pub struct Prerequisites {
    client: Arc<dyn ClusterClient>,
    recorder: Arc<dyn EventRecorder>,
    field_owner: String,
}

impl Prerequisites {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        recorder: Arc<dyn EventRecorder>,
        field_owner: impl Into<String>,
    ) -> Self {
        Self {
            client,
            recorder,
            field_owner: field_owner.into(),
        }
    }

    /// Whether `ensure` has nothing left to do for `obj`
    pub fn satisfied(&self, obj: &dyn Object) -> bool {
        !obj.is_deleting() && obj.status().conditions.is_true(PREREQUISITES_CONDITION)
    }

    /// Register the condition on first sight
    ///
    /// Returns [`DeclarativeError::ConditionsNotYetRegistered`] when it had
    /// to register it, so the caller requeues with the new status.
    pub fn initialize(&self, obj: &mut dyn Object) -> Result<()> {
        if obj.status().conditions.contains(PREREQUISITES_CONDITION) {
            return Ok(());
        }
        set_state(obj, PrerequisiteState::NotInstalled);
        Err(DeclarativeError::ConditionsNotYetRegistered)
    }

    /// Install `crds` and wait for the cluster to establish them
    pub async fn ensure(&self, obj: &mut dyn Object, crds: &[ResourceHandle]) -> Result<()> {
        if self.satisfied(&*obj) {
            return Ok(());
        }

        set_state(obj, PrerequisiteState::Installing);

        if let Err(e) = ConcurrentSsa::new(Arc::clone(&self.client), &self.field_owner)
            .run(crds)
            .await
        {
            return Err(self.fail(obj, "CRDInstallation", e));
        }

        match ConcurrentReadyCheck.run(Arc::clone(&self.client), &*obj, crds).await {
            Ok(()) => {}
            Err(e) if e.contains_not_ready() => {
                self.recorder
                    .event(&*obj, EventType::Normal, "CRDReadyCheck", "crds are not yet ready...");
                let status = set_state(obj, PrerequisiteState::InstalledNotReady);
                obj.set_status(status.with_err(&DeclarativeError::PrerequisitesNotFulfilled));
                return Err(DeclarativeError::PrerequisitesNotFulfilled);
            }
            Err(e) => return Err(self.fail(obj, "CRDReadyCheck", e)),
        }

        if let Err(e) = self.client.reset_discovery().await {
            return Err(self.fail(obj, "DiscoveryReset", e));
        }

        self.recorder
            .event(&*obj, EventType::Normal, "PrerequisitesReady", CONDITION_MESSAGE);
        let status = set_state(obj, PrerequisiteState::Ready);
        obj.set_status(status.with_operation("CRDs are ready"));
        tracing::info!(object = obj.name(), crds = crds.len(), "prerequisites ready");
        Ok(())
    }

    /// Delete `crds`
    ///
    /// Returns [`DeclarativeError::DeletionNotFinished`] while any of them is
    /// still visible.
    pub async fn remove(&self, obj: &mut dyn Object, crds: &[ResourceHandle]) -> Result<()> {
        let status = set_state(obj, PrerequisiteState::Removing);

        match ConcurrentCleanup::new(Arc::clone(&self.client))
            .run(&resources_of(crds))
            .await
        {
            Ok(()) => {
                set_state(obj, PrerequisiteState::NotInstalled);
                Ok(())
            }
            Err(DeclarativeError::DeletionNotFinished) => {
                let message = "waiting for crds to be uninstalled";
                self.recorder
                    .event(&*obj, EventType::Normal, "CRDsUninstallation", message);
                obj.set_status(status.with_operation(message));
                Err(DeclarativeError::DeletionNotFinished)
            }
            Err(e) => Err(self.fail(obj, "CRDsUninstallation", e)),
        }
    }

    fn fail(&self, obj: &mut dyn Object, reason: &str, err: DeclarativeError) -> DeclarativeError {
        self.recorder
            .event(&*obj, EventType::Warning, reason, &err.to_string());
        let status = obj
            .status()
            .with_condition(PrerequisiteState::NotInstalled.condition(obj))
            .with_state(State::Error)
            .with_err(&err);
        obj.set_status(status);
        err
    }
}
