//! Readiness verification for applied resources
//!
//! Two strategies:
//! - [`ConcurrentReadyCheck`] fetches every resource concurrently and applies
//!   kind-specific readiness rules
//! - [`ExistenceReadyCheck`] only verifies that resources can be fetched
//!
//! Deep readiness rules, per kind:
//! - Deployment: updated = ready = available = desired replicas
//! - StatefulSet: ready = updated = desired replicas
//! - DaemonSet: ready = updated = desired scheduled
//! - Job: at least one success or a `Complete` condition; `Failed` is terminal
//! - CustomResourceDefinition: `Established=True`
//! - Pod: `Ready=True`
//! - anything else: ready unless `status.conditions` holds `Ready=False`

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use declarative_core::GroupVersionKind;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::handle::ResourceHandle;
use crate::object::Object;

/// Verifies that applied resources reached a ready state
#[async_trait]
pub trait ReadyCheck: Send + Sync {
    /// `Ok(())` when every resource is ready, [`DeclarativeError::ResourcesNotReady`]
    /// when at least one is still progressing
    async fn run(
        &self,
        client: Arc<dyn ClusterClient>,
        obj: &dyn Object,
        resources: &[ResourceHandle],
    ) -> Result<()>;
}

/// Outcome of evaluating one observed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Still progressing, with a short explanation
    NotReady(String),
    /// Reached a terminal failure
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Deep check with one worker per resource
///
/// Workers report into a channel sized to the number of resources, so none
/// of them blocks once the first "not ready" result ends the check early.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentReadyCheck;

impl ConcurrentReadyCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReadyCheck for ConcurrentReadyCheck {
    async fn run(
        &self,
        client: Arc<dyn ClusterClient>,
        obj: &dyn Object,
        resources: &[ResourceHandle],
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel(resources.len());

        for handle in resources {
            let tx = tx.clone();
            let client = Arc::clone(&client);
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = check_resource(client.as_ref(), &handle).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut errors = Vec::new();
        while let Some(result) = rx.recv().await {
            match result {
                Ok(()) => {}
                Err(DeclarativeError::ResourcesNotReady) => {
                    tracing::debug!(
                        object = obj.name(),
                        elapsed = ?start.elapsed(),
                        "readiness check stopped at first resource not ready"
                    );
                    return Err(DeclarativeError::ResourcesNotReady);
                }
                Err(e) => errors.push(e),
            }
        }

        tracing::debug!(
            object = obj.name(),
            resources = resources.len(),
            failed = errors.len(),
            elapsed = ?start.elapsed(),
            "readiness check finished"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeclarativeError::Multiple(errors))
        }
    }
}

async fn check_resource(client: &dyn ClusterClient, handle: &ResourceHandle) -> Result<()> {
    let resource = handle.resource();
    let observed = client
        .get(&resource)
        .await
        .map_err(|e| DeclarativeError::for_resource(&resource, e))?;

    let Some(observed) = observed else {
        tracing::debug!(resource = %resource, "resource not visible yet");
        return Err(DeclarativeError::ResourcesNotReady);
    };

    match evaluate(&handle.gvk, &observed)? {
        Readiness::Ready => Ok(()),
        Readiness::NotReady(reason) => {
            tracing::debug!(resource = %resource, reason = %reason, "resource not ready");
            Err(DeclarativeError::ResourcesNotReady)
        }
        Readiness::Failed(message) => Err(DeclarativeError::ResourceFailed {
            resource: resource.to_string(),
            message,
        }),
    }
}

/// Existence-only check
///
/// Resources are fetched one after another. Missing resources are
/// tolerated; any other error aborts the check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceReadyCheck;

impl ExistenceReadyCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReadyCheck for ExistenceReadyCheck {
    async fn run(
        &self,
        client: Arc<dyn ClusterClient>,
        _obj: &dyn Object,
        resources: &[ResourceHandle],
    ) -> Result<()> {
        for handle in resources {
            let resource = handle.resource();
            match client.get(&resource).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(DeclarativeError::for_resource(&resource, e)),
            }
        }
        Ok(())
    }
}

fn typed<K: DeserializeOwned>(object: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Apply the readiness rule for `gvk` to an observed object
pub fn evaluate(gvk: &GroupVersionKind, object: &DynamicObject) -> Result<Readiness> {
    let readiness = match (gvk.group.as_str(), gvk.kind.as_str()) {
        ("apps", "Deployment") => deployment(&typed(object)?),
        ("apps", "StatefulSet") => stateful_set(&typed(object)?),
        ("apps", "DaemonSet") => daemon_set(&typed(object)?),
        ("batch", "Job") => job(&typed(object)?),
        ("apiextensions.k8s.io", "CustomResourceDefinition") => crd(&typed(object)?),
        ("", "Pod") => pod(&typed(object)?),
        _ => generic(&object.data),
    };
    Ok(readiness)
}

fn deployment(deployment: &Deployment) -> Readiness {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    if ready == desired && updated == desired && available == desired {
        Readiness::Ready
    } else {
        Readiness::NotReady(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

fn stateful_set(sts: &StatefulSet) -> Readiness {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = sts.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);

    if ready == desired && updated == desired {
        Readiness::Ready
    } else {
        Readiness::NotReady(format!(
            "{}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ))
    }
}

fn daemon_set(ds: &DaemonSet) -> Readiness {
    let Some(status) = ds.status.as_ref() else {
        return Readiness::NotReady("no status reported".to_string());
    };
    let desired = status.desired_number_scheduled;
    let ready = status.number_ready;
    let updated = status.updated_number_scheduled.unwrap_or(0);

    if ready == desired && updated == desired {
        Readiness::Ready
    } else {
        Readiness::NotReady(format!(
            "{}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ))
    }
}

fn job(job: &Job) -> Readiness {
    let status = job.status.as_ref();
    let conditions = status.and_then(|s| s.conditions.as_ref());

    if let Some(failed) = conditions
        .into_iter()
        .flatten()
        .find(|c| c.type_ == "Failed" && c.status == "True")
    {
        return Readiness::Failed(
            failed
                .message
                .clone()
                .unwrap_or_else(|| "job failed".to_string()),
        );
    }

    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let complete = conditions
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Complete" && c.status == "True");

    if succeeded >= 1 || complete {
        Readiness::Ready
    } else {
        Readiness::NotReady("job has not completed".to_string())
    }
}

fn crd(crd: &CustomResourceDefinition) -> Readiness {
    let established = crd
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Established" && c.status == "True");

    if established {
        Readiness::Ready
    } else {
        Readiness::NotReady("not established".to_string())
    }
}

fn pod(pod: &Pod) -> Readiness {
    let ready = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True");

    if ready {
        Readiness::Ready
    } else {
        Readiness::NotReady("pod is not ready".to_string())
    }
}

fn generic(data: &JsonValue) -> Readiness {
    let not_ready = data
        .pointer("/status/conditions")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .find(|c| {
            c.get("type").and_then(JsonValue::as_str) == Some("Ready")
                && c.get("status").and_then(JsonValue::as_str) == Some("False")
        });

    match not_ready {
        Some(condition) => Readiness::NotReady(
            condition
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("Ready=False")
                .to_string(),
        ),
        None => Readiness::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::object::testing::TestObject;
    use serde_json::json;

    fn handle(value: JsonValue) -> ResourceHandle {
        ResourceHandle::from_value(value).unwrap()
    }

    fn config_map(name: &str) -> ResourceHandle {
        handle(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default"}
        }))
    }

    fn deployment_with(desired: i32, ready: i32) -> ResourceHandle {
        handle(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "replicas": desired,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web"}}}
            },
            "status": {
                "replicas": desired,
                "readyReplicas": ready,
                "updatedReplicas": ready,
                "availableReplicas": ready
            }
        }))
    }

    #[test]
    fn test_deployment_rules() {
        let ready = deployment_with(3, 3);
        assert_eq!(evaluate(&ready.gvk, &ready.object).unwrap(), Readiness::Ready);

        let progressing = deployment_with(3, 1);
        let readiness = evaluate(&progressing.gvk, &progressing.object).unwrap();
        assert_eq!(
            readiness,
            Readiness::NotReady("1/3 ready, 1/3 updated, 1/3 available".to_string())
        );
    }

    #[test]
    fn test_job_rules() {
        let failed = handle(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate"},
            "spec": {"template": {"spec": {"containers": []}}},
            "status": {"conditions": [{"type": "Failed", "status": "True", "message": "BackoffLimitExceeded"}]}
        }));
        assert_eq!(
            evaluate(&failed.gvk, &failed.object).unwrap(),
            Readiness::Failed("BackoffLimitExceeded".to_string())
        );

        let done = handle(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate"},
            "spec": {"template": {"spec": {"containers": []}}},
            "status": {"succeeded": 1}
        }));
        assert!(evaluate(&done.gvk, &done.object).unwrap().is_ready());
    }

    #[test]
    fn test_generic_ready_condition() {
        let widget = handle(json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {"name": "w"},
            "status": {"conditions": [{"type": "Ready", "status": "False", "message": "warming up"}]}
        }));
        assert_eq!(
            evaluate(&widget.gvk, &widget.object).unwrap(),
            Readiness::NotReady("warming up".to_string())
        );

        let cm = config_map("plain");
        assert!(evaluate(&cm.gvk, &cm.object).unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_concurrent_all_ready() {
        let client = MockClusterClient::new();
        let resources: Vec<_> = (0..5).map(|i| config_map(&format!("cm-{}", i))).collect();
        for r in &resources {
            client.insert(r.clone());
        }

        let obj = TestObject::new("app", "default");
        ConcurrentReadyCheck
            .run(Arc::new(client), &obj, &resources)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_short_circuits_on_not_ready() {
        let client = MockClusterClient::new();
        let mut resources: Vec<_> = (0..20).map(|i| config_map(&format!("cm-{}", i))).collect();
        for r in &resources {
            client.insert(r.clone());
        }
        // never applied, so never visible
        resources.insert(7, config_map("missing"));
        client.fail_get("cm-3", 500);

        let obj = TestObject::new("app", "default");
        let err = ConcurrentReadyCheck
            .run(Arc::new(client), &obj, &resources)
            .await
            .unwrap_err();
        assert!(matches!(err, DeclarativeError::ResourcesNotReady));
    }

    #[tokio::test]
    async fn test_concurrent_aggregates_errors() {
        let client = MockClusterClient::new();
        let resources: Vec<_> = (0..4).map(|i| config_map(&format!("cm-{}", i))).collect();
        for r in &resources {
            client.insert(r.clone());
        }
        client.fail_get("cm-1", 500);
        client.fail_get("cm-2", 403);

        let obj = TestObject::new("app", "default");
        let err = ConcurrentReadyCheck
            .run(Arc::new(client), &obj, &resources)
            .await
            .unwrap_err();

        assert!(!err.contains_not_ready());
        let message = err.to_string();
        assert!(message.contains("get ConfigMap/default/cm-1 failed"), "{}", message);
        assert!(message.contains("get ConfigMap/default/cm-2 failed"), "{}", message);
    }

    #[tokio::test]
    async fn test_concurrent_empty_is_ready() {
        let obj = TestObject::new("app", "default");
        ConcurrentReadyCheck
            .run(Arc::new(MockClusterClient::new()), &obj, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_existence_check() {
        let client = MockClusterClient::new();
        let present = config_map("present");
        client.insert(present.clone());
        let obj = TestObject::new("app", "default");

        ExistenceReadyCheck
            .run(Arc::new(client.clone()), &obj, &[present.clone(), config_map("absent")])
            .await
            .unwrap();

        client.fail_get("absent", 404);
        ExistenceReadyCheck
            .run(Arc::new(client.clone()), &obj, &[config_map("absent")])
            .await
            .unwrap();

        client.fail_get("present", 500);
        assert!(
            ExistenceReadyCheck
                .run(Arc::new(client), &obj, &[present])
                .await
                .is_err()
        );
    }
}
