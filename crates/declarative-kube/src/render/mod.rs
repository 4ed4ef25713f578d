//! Renderer backends
//!
//! A [`Renderer`] turns the resolved [`Spec`] into a multi-document YAML
//! stream and owns the lifecycle of any prerequisite types that stream
//! depends on. Backends:
//! - [`TemplateRenderer`]: template packages, with CRDs from `crds/`
//! - [`OverlayRenderer`]: overlay trees
//! - [`RawRenderer`]: a manifest file read as-is
//!
//! Every failure sets `State::Error`, records the error as the last
//! operation and emits a warning event before it is returned.

mod overlay;
mod raw;
mod template;

use std::sync::Arc;

use async_trait::async_trait;
use declarative_core::{RenderMode, Spec, State};

use crate::cache::ManifestCache;
use crate::client::ClusterClient;
use crate::error::{DeclarativeError, Result};
use crate::events::{EventRecorder, EventType};
use crate::object::Object;

pub use overlay::OverlayRenderer;
pub use raw::RawRenderer;
pub use template::TemplateRenderer;

/// Produces manifests for an object and manages their prerequisites
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Register the conditions this renderer reports on
    ///
    /// May return [`DeclarativeError::ConditionsNotYetRegistered`].
    fn initialize(&self, obj: &mut dyn Object) -> Result<()>;

    async fn ensure_prerequisites(&self, obj: &mut dyn Object) -> Result<()>;

    async fn render(&self, obj: &mut dyn Object) -> Result<Vec<u8>>;

    async fn remove_prerequisites(&self, obj: &mut dyn Object) -> Result<()>;
}

/// What a backend needs from the surrounding pass
#[derive(Clone)]
pub struct RenderContext {
    pub client: Arc<dyn ClusterClient>,
    pub recorder: Arc<dyn EventRecorder>,
    /// Target namespace, exposed to templates as `release.namespace`
    pub namespace: String,
    /// Field owner used when installing prerequisite types
    pub field_owner: String,
}

/// Build the backend for `spec.mode`, wrapped by `cache` unless it is disabled
pub fn renderer_for(spec: Spec, context: RenderContext, cache: &ManifestCache) -> Box<dyn Renderer> {
    let recorder = Arc::clone(&context.recorder);
    let backend: Box<dyn Renderer> = match spec.mode {
        RenderMode::Template => Box::new(TemplateRenderer::new(spec.clone(), context)),
        RenderMode::Overlay => Box::new(OverlayRenderer::new(spec.clone(), context)),
        RenderMode::Raw => Box::new(RawRenderer::new(spec.clone(), context)),
    };
    cache.wrap(spec, backend, recorder)
}

/// Record a failure on the object and hand the error back
pub(crate) fn fail(
    obj: &mut dyn Object,
    recorder: &dyn EventRecorder,
    reason: &str,
    err: DeclarativeError,
) -> DeclarativeError {
    recorder.event(&*obj, EventType::Warning, reason, &err.to_string());
    let status = obj.status().with_state(State::Error).with_err(&err);
    obj.set_status(status);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::events::MemoryEventRecorder;
    use crate::object::testing::TestObject;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn context(recorder: &MemoryEventRecorder) -> RenderContext {
        RenderContext {
            client: Arc::new(MockClusterClient::new()),
            recorder: Arc::new(recorder.clone()),
            namespace: "prod".to_string(),
            field_owner: "declarative.io/applier".to_string(),
        }
    }

    #[test]
    fn test_fail_marks_error() {
        let recorder = MemoryEventRecorder::new();
        let mut obj = TestObject::new("app", "default");

        let err = fail(
            &mut obj,
            &recorder,
            "Rendering",
            DeclarativeError::Spec("boom".to_string()),
        );

        assert!(matches!(err, DeclarativeError::Spec(_)));
        assert_eq!(obj.status.state, State::Error);
        assert_eq!(
            obj.status.last_operation.unwrap().operation,
            "spec error: boom"
        );
        assert_eq!(recorder.with_reason("Rendering")[0].event_type, EventType::Warning);
    }

    #[tokio::test]
    async fn test_renderer_for_each_mode() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("manifest.yaml");
        fs::write(&manifest, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: raw\n").unwrap();

        let recorder = MemoryEventRecorder::new();
        let mut obj = TestObject::new("app", "default");
        let spec = Spec::new("app", &manifest, RenderMode::Raw);

        let renderer = renderer_for(spec, context(&recorder), &ManifestCache::Disabled);
        let out = renderer.render(&mut obj).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("name: raw"));
    }
}
