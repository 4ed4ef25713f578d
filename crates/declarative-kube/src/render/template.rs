use async_trait::async_trait;
use declarative_core::{ReleaseInfo, Spec, TemplatePackage, Values};
use declarative_engine::Engine;

use super::{RenderContext, Renderer, fail};
use crate::error::Result;
use crate::events::EventType;
use crate::handle::ResourceHandle;
use crate::object::Object;
use crate::prerequisites::{Prerequisites, crd_handles};

/// Renders a template package; its `crds/` are the prerequisite types
pub struct TemplateRenderer {
    spec: Spec,
    context: RenderContext,
    engine: Engine,
    prerequisites: Prerequisites,
}

impl TemplateRenderer {
    pub fn new(spec: Spec, context: RenderContext) -> Self {
        let prerequisites = Prerequisites::new(
            context.client.clone(),
            context.recorder.clone(),
            context.field_owner.clone(),
        );
        Self {
            spec,
            context,
            engine: Engine::default(),
            prerequisites,
        }
    }

    fn crds(&self) -> Result<Vec<ResourceHandle>> {
        let package = TemplatePackage::load(&self.spec.path)?;
        crd_handles(&package.load_crds()?)
    }

    /// Values as a map, or empty values with a warning for any other shape
    fn values(&self, obj: &dyn Object) -> Values {
        if self.spec.values.is_empty() {
            return Values::new();
        }
        match self.spec.values.as_map() {
            Ok(_) => self.spec.values.clone(),
            Err(e) => {
                self.context.recorder.event(
                    obj,
                    EventType::Warning,
                    "ValuesParsing",
                    &format!("{}, rendering with empty values", e),
                );
                Values::new()
            }
        }
    }
}

#[async_trait]
impl Renderer for TemplateRenderer {
    fn initialize(&self, obj: &mut dyn Object) -> Result<()> {
        self.prerequisites.initialize(obj)
    }

    async fn ensure_prerequisites(&self, obj: &mut dyn Object) -> Result<()> {
        if self.prerequisites.satisfied(&*obj) {
            return Ok(());
        }
        let crds = match self.crds() {
            Ok(crds) => crds,
            Err(e) => return Err(fail(obj, &*self.context.recorder, "CRDLoading", e)),
        };
        self.prerequisites.ensure(obj, &crds).await
    }

    async fn render(&self, obj: &mut dyn Object) -> Result<Vec<u8>> {
        let values = self.values(&*obj);
        let release = ReleaseInfo::new(obj.name(), self.context.namespace.as_str());

        match self.engine.render_path(&self.spec.path, &values, release) {
            Ok(stream) => {
                tracing::debug!(
                    manifest = %self.spec.manifest_name,
                    path = %self.spec.path.display(),
                    bytes = stream.len(),
                    "template rendered"
                );
                Ok(stream.into_bytes())
            }
            Err(e) => Err(fail(obj, &*self.context.recorder, "TemplateRendering", e.into())),
        }
    }

    async fn remove_prerequisites(&self, obj: &mut dyn Object) -> Result<()> {
        let crds = match self.crds() {
            Ok(crds) => crds,
            Err(e) => return Err(fail(obj, &*self.context.recorder, "CRDLoading", e)),
        };
        self.prerequisites.remove(obj, &crds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeclarativeError;
    use crate::events::MemoryEventRecorder;
    use crate::object::testing::TestObject;
    use crate::prerequisites::{PREREQUISITES_CONDITION, PrerequisiteState};
    use crate::render::tests::context;
    use declarative_core::{RenderMode, State};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn package() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Pack.yaml"),
            "apiVersion: declarative/v1\nmetadata:\n  name: web\n  version: 1.0.0\n",
        )
        .unwrap();
        fs::write(dir.path().join("values.yaml"), "replicas: 1\nimage: nginx\n").unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(
            dir.path().join("templates/configmap.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ release.name }}\n  namespace: {{ release.namespace }}\ndata:\n  replicas: \"{{ values.replicas }}\"\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("crds")).unwrap();
        fs::write(
            dir.path().join("crds/widgets.yaml"),
            "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.example.io\nspec:\n  group: example.io\n  names:\n    kind: Widget\n    plural: widgets\n  scope: Namespaced\n  versions: []\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_render_merges_defaults() {
        let dir = package();
        let recorder = MemoryEventRecorder::new();
        let spec = Spec::new("web", dir.path(), RenderMode::Template)
            .with_values(Values::from(json!({"replicas": 3})));
        let renderer = TemplateRenderer::new(spec, context(&recorder));
        let mut obj = TestObject::new("shop", "default");

        let out = String::from_utf8(renderer.render(&mut obj).await.unwrap()).unwrap();
        assert!(out.contains("name: shop"));
        assert!(out.contains("namespace: prod"));
        assert!(out.contains("replicas: \"3\""));
    }

    #[tokio::test]
    async fn test_non_map_values_degrade_to_defaults() {
        let dir = package();
        let recorder = MemoryEventRecorder::new();
        let spec = Spec::new("web", dir.path(), RenderMode::Template)
            .with_values(Values::from(json!(["not", "a", "map"])));
        let renderer = TemplateRenderer::new(spec, context(&recorder));
        let mut obj = TestObject::new("shop", "default");

        let out = String::from_utf8(renderer.render(&mut obj).await.unwrap()).unwrap();
        assert!(out.contains("replicas: \"1\""));
        let events = recorder.with_reason("ValuesParsing");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_ne!(obj.status.state, State::Error);
    }

    #[tokio::test]
    async fn test_render_failure_sets_error() {
        let dir = package();
        fs::write(
            dir.path().join("templates/broken.yaml"),
            "value: {{ values.missing.deeper }}\n",
        )
        .unwrap();
        let recorder = MemoryEventRecorder::new();
        let renderer = TemplateRenderer::new(
            Spec::new("web", dir.path(), RenderMode::Template),
            context(&recorder),
        );
        let mut obj = TestObject::new("shop", "default");

        let err = renderer.render(&mut obj).await.unwrap_err();
        assert!(matches!(err, DeclarativeError::Render(_)));
        assert_eq!(obj.status.state, State::Error);
        assert_eq!(recorder.with_reason("TemplateRendering").len(), 1);
    }

    #[tokio::test]
    async fn test_prerequisites_from_crds_dir() {
        let dir = package();
        let recorder = MemoryEventRecorder::new();
        let renderer = TemplateRenderer::new(
            Spec::new("web", dir.path(), RenderMode::Template),
            context(&recorder),
        );
        let mut obj = TestObject::new("shop", "default");

        assert!(matches!(
            renderer.initialize(&mut obj),
            Err(DeclarativeError::ConditionsNotYetRegistered)
        ));
        renderer.ensure_prerequisites(&mut obj).await.unwrap();
        assert!(obj.status.conditions.is_true(PREREQUISITES_CONDITION));

        renderer.remove_prerequisites(&mut obj).await.unwrap();
        assert_eq!(PrerequisiteState::of(&obj.status), PrerequisiteState::NotInstalled);
    }

    #[tokio::test]
    async fn test_ready_prerequisites_skip_package_loading() {
        let dir = package();
        let recorder = MemoryEventRecorder::new();
        let renderer = TemplateRenderer::new(
            Spec::new("web", dir.path(), RenderMode::Template),
            context(&recorder),
        );
        let mut obj = TestObject::new("shop", "default");
        let _ = renderer.initialize(&mut obj);
        renderer.ensure_prerequisites(&mut obj).await.unwrap();

        // the package is unreadable now, but nothing needs to be loaded
        fs::remove_file(dir.path().join("Pack.yaml")).unwrap();
        renderer.ensure_prerequisites(&mut obj).await.unwrap();
        assert!(obj.status.conditions.is_true(PREREQUISITES_CONDITION));
        assert!(recorder.with_reason("CRDLoading").is_empty());
    }
}
