use async_trait::async_trait;
use declarative_core::Spec;

use super::{RenderContext, Renderer, fail};
use crate::error::Result;
use crate::object::Object;

/// Passes the manifest file at `Spec.path` through untouched
pub struct RawRenderer {
    spec: Spec,
    context: RenderContext,
}

impl RawRenderer {
    pub fn new(spec: Spec, context: RenderContext) -> Self {
        Self { spec, context }
    }
}

#[async_trait]
impl Renderer for RawRenderer {
    fn initialize(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }

    async fn ensure_prerequisites(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }

    async fn render(&self, obj: &mut dyn Object) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.spec.path).await {
            Ok(content) => Ok(content),
            Err(e) => Err(fail(obj, &*self.context.recorder, "RawRendering", e.into())),
        }
    }

    async fn remove_prerequisites(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }
}
