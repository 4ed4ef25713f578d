use async_trait::async_trait;
use declarative_core::Spec;
use declarative_engine::{OverlayOptions, OverlayProcessor};

use super::{RenderContext, Renderer, fail};
use crate::error::Result;
use crate::object::Object;

/// Renders an overlay tree; `Spec.values` hold the processor options
pub struct OverlayRenderer {
    spec: Spec,
    context: RenderContext,
}

impl OverlayRenderer {
    pub fn new(spec: Spec, context: RenderContext) -> Self {
        Self { spec, context }
    }

    fn processor(&self) -> Result<OverlayProcessor> {
        Ok(OverlayProcessor::new(OverlayOptions::from_values(
            &self.spec.values,
        )?))
    }
}

#[async_trait]
impl Renderer for OverlayRenderer {
    fn initialize(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }

    async fn ensure_prerequisites(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }

    async fn render(&self, obj: &mut dyn Object) -> Result<Vec<u8>> {
        let rendered = self
            .processor()
            .and_then(|processor| processor.render(&self.spec.path).map_err(Into::into));

        match rendered {
            Ok(stream) => Ok(stream.into_bytes()),
            Err(e) => Err(fail(obj, &*self.context.recorder, "OverlayRendering", e)),
        }
    }

    async fn remove_prerequisites(&self, _obj: &mut dyn Object) -> Result<()> {
        Ok(())
    }
}
