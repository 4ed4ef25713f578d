//! Declarative Engine - pure rendering backends
//!
//! - `Engine`: MiniJinja template engine with Kubernetes filters and functions
//! - `OverlayProcessor`: overlay trees with patches, prefixes and image edits
//!
//! Both produce multi-document YAML streams and never talk to a cluster.

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;
pub mod overlay;

pub use engine::{DOCUMENT_SEPARATOR, Engine, EngineBuilder, RenderedPackage};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use overlay::{LoadRestrictions, OverlayFile, OverlayOptions, OverlayProcessor};
