//! Declarative Core - value types shared by the render-and-reconcile engine
//!
//! - `Resource`: stable identity of an owned cluster object, plus orphan diffing
//! - `Status`: state, ordered conditions, synced set and last operation
//! - `Spec`: what to render for one pass
//! - `Values`: renderer parameters with deep merge and content hashing
//! - `TemplatePackage`: on-disk template package layout

pub mod context;
pub mod error;
pub mod pack;
pub mod resource;
pub mod spec;
pub mod status;
pub mod values;

pub use context::{PackInfo, ReleaseInfo, TemplateContext};
pub use error::{CoreError, Result};
pub use pack::{CrdManifest, PackageMetadata, TemplatePackage, is_blank_document};
pub use resource::{GroupVersionKind, Resource, ResourceCategory, resources_diff};
pub use spec::{RenderMode, Spec};
pub use status::{Condition, ConditionStatus, Conditions, LastOperation, State, Status};
pub use values::{Values, deep_merge};
