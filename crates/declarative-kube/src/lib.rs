//! Declarative Kube - the render-and-reconcile engine
//!
//! This crate provides:
//! - **Renderers**: template packages, overlay trees and raw manifests behind one trait
//! - **Render Cache**: content-addressed on-disk cache keyed by the values hash
//! - **Prerequisites**: install and await CRDs shipped with a package
//! - **Concurrent Apply**: server-side apply with one worker per resource
//! - **Readiness**: deep per-kind checks that stop at the first resource not ready
//! - **Cleanup**: orphan diffing against the last synced set and concurrent deletion
//! - **Transforms**: ownership labels and annotations applied after rendering
//! - **Reconciler**: the pass tying it all together, driven by the caller's controller

pub mod cache;
pub mod cleanup;
pub mod client;
pub mod client_cache;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod hooks;
pub mod object;
pub mod options;
pub mod parser;
pub mod prerequisites;
pub mod ready;
pub mod reconciler;
pub mod render;
pub mod ssa;
pub mod transform;

pub use cache::{CachedRenderer, ManifestCache, NO_CACHE};
pub use cleanup::{ConcurrentCleanup, orphans};
pub use client::{ClusterClient, KubeClusterClient, MockClusterClient, OperationCounts};
pub use client_cache::{
    CACHE_KEY_LABEL, ClientCache, ClientCacheKeyFn, LocalCluster, MemoryClientCache,
    TargetClusterResolver,
};
pub use config::{ConsistencyCheckConfig, EngineConfig};
pub use error::{DeclarativeError, Result};
pub use events::{EventRecorder, EventType, MemoryEventRecorder, RecordedEvent, TracingEventRecorder};
pub use handle::ResourceHandle;
pub use hooks::{Hook, HookPhase};
pub use object::Object;
pub use options::{ConsistencyCheck, Options, OptionsBuilder, SkipPredicate};
pub use parser::{CachedManifestParser, ManifestParser, YamlManifestParser};
pub use prerequisites::{PREREQUISITES_CONDITION, PrerequisiteState, Prerequisites};
pub use ready::{ConcurrentReadyCheck, ExistenceReadyCheck, ReadyCheck, Readiness};
pub use reconciler::{
    FinalizerDirective, INSTALLATION_CONDITION, RESOURCES_CONDITION, ReconcileOutcome, Reconciler,
    SpecResolver, StaticSpecResolver, error_policy,
};
pub use render::{OverlayRenderer, RawRenderer, RenderContext, Renderer, TemplateRenderer, renderer_for};
pub use ssa::ConcurrentSsa;
pub use transform::{ImageRewrite, ObjectTransform, TargetImage, default_transforms};
