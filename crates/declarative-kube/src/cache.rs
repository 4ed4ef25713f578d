//! Content-addressed render cache
//!
//! Rendered streams are stored at
//! `<base>/manifest/<spec path>/<manifest>-<mode>-<values hash>.yaml`.
//! A cache root holds a single entry: every other file in it is deleted on
//! each render, so a value change evicts the previous render immediately.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use declarative_core::Spec;
use serde::{Deserialize, Serialize};

use crate::error::{DeclarativeError, Result};
use crate::events::EventRecorder;
use crate::object::Object;
use crate::render::{Renderer, fail};

/// Cache directory value that disables caching
pub const NO_CACHE: &str = "no-cache";

/// Where rendered manifests are cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ManifestCache {
    /// Every render goes straight to the backend
    Disabled,
    /// Base directory; entries live below `<dir>/manifest`
    Dir(PathBuf),
}

impl Default for ManifestCache {
    fn default() -> Self {
        ManifestCache::Dir(std::env::temp_dir())
    }
}

impl ManifestCache {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ManifestCache::Disabled)
    }

    /// Put `renderer` behind the cache, or return it untouched when disabled
    pub fn wrap(
        &self,
        spec: Spec,
        renderer: Box<dyn Renderer>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Box<dyn Renderer> {
        match self {
            ManifestCache::Disabled => renderer,
            ManifestCache::Dir(base) => Box::new(CachedRenderer::new(base, spec, renderer, recorder)),
        }
    }
}

impl From<&str> for ManifestCache {
    fn from(value: &str) -> Self {
        if value == NO_CACHE {
            ManifestCache::Disabled
        } else {
            ManifestCache::Dir(PathBuf::from(value))
        }
    }
}

impl From<String> for ManifestCache {
    fn from(value: String) -> Self {
        ManifestCache::from(value.as_str())
    }
}

impl From<ManifestCache> for String {
    fn from(cache: ManifestCache) -> Self {
        cache.to_string()
    }
}

impl FromStr for ManifestCache {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ManifestCache::from(s))
    }
}

impl fmt::Display for ManifestCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestCache::Disabled => f.write_str(NO_CACHE),
            ManifestCache::Dir(dir) => write!(f, "{}", dir.display()),
        }
    }
}

/// Directory holding the entry for `spec`
///
/// Only the normal components of `spec.path` are kept, so absolute or
/// parent-relative paths cannot escape `base`.
pub fn cache_root(base: &Path, spec: &Spec) -> PathBuf {
    let mut root = base.join("manifest");
    for component in spec.path.components() {
        if let Component::Normal(part) = component {
            root.push(part);
        }
    }
    root
}

/// File name of the entry for `spec`
///
/// Characters outside `[A-Za-z0-9._-]` in the manifest name become `_`, so
/// the entry always lands directly in its cache root.
pub fn cache_file_name(spec: &Spec) -> String {
    let name: String = spec
        .manifest_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}-{}-{}.yaml",
        name,
        spec.mode,
        spec.values.content_hash()
    )
}

/// Decorator caching the output of another [`Renderer`]
pub struct CachedRenderer {
    inner: Box<dyn Renderer>,
    recorder: Arc<dyn EventRecorder>,
    root: PathBuf,
    file: PathBuf,
}

impl CachedRenderer {
    pub fn new(
        base: &Path,
        spec: Spec,
        inner: Box<dyn Renderer>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let root = cache_root(base, &spec);
        let file = root.join(cache_file_name(&spec));
        Self {
            inner,
            recorder,
            root,
            file,
        }
    }

    /// Path of the current entry
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Delete every file in the root except the current entry
    async fn collect_garbage(&self) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == self.file || !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn store(&self, content: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&self.file, content).await
    }

    fn cache_error(&self, obj: &mut dyn Object, source: io::Error) -> DeclarativeError {
        let err = DeclarativeError::Cache {
            path: self.file.display().to_string(),
            source,
        };
        fail(obj, &*self.recorder, "ManifestCache", err)
    }
}

#[async_trait]
impl Renderer for CachedRenderer {
    fn initialize(&self, obj: &mut dyn Object) -> Result<()> {
        self.inner.initialize(obj)
    }

    async fn ensure_prerequisites(&self, obj: &mut dyn Object) -> Result<()> {
        self.inner.ensure_prerequisites(obj).await
    }

    async fn render(&self, obj: &mut dyn Object) -> Result<Vec<u8>> {
        match self.collect_garbage().await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(root = %self.root.display(), removed, "stale cache entries removed")
            }
            Err(e) => return Err(self.cache_error(obj, e)),
        }

        match tokio::fs::read(&self.file).await {
            Ok(content) => {
                tracing::debug!(file = %self.file.display(), "render cache hit");
                return Ok(content);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) => {}
            Err(e) => return Err(self.cache_error(obj, e)),
        }

        tracing::debug!(file = %self.file.display(), "render cache miss");
        let content = self.inner.render(obj).await?;
        if let Err(e) = self.store(&content).await {
            return Err(self.cache_error(obj, e));
        }
        Ok(content)
    }

    async fn remove_prerequisites(&self, obj: &mut dyn Object) -> Result<()> {
        self.inner.remove_prerequisites(obj).await
    }
}
