//! Render specification resolved for each pass

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CoreError;
use crate::values::Values;

/// Which renderer backend produces the manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Template,
    Overlay,
    Raw,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Template => "template",
            RenderMode::Overlay => "overlay",
            RenderMode::Raw => "raw",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template" => Ok(RenderMode::Template),
            "overlay" => Ok(RenderMode::Overlay),
            "raw" => Ok(RenderMode::Raw),
            other => Err(CoreError::InvalidPackage {
                message: format!("unknown render mode '{}'", other),
            }),
        }
    }
}

/// What to render for one object in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub manifest_name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub values: Values,
    #[serde(default)]
    pub mode: RenderMode,
}

impl Spec {
    pub fn new(manifest_name: impl Into<String>, path: impl Into<PathBuf>, mode: RenderMode) -> Self {
        Self {
            manifest_name: manifest_name.into(),
            path: path.into(),
            values: Values::new(),
            mode,
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }
}
