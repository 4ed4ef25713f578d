//! Template package definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Supported `Pack.yaml` API version
pub const PACKAGE_API_VERSION: &str = "declarative/v1";

const PACKAGE_FILE: &str = "Pack.yaml";
const VALUES_FILE: &str = "values.yaml";
const CRD_KIND: &str = "CustomResourceDefinition";

/// Optional package descriptor (`Pack.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub api_version: String,
    pub metadata: PackageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,

    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default)]
    pub description: Option<String>,
}

/// A template package loaded from disk with resolved paths
#[derive(Debug, Clone)]
pub struct TemplatePackage {
    pub metadata: PackageMetadata,

    /// Root directory of the package
    pub root: PathBuf,

    pub templates_dir: PathBuf,

    /// `crds/` directory if present
    pub crds_dir: Option<PathBuf>,

    pub values_path: PathBuf,
}

impl TemplatePackage {
    /// Load a package from a directory
    ///
    /// Without a `Pack.yaml`, the directory name is used as package name and
    /// the version defaults to `0.0.0`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::PackageNotFound {
                path: root.display().to_string(),
            });
        }

        let descriptor_file = root.join(PACKAGE_FILE);
        let metadata = if descriptor_file.exists() {
            let content = std::fs::read_to_string(&descriptor_file)?;
            let descriptor: PackageDescriptor = serde_yaml::from_str(&content)?;

            if descriptor.api_version != PACKAGE_API_VERSION {
                return Err(CoreError::InvalidPackage {
                    message: format!(
                        "Unsupported API version: {}. Expected: {}",
                        descriptor.api_version, PACKAGE_API_VERSION
                    ),
                });
            }
            descriptor.metadata
        } else {
            PackageMetadata {
                name: root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                version: Version::new(0, 0, 0),
                description: None,
            }
        };

        let crds_dir = Some(root.join("crds")).filter(|dir| dir.is_dir());

        Ok(Self {
            metadata,
            templates_dir: root.join("templates"),
            values_path: root.join(VALUES_FILE),
            crds_dir,
            root,
        })
    }

    /// Default values shipped with the package, empty when absent
    pub fn default_values(&self) -> Result<Values> {
        if self.values_path.exists() {
            let values = Values::from_file(&self.values_path)?;
            if values.inner().is_null() {
                return Ok(Values::new());
            }
            Ok(values)
        } else {
            Ok(Values::new())
        }
    }

    /// Template files in sorted order, helpers included
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        collect_files(&self.templates_dir, &["yaml", "yml", "j2", "tpl"])
    }

    /// YAML files under `crds/` in sorted order
    pub fn crd_files(&self) -> Result<Vec<PathBuf>> {
        match &self.crds_dir {
            Some(dir) => collect_files(dir, &["yaml", "yml"]),
            None => Ok(Vec::new()),
        }
    }

    pub fn has_crds(&self) -> bool {
        self.crds_dir.is_some()
    }

    /// Load every CRD document from `crds/`
    ///
    /// Documents are not templated. Anything other than a
    /// `CustomResourceDefinition` is rejected.
    pub fn load_crds(&self) -> Result<Vec<CrdManifest>> {
        let mut crds = Vec::new();

        for file_path in self.crd_files()? {
            let content = std::fs::read_to_string(&file_path)?;
            let relative_path = file_path
                .strip_prefix(&self.root)
                .unwrap_or(&file_path)
                .to_path_buf();

            for (idx, doc) in content.split("\n---").enumerate() {
                let doc = doc.trim().trim_start_matches("---").trim();
                if is_blank_document(doc) {
                    continue;
                }

                let parsed: serde_yaml::Value = serde_yaml::from_str(doc)?;
                let kind = parsed.get("kind").and_then(|k| k.as_str());

                if kind != Some(CRD_KIND) {
                    return Err(CoreError::InvalidPackage {
                        message: format!(
                            "File {} contains non-CRD resource (kind: {}). Only {} is allowed in crds/",
                            relative_path.display(),
                            kind.unwrap_or("unknown"),
                            CRD_KIND
                        ),
                    });
                }

                let name = parsed
                    .get("metadata")
                    .and_then(|m| m.get("name"))
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| CoreError::MissingField {
                        field: format!("{}[{}].metadata.name", relative_path.display(), idx),
                    })?
                    .to_string();

                crds.push(CrdManifest {
                    name,
                    source_file: relative_path.clone(),
                    document_index: idx,
                    content: doc.to_string(),
                });
            }
        }

        Ok(crds)
    }
}

/// A CRD manifest loaded from `crds/`
#[derive(Debug, Clone)]
pub struct CrdManifest {
    /// `metadata.name`
    pub name: String,
    /// Path relative to the package root
    pub source_file: PathBuf,
    /// Document index within the file
    pub document_index: usize,
    pub content: String,
}

/// Empty or comment-only YAML document
pub fn is_blank_document(doc: &str) -> bool {
    doc.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}

fn collect_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.exists() {
        return Ok(files);
    }

    for entry in walkdir::WalkDir::new(dir).into_iter() {
        let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false);
        if matches {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
