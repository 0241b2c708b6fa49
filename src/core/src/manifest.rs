//! Bundle manifest (`hoist.yaml`).
//!
//! The manifest declares the invocation image, the tag the finished bundle is
//! published under, and the auxiliary images the application uses at runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MANIFEST_FILE;
use crate::error::{PublishError, Result};

const MANIFEST_HINT: &str =
    "make sure you are in the right directory or specify the manifest with --file";

/// An auxiliary image declared in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestImage {
    pub image: String,

    #[serde(default = "default_image_type")]
    pub image_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_image_type() -> String {
    "docker".to_string()
}

/// Parsed bundle manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Locally built invocation image, e.g. `myapp:v1`
    pub invocation_image: String,

    /// Target reference for the published bundle, e.g. `registry.example.com/bundles/myapp:v1`
    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub images: BTreeMap<String, ManifestImage>,

    /// Arbitrary metadata carried through to the bundle descriptor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl BundleManifest {
    /// Parse a manifest from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).map_err(|e| PublishError::Config {
            message: format!("Failed to parse manifest: {}", e),
            hint: None,
        })
    }

    /// Load a manifest from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PublishError::config_with_hint(
                format!("could not find manifest {}", path.display()),
                MANIFEST_HINT,
            ));
        }
        let data = std::fs::read_to_string(path)?;
        let manifest = Self::from_yaml(&data)?;
        tracing::debug!(path = %path.display(), name = %manifest.name, "Loaded manifest");
        Ok(manifest)
    }

    /// Load from an explicit path, else from `hoist.yaml` in `dir`.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<(Self, PathBuf)> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let default = dir.join(DEFAULT_MANIFEST_FILE);
                if !default.is_file() {
                    return Err(PublishError::config_with_hint(
                        format!("could not find {} in {}", DEFAULT_MANIFEST_FILE, dir.display()),
                        MANIFEST_HINT,
                    ));
                }
                default
            }
        };
        let manifest = Self::from_file(&path)?;
        Ok((manifest, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
name: myapp
version: 0.1.0
invocationImage: myapp:v1
tag: registry.example.com/bundles/myapp:v1
images:
  db:
    image: postgres:16
    description: database
"#;

    #[test]
    fn test_parse_manifest() {
        let m = BundleManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(m.name, "myapp");
        assert_eq!(m.invocation_image, "myapp:v1");
        assert_eq!(m.tag, "registry.example.com/bundles/myapp:v1");
        let db = &m.images["db"];
        assert_eq!(db.image, "postgres:16");
        assert_eq!(db.image_type, "docker");
    }

    #[test]
    fn test_missing_tag_defaults_empty() {
        let m = BundleManifest::from_yaml("name: a\nversion: '1'\ninvocationImage: a:1\n").unwrap();
        assert!(m.tag.is_empty());
        assert!(m.images.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = BundleManifest::from_yaml("name: [").unwrap_err();
        assert!(matches!(err, PublishError::Config { .. }));
    }

    #[test]
    fn test_load_default_location() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hoist.yaml"), MANIFEST).unwrap();

        let (m, path) = BundleManifest::load(None, dir.path()).unwrap();
        assert_eq!(m.name, "myapp");
        assert_eq!(path, dir.path().join("hoist.yaml"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let (m, loaded) = BundleManifest::load(Some(&path), Path::new("/nonexistent")).unwrap();
        assert_eq!(m.version, "0.1.0");
        assert_eq!(loaded, path);
    }

    #[test]
    fn test_load_missing_has_hint() {
        let dir = TempDir::new().unwrap();
        let err = BundleManifest::load(None, dir.path()).unwrap_err();
        assert!(err.hint().unwrap().contains("--file"));
    }
}
