//! CNAB-style bundle descriptor (`bundle.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};

pub const SCHEMA_VERSION: &str = "v1.0.0";

/// Media type used when the descriptor is pushed as an OCI manifest config.
pub const BUNDLE_CONFIG_MEDIA_TYPE: &str = "application/vnd.cnab.config.v1+json";

/// The invocation image entry of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationImage {
    pub image: String,

    pub image_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
}

/// An auxiliary image used by the application at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleImage {
    pub image: String,

    pub image_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Reference the image was declared with, before relocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
}

/// Bundle descriptor.
///
/// Auxiliary images live in a sorted map, so iteration order is the
/// canonical key order of the serialized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDescriptor {
    pub schema_version: String,

    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub invocation_images: Vec<InvocationImage>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, BundleImage>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl BundleDescriptor {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let descriptor: BundleDescriptor = serde_json::from_slice(data)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            PublishError::SerializationError(format!(
                "Failed to read bundle descriptor {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_slice(&data)
    }

    /// Write the descriptor as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Canonical JSON: sorted keys, no insignificant whitespace.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    fn validate(&self) -> Result<()> {
        if self.invocation_images.is_empty() {
            return Err(PublishError::SerializationError(
                "bundle descriptor declares no invocation image".to_string(),
            ));
        }
        Ok(())
    }

    /// The primary invocation image.
    pub fn invocation_image(&self) -> Option<&InvocationImage> {
        self.invocation_images.first()
    }

    pub fn invocation_image_mut(&mut self) -> Option<&mut InvocationImage> {
        self.invocation_images.first_mut()
    }
}
