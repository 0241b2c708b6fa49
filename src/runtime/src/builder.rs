//! Bundle descriptor generation.

use std::path::{Path, PathBuf};

use hoist_core::bundle::{BundleDescriptor, BundleImage, InvocationImage, SCHEMA_VERSION};
use hoist_core::config::DEFAULT_OUTPUT_DIR;
use hoist_core::error::Result;
use hoist_core::manifest::BundleManifest;

use crate::oci::digest::Digest;

/// File name of the generated descriptor inside the output directory.
pub const BUNDLE_FILE: &str = "bundle.json";

/// Produces a readable bundle descriptor from the manifest.
///
/// Called after the invocation image has been pushed, with the pinned
/// invocation reference it should record.
pub trait BundleBuilder: Send + Sync {
    /// Generate the descriptor and return the path it was written to.
    fn build(
        &self,
        manifest: &BundleManifest,
        invocation_image: &str,
        digest: &Digest,
    ) -> Result<PathBuf>;
}

/// Writes `bundle.json` into an output directory.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    output_dir: PathBuf,
}

impl DescriptorBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Descriptor for `manifest` with the given invocation image.
    pub fn descriptor(
        manifest: &BundleManifest,
        invocation_image: &str,
        digest: &Digest,
    ) -> BundleDescriptor {
        BundleDescriptor {
            schema_version: SCHEMA_VERSION.to_string(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            invocation_images: vec![InvocationImage {
                image: invocation_image.to_string(),
                image_type: "docker".to_string(),
                content_digest: Some(digest.to_string()),
            }],
            images: manifest
                .images
                .iter()
                .map(|(name, image)| {
                    let entry = BundleImage {
                        image: image.image.clone(),
                        image_type: image.image_type.clone(),
                        content_digest: None,
                        description: image.description.clone(),
                        original_image: None,
                    };
                    (name.clone(), entry)
                })
                .collect(),
            custom: manifest.custom.clone(),
        }
    }
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl BundleBuilder for DescriptorBuilder {
    fn build(
        &self,
        manifest: &BundleManifest,
        invocation_image: &str,
        digest: &Digest,
    ) -> Result<PathBuf> {
        let path = self.output_dir.join(BUNDLE_FILE);
        Self::descriptor(manifest, invocation_image, digest).write_to(&path)?;
        tracing::debug!(path = %path.display(), "Generated bundle descriptor");
        Ok(path)
    }
}
