//! Minimal OCI / Docker manifest model.
//!
//! Manifests are carried as raw bytes so their digests survive copying; only
//! the fields needed to walk referenced blobs and child manifests are parsed.

use hoist_core::error::{PublishError, Result};
use serde::{Deserialize, Serialize};

use super::digest::Digest;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Manifest media types requested when pulling.
pub const ACCEPTED_MANIFEST_TYPES: [&str; 4] =
    [OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// A reference to a blob or child manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

impl BlobDescriptor {
    pub fn digest(&self) -> Result<Digest> {
        Digest::parse(&self.digest)
    }
}

/// A manifest exactly as stored in, or fetched from, a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// What a manifest points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestContent {
    Image {
        config: BlobDescriptor,
        layers: Vec<BlobDescriptor>,
    },
    Index {
        manifests: Vec<BlobDescriptor>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<BlobDescriptor>,
    #[serde(default)]
    layers: Vec<BlobDescriptor>,
    #[serde(default)]
    manifests: Option<Vec<BlobDescriptor>>,
}

impl RawManifest {
    /// Wrap manifest bytes, taking the media type from the document when
    /// none is supplied.
    pub fn new(bytes: Vec<u8>, media_type: Option<&str>) -> Result<Self> {
        let media_type = match media_type {
            Some(mt) => mt.to_string(),
            None => {
                let doc: ManifestDocument = serde_json::from_slice(&bytes)?;
                match doc.media_type {
                    Some(mt) => mt,
                    None if doc.manifests.is_some() => OCI_INDEX.to_string(),
                    None => OCI_MANIFEST.to_string(),
                }
            }
        };
        Ok(Self { media_type, bytes })
    }

    /// Digest of the manifest bytes.
    pub fn digest(&self) -> Digest {
        Digest::sha256(&self.bytes)
    }

    pub fn content(&self) -> Result<ManifestContent> {
        let doc: ManifestDocument = serde_json::from_slice(&self.bytes)?;
        if let Some(manifests) = doc.manifests {
            return Ok(ManifestContent::Index { manifests });
        }
        match doc.config {
            Some(config) => Ok(ManifestContent::Image {
                config,
                layers: doc.layers,
            }),
            None => Err(PublishError::SerializationError(format!(
                "manifest of type {} has neither config nor manifests",
                self.media_type
            ))),
        }
    }
}
