//! Reading locally built images stored as OCI image layouts.

use std::path::{Path, PathBuf};

use hoist_core::error::{PublishError, Result};
use serde::Deserialize;

use super::digest::Digest;
use super::manifest::RawManifest;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    manifests: Vec<LayoutEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutEntry {
    #[serde(default)]
    media_type: Option<String>,
    digest: String,
}

/// A single-manifest OCI image layout on disk.
#[derive(Debug)]
pub struct LocalImage {
    path: PathBuf,
    manifest: RawManifest,
}

impl LocalImage {
    /// Open the layout at `dir` (`index.json` → manifest blob).
    pub fn open(dir: &Path) -> Result<Self> {
        let index_path = dir.join("index.json");
        let data = std::fs::read(&index_path).map_err(|e| {
            PublishError::SerializationError(format!(
                "Failed to read {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: LayoutIndex = serde_json::from_slice(&data)?;
        let entry = index.manifests.first().ok_or_else(|| {
            PublishError::SerializationError(format!(
                "No manifest in {}",
                index_path.display()
            ))
        })?;

        let digest = Digest::parse(&entry.digest)?;
        let bytes = read_verified(dir, &digest)?;
        let manifest = RawManifest::new(bytes, entry.media_type.as_deref())?;

        Ok(Self {
            path: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &RawManifest {
        &self.manifest
    }

    /// Read a blob and check it against its digest.
    pub fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        read_verified(&self.path, digest)
    }
}

fn blob_path(dir: &Path, digest: &Digest) -> PathBuf {
    dir.join("blobs").join(digest.algorithm()).join(digest.encoded())
}

fn read_verified(dir: &Path, digest: &Digest) -> Result<Vec<u8>> {
    let path = blob_path(dir, digest);
    let data = std::fs::read(&path).map_err(|e| {
        PublishError::SerializationError(format!("Failed to read blob {}: {}", path.display(), e))
    })?;
    if !digest.verify(&data) {
        return Err(PublishError::SerializationError(format!(
            "Blob {} does not match its digest",
            path.display()
        )));
    }
    Ok(data)
}

/// Write a single-manifest image layout from a config blob and layers
/// given as `(media type, bytes)`. Returns the manifest digest.
pub fn write_layout(dir: &Path, config: &[u8], layers: &[(&str, &[u8])]) -> Result<Digest> {
    use super::manifest::OCI_MANIFEST;

    let write_blob = |data: &[u8]| -> Result<Digest> {
        let digest = Digest::sha256(data);
        let path = blob_path(dir, &digest);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(digest)
    };

    let config_digest = write_blob(config)?;
    let mut layer_descriptors = Vec::with_capacity(layers.len());
    for (media_type, data) in layers {
        let digest = write_blob(data)?;
        layer_descriptors.push(serde_json::json!({
            "mediaType": media_type,
            "digest": digest.to_string(),
            "size": data.len(),
        }));
    }

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest.to_string(),
            "size": config.len(),
        },
        "layers": layer_descriptors,
    }))?;
    let manifest_digest = write_blob(&manifest)?;

    std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#)?;
    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": OCI_MANIFEST,
            "digest": manifest_digest.to_string(),
            "size": manifest.len(),
        }],
    });
    std::fs::write(dir.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    Ok(manifest_digest)
}

#[cfg(test)]
pub(crate) fn write_test_layout(dir: &Path, layer: &[u8]) -> Digest {
    write_layout(
        dir,
        br#"{"architecture":"amd64","os":"linux"}"#,
        &[("application/vnd.oci.image.layer.v1.tar+gzip", layer)],
    )
    .unwrap()
}
