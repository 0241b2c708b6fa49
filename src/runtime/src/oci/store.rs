//! Local image store.
//!
//! Holds locally built images as OCI image layouts under
//! `<store>/sha256/<manifest digest>/`, indexed by fully qualified reference
//! in a persistent `index.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hoist_core::error::{PublishError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::digest::Digest;
use super::layout::LocalImage;
use super::reference::ImageReference;

/// Metadata for a stored image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Fully qualified reference (e.g., "docker.io/library/myapp:v1")
    pub reference: String,
    /// Manifest digest of the local layout
    pub digest: String,
    pub stored_at: DateTime<Utc>,
    /// Path to the OCI image layout on disk
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-backed store of locally built images.
pub struct ImageStore {
    store_dir: PathBuf,
    index: RwLock<HashMap<String, StoredImage>>,
}

impl ImageStore {
    /// Open the store at `store_dir`, creating it if needed.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir)?;
        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: RwLock::new(index),
        })
    }

    /// Store at `~/.hoist/images`.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::home_dir()
            .map(|h| h.join(".hoist"))
            .unwrap_or_else(|| PathBuf::from(".hoist"))
            .join("images");
        Self::new(&dir)
    }

    pub async fn get(&self, reference: &ImageReference) -> Option<StoredImage> {
        self.index
            .read()
            .await
            .get(&reference.full_reference())
            .cloned()
    }

    /// Open the layout stored for `reference`.
    pub async fn open(&self, reference: &ImageReference) -> Result<LocalImage> {
        let stored = self.get(reference).await.ok_or_else(|| {
            PublishError::config_with_hint(
                format!("image {} not found locally", reference.familiar()),
                "build the invocation image before publishing",
            )
        })?;
        LocalImage::open(&stored.path)
    }

    /// Copy the layout at `source_dir` into the store under `reference`.
    pub async fn put(&self, reference: &ImageReference, source_dir: &Path) -> Result<StoredImage> {
        let image = LocalImage::open(source_dir)?;
        let digest: Digest = image.manifest().digest();
        let target_dir = self.store_dir.join(digest.algorithm()).join(digest.encoded());

        if !target_dir.exists() {
            copy_dir_recursive(source_dir, &target_dir)?;
        }

        let stored = StoredImage {
            reference: reference.full_reference(),
            digest: digest.to_string(),
            stored_at: Utc::now(),
            path: target_dir,
        };

        let mut index = self.index.write().await;
        index.insert(stored.reference.clone(), stored.clone());
        save_index(&self.store_dir, &index).await?;

        tracing::debug!(reference = %stored.reference, digest = %stored.digest, "Stored local image");
        Ok(stored)
    }

    pub async fn list(&self) -> Vec<StoredImage> {
        let mut images: Vec<StoredImage> = self.index.read().await.values().cloned().collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));
        images
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }
}

fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(&index_path)?;
    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        PublishError::SerializationError(format!(
            "Failed to parse image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    // Skip entries whose layout directory has disappeared
    Ok(store_index
        .images
        .into_iter()
        .filter(|img| img.path.exists())
        .map(|img| (img.reference.clone(), img))
        .collect())
}

async fn save_index(store_dir: &Path, index: &HashMap<String, StoredImage>) -> Result<()> {
    let store_index = StoreIndex {
        images: index.values().cloned().collect(),
    };
    let data = serde_json::to_string_pretty(&store_index)?;
    tokio::fs::write(store_dir.join("index.json"), data).await?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
