//! In-memory registry.
//!
//! Behaves like a content-addressed OCI registry: blobs and manifests are
//! verified against their digests, and manifests are rejected when they
//! reference content the repository does not hold. Every call is recorded
//! so callers can assert on exactly which operations ran.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use hoist_core::error::{PublishError, Result};

use super::digest::Digest;
use super::manifest::{BlobDescriptor, ManifestContent, RawManifest, OCI_INDEX, OCI_MANIFEST};
use super::reference::ImageReference;
use super::registry::{
    RegistryAuth, RegistryClient, RegistryConnector, RegistrySecurityPolicy,
};

/// A recorded registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    Inspect(String),
    PullManifest(String),
    PullBlob { repository: String, digest: String },
    PushBlob { repository: String, digest: String },
    PushManifest(String),
}

impl RegistryOp {
    pub fn is_push(&self) -> bool {
        matches!(self, RegistryOp::PushBlob { .. } | RegistryOp::PushManifest(_))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Inspect,
    Pull,
    Push,
}

#[derive(Default)]
struct Repository {
    manifests: HashMap<Digest, RawManifest>,
    tags: HashMap<String, Digest>,
    blobs: HashMap<Digest, Vec<u8>>,
}

#[derive(Default)]
struct State {
    repositories: HashMap<String, Repository>,
    ops: Vec<RegistryOp>,
    policies: Vec<RegistrySecurityPolicy>,
    denied_push: Vec<String>,
    broken_pull: Vec<String>,
    credentials: HashMap<String, RegistryAuth>,
}

/// In-memory registry shared between clones.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject pushes to repositories whose name starts with `prefix`.
    pub fn deny_push(&self, prefix: &str) {
        self.state().denied_push.push(prefix.to_string());
    }

    /// Fail manifest and blob pulls from repositories whose name starts
    /// with `prefix`. Digest lookups still succeed.
    pub fn break_pulls(&self, prefix: &str) {
        self.state().broken_pull.push(prefix.to_string());
    }

    /// Require `auth` for every call against `registry`.
    pub fn require_credentials(&self, registry: &str, auth: RegistryAuth) {
        self.state().credentials.insert(registry.to_string(), auth);
    }

    /// Store a single-platform image; tags it when the reference has a tag.
    pub fn seed_image(&self, reference: &ImageReference, layers: &[&[u8]]) -> Digest {
        let mut state = self.state();
        let repo = state.repositories.entry(reference.name()).or_default();
        let manifest = build_image(repo, layers);
        store_manifest(repo, reference, manifest)
    }

    /// Store a multi-platform index whose children each have the given layers.
    pub fn seed_index(&self, reference: &ImageReference, platforms: &[&[&[u8]]]) -> Digest {
        let mut state = self.state();
        let repo = state.repositories.entry(reference.name()).or_default();

        let mut children = Vec::new();
        for layers in platforms {
            let child = build_image(repo, layers);
            let digest = child.digest();
            children.push(serde_json::json!({
                "mediaType": OCI_MANIFEST,
                "digest": digest.to_string(),
                "size": child.bytes.len(),
            }));
            repo.manifests.insert(digest, child);
        }
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX,
            "manifests": children,
        });
        let raw = RawManifest {
            media_type: OCI_INDEX.to_string(),
            bytes: index.to_string().into_bytes(),
        };
        store_manifest(repo, reference, raw)
    }

    /// Manifest stored under the reference's tag or digest.
    pub fn manifest(&self, reference: &ImageReference) -> Option<RawManifest> {
        let state = self.state();
        let repo = state.repositories.get(&reference.name())?;
        let digest = resolve(repo, reference)?;
        repo.manifests.get(&digest).cloned()
    }

    pub fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        self.state()
            .repositories
            .get(repository)
            .is_some_and(|r| r.blobs.contains_key(digest))
    }

    /// All recorded calls, in order.
    pub fn ops(&self) -> Vec<RegistryOp> {
        self.state().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }

    /// Security policies this registry was connected with.
    pub fn policies(&self) -> Vec<RegistrySecurityPolicy> {
        self.state().policies.clone()
    }

    fn check(
        &self,
        state: &State,
        reference: &ImageReference,
        auth: &RegistryAuth,
        access: Access,
    ) -> Result<()> {
        if let Some(expected) = state.credentials.get(&reference.registry) {
            if expected != auth {
                return Err(PublishError::Authentication {
                    registry: reference.registry.clone(),
                    message: "unauthorized: authentication required".to_string(),
                });
            }
        }
        let name = reference.name();
        let listed = |rules: &[String]| rules.iter().any(|p| name.starts_with(p.as_str()));
        match access {
            Access::Push if listed(&state.denied_push) => Err(PublishError::Authentication {
                registry: reference.registry.clone(),
                message: "denied: requested access to the resource is denied".to_string(),
            }),
            Access::Pull if listed(&state.broken_pull) => Err(PublishError::Transport {
                registry: reference.registry.clone(),
                message: "connection reset by peer".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn build_image(repo: &mut Repository, layers: &[&[u8]]) -> RawManifest {
    let config = br#"{"architecture":"amd64","os":"linux"}"#.to_vec();
    let config_digest = Digest::sha256(&config);
    let config_size = config.len();
    repo.blobs.insert(config_digest.clone(), config);

    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .map(|data| {
            let digest = Digest::sha256(data);
            repo.blobs.insert(digest.clone(), data.to_vec());
            serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": digest.to_string(),
                "size": data.len(),
            })
        })
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest.to_string(),
            "size": config_size,
        },
        "layers": layer_descriptors,
    });
    RawManifest {
        media_type: OCI_MANIFEST.to_string(),
        bytes: manifest.to_string().into_bytes(),
    }
}

fn store_manifest(repo: &mut Repository, reference: &ImageReference, manifest: RawManifest) -> Digest {
    let digest = reference
        .digest
        .clone()
        .unwrap_or_else(|| manifest.digest());
    repo.manifests.insert(digest.clone(), manifest);
    if reference.digest.is_none() {
        if let Some(tag) = &reference.tag {
            repo.tags.insert(tag.clone(), digest.clone());
        }
    }
    digest
}

fn resolve(repo: &Repository, reference: &ImageReference) -> Option<Digest> {
    match (&reference.digest, &reference.tag) {
        (Some(d), _) => repo.manifests.contains_key(d).then(|| d.clone()),
        (None, Some(t)) => repo.tags.get(t).cloned(),
        (None, None) => None,
    }
}

fn not_found(reference: &ImageReference) -> PublishError {
    PublishError::NotFound {
        reference: reference.to_string(),
    }
}

fn missing_content(repo: &Repository, manifest: &RawManifest) -> Result<Option<String>> {
    let missing = match manifest.content()? {
        ManifestContent::Image { config, layers } => std::iter::once(config)
            .chain(layers)
            .map(|b| b.digest())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .find(|d| !repo.blobs.contains_key(d)),
        ManifestContent::Index { manifests } => manifests
            .iter()
            .map(BlobDescriptor::digest)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .find(|d| !repo.manifests.contains_key(d)),
    };
    Ok(missing.map(|d| d.to_string()))
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn inspect(&self, reference: &ImageReference, auth: &RegistryAuth) -> Result<Digest> {
        let mut state = self.state();
        state.ops.push(RegistryOp::Inspect(reference.to_string()));
        self.check(&state, reference, auth, Access::Inspect)?;
        state
            .repositories
            .get(&reference.name())
            .and_then(|repo| resolve(repo, reference))
            .ok_or_else(|| not_found(reference))
    }

    async fn pull_manifest(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<RawManifest> {
        let mut state = self.state();
        state.ops.push(RegistryOp::PullManifest(reference.to_string()));
        self.check(&state, reference, auth, Access::Pull)?;
        let repo = state
            .repositories
            .get(&reference.name())
            .ok_or_else(|| not_found(reference))?;
        let digest = resolve(repo, reference).ok_or_else(|| not_found(reference))?;
        repo.manifests
            .get(&digest)
            .cloned()
            .ok_or_else(|| not_found(reference))
    }

    async fn pull_blob(
        &self,
        reference: &ImageReference,
        blob: &BlobDescriptor,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.ops.push(RegistryOp::PullBlob {
            repository: reference.name(),
            digest: blob.digest.clone(),
        });
        self.check(&state, reference, auth, Access::Pull)?;
        let digest = blob.digest()?;
        state
            .repositories
            .get(&reference.name())
            .and_then(|repo| repo.blobs.get(&digest).cloned())
            .ok_or_else(|| PublishError::NotFound {
                reference: format!("{}@{}", reference.name(), digest),
            })
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        data: &[u8],
        digest: &Digest,
        auth: &RegistryAuth,
    ) -> Result<()> {
        let mut state = self.state();
        state.ops.push(RegistryOp::PushBlob {
            repository: reference.name(),
            digest: digest.to_string(),
        });
        self.check(&state, reference, auth, Access::Push)?;
        if !digest.verify(data) {
            return Err(PublishError::Transport {
                registry: reference.registry.clone(),
                message: format!("DIGEST_INVALID: uploaded content does not match {}", digest),
            });
        }
        state
            .repositories
            .entry(reference.name())
            .or_default()
            .blobs
            .insert(digest.clone(), data.to_vec());
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
        auth: &RegistryAuth,
    ) -> Result<()> {
        let mut state = self.state();
        state.ops.push(RegistryOp::PushManifest(reference.to_string()));
        self.check(&state, reference, auth, Access::Push)?;

        if let Some(expected) = &reference.digest {
            if !expected.verify(&manifest.bytes) {
                return Err(PublishError::Transport {
                    registry: reference.registry.clone(),
                    message: format!("DIGEST_INVALID: manifest does not match {}", expected),
                });
            }
        }

        let repo = state.repositories.entry(reference.name()).or_default();
        if let Some(missing) = missing_content(repo, manifest)? {
            return Err(PublishError::Transport {
                registry: reference.registry.clone(),
                message: format!("MANIFEST_BLOB_UNKNOWN: {}", missing),
            });
        }
        store_manifest(repo, reference, manifest.clone());
        Ok(())
    }
}

impl RegistryConnector for MemoryRegistry {
    fn connect(&self, policy: &RegistrySecurityPolicy) -> Result<Arc<dyn RegistryClient>> {
        self.state().policies.push(policy.clone());
        Ok(Arc::new(self.clone()))
    }
}
