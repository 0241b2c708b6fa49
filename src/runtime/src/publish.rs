//! Bundle publisher.
//!
//! Drives a publish run through its stages in order:
//!
//! ```text
//! ManifestLoaded → InvocationImagePushed → InvocationReferencePinned
//!   → BundleDescriptorRead → BundleTagValidated → RelocationComplete → Published
//! ```
//!
//! The first failing stage aborts the run. Its error is returned wrapped with
//! the stage and the reference involved. Nothing is rolled back: every push is
//! content addressed, so re-running the same publish is safe.
//!
//! The bundle tag is checked as soon as the manifest is loaded, before any
//! registry is contacted, because it also decides the security policy every
//! registry operation of the run uses.

use std::path::PathBuf;
use std::sync::Arc;

use hoist_core::bundle::{BundleDescriptor, BUNDLE_CONFIG_MEDIA_TYPE};
use hoist_core::config::PublishConfig;
use hoist_core::error::{PublishError, PublishStage, Result};
use hoist_core::event::EventSink;
use hoist_core::manifest::BundleManifest;
use tokio_util::sync::CancellationToken;

use crate::builder::BundleBuilder;
use crate::cancel::cancellable;
use crate::oci::credentials::CredentialProvider;
use crate::oci::digest::Digest;
use crate::oci::manifest::{RawManifest, OCI_MANIFEST};
use crate::oci::reference::ImageReference;
use crate::oci::registry::{
    push_local_image, RegistryClient, RegistryConnector, RegistrySecurityPolicy,
};
use crate::oci::store::ImageStore;
use crate::progress::{EventLines, ProgressSink};
use crate::relocation::{RelocationReport, Relocator};

/// Per-run publish options.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Explicit manifest path; `None` looks for `hoist.yaml` in `working_dir`
    pub manifest_file: Option<PathBuf>,
    pub working_dir: PathBuf,
    /// Mark the bundle tag's registry insecure
    pub insecure_registry: bool,
}

impl PublishOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_file: None,
            working_dir: working_dir.into(),
            insecure_registry: false,
        }
    }

    pub fn from_config(config: &PublishConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_file: config.manifest_file.clone(),
            working_dir: working_dir.into(),
            insecure_registry: config.insecure_registry,
        }
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// Bundle tag the descriptor was pushed to
    pub tag: String,
    /// Registry-reported digest of the bundle manifest
    pub digest: Digest,
    /// Digest-pinned invocation image recorded in the descriptor
    pub invocation_image: String,
    pub relocation: RelocationReport,
}

/// Publishes bundles to an OCI registry.
pub struct Publisher {
    connector: Arc<dyn RegistryConnector>,
    credentials: Arc<dyn CredentialProvider>,
    store: Arc<ImageStore>,
    builder: Arc<dyn BundleBuilder>,
    progress: Arc<dyn ProgressSink>,
    observer: Option<Arc<dyn EventSink>>,
}

impl Publisher {
    pub fn new(
        connector: Arc<dyn RegistryConnector>,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<ImageStore>,
        builder: Arc<dyn BundleBuilder>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            connector,
            credentials,
            store,
            builder,
            progress,
            observer: None,
        }
    }

    /// Also deliver relocation events to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn EventSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run the publish pipeline.
    pub async fn publish(
        &self,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome> {
        // ManifestLoaded
        let (manifest, manifest_path) =
            BundleManifest::load(options.manifest_file.as_deref(), &options.working_dir).map_err(
                |e| {
                    let subject = options
                        .manifest_file
                        .clone()
                        .unwrap_or_else(|| options.working_dir.clone());
                    e.at_stage(PublishStage::ManifestLoaded, subject.display().to_string())
                },
            )?;
        tracing::info!(
            stage = %PublishStage::ManifestLoaded,
            path = %manifest_path.display(),
            bundle = %manifest.name,
            "Loaded manifest"
        );

        let tag = validate_tag(&manifest.tag)
            .map_err(|e| e.at_stage(PublishStage::BundleTagValidated, manifest.tag.clone()))?;
        let policy = RegistrySecurityPolicy::for_bundle_tag(&tag, options.insecure_registry);
        let client = self.connector.connect(&policy).map_err(|e| {
            e.at_stage(
                PublishStage::InvocationImagePushed,
                manifest.invocation_image.clone(),
            )
        })?;

        // InvocationImagePushed
        let (invocation_ref, digest) = self
            .push_invocation_image(client.as_ref(), &manifest, cancel)
            .await
            .map_err(|e| {
                e.at_stage(
                    PublishStage::InvocationImagePushed,
                    manifest.invocation_image.clone(),
                )
            })?;
        tracing::info!(
            stage = %PublishStage::InvocationImagePushed,
            image = %invocation_ref,
            digest = %digest,
            "Pushed invocation image"
        );

        // InvocationReferencePinned
        let invocation_image = invocation_ref
            .pin(&digest)
            .map(|pinned| pinned.familiar())
            .map_err(|e| {
                e.at_stage(
                    PublishStage::InvocationReferencePinned,
                    manifest.invocation_image.clone(),
                )
            })?;
        tracing::info!(
            stage = %PublishStage::InvocationReferencePinned,
            image = %invocation_image,
            "Pinned invocation image"
        );

        // BundleDescriptorRead
        let mut descriptor = self
            .read_descriptor(&manifest, &invocation_image, &digest)
            .map_err(|e| e.at_stage(PublishStage::BundleDescriptorRead, manifest.name.clone()))?;
        tracing::info!(
            stage = %PublishStage::BundleDescriptorRead,
            images = descriptor.images.len(),
            "Read bundle descriptor"
        );

        // BundleTagValidated
        tracing::info!(
            stage = %PublishStage::BundleTagValidated,
            tag = %tag,
            insecure = options.insecure_registry,
            "Bundle tag validated"
        );

        // RelocationComplete
        let relocator = Relocator::new(client.clone(), self.credentials.clone(), cancel.clone());
        let events = EventLines::new(self.progress.clone(), self.observer.clone());
        let relocation = relocator
            .relocate(&mut descriptor, &tag, &events)
            .await
            .map_err(|e| match e.stage() {
                Some(_) => e,
                None => e.at_stage(PublishStage::RelocationComplete, tag.to_string()),
            })?;
        tracing::info!(
            stage = %PublishStage::RelocationComplete,
            copied = relocation.copies(),
            "Relocated bundle images"
        );

        // Published
        let bundle_digest = self
            .push_descriptor(client.as_ref(), &descriptor, &tag, cancel)
            .await
            .map_err(|e| e.at_stage(PublishStage::Published, tag.to_string()))?;
        let published = tag.familiar();
        self.progress
            .emit(&format!(
                "Bundle tag {} pushed successfully, with digest \"{}\"",
                published, bundle_digest
            ))
            .map_err(|e| e.at_stage(PublishStage::Published, tag.to_string()))?;
        tracing::info!(
            stage = %PublishStage::Published,
            tag = %published,
            digest = %bundle_digest,
            "Bundle published"
        );

        Ok(PublishOutcome {
            tag: published,
            digest: bundle_digest,
            invocation_image,
            relocation,
        })
    }

    async fn push_invocation_image(
        &self,
        client: &dyn RegistryClient,
        manifest: &BundleManifest,
        cancel: &CancellationToken,
    ) -> Result<(ImageReference, Digest)> {
        self.progress.emit("Pushing CNAB invocation image...")?;
        let reference = ImageReference::parse(&manifest.invocation_image)?;
        let image = self.store.open(&reference).await?;
        let auth = self.credentials.resolve(&reference.registry)?;
        let digest = cancellable(
            cancel,
            push_local_image(client, &image, &reference, &auth, self.progress.as_ref()),
        )
        .await?;
        Ok((reference, digest))
    }

    fn read_descriptor(
        &self,
        manifest: &BundleManifest,
        invocation_image: &str,
        digest: &Digest,
    ) -> Result<BundleDescriptor> {
        self.progress.emit("Generating CNAB bundle.json...")?;
        let path = self.builder.build(manifest, invocation_image, digest)?;
        let descriptor = BundleDescriptor::from_file(&path)?;

        let recorded = descriptor.invocation_image().map(|i| i.image.as_str());
        if recorded != Some(invocation_image) {
            return Err(PublishError::SerializationError(format!(
                "{} references invocation image {} instead of {}",
                path.display(),
                recorded.unwrap_or("<none>"),
                invocation_image
            )));
        }
        Ok(descriptor)
    }

    /// Push the descriptor as the config of an OCI image manifest with no
    /// layers, then ask the registry for the digest it stored.
    async fn push_descriptor(
        &self,
        client: &dyn RegistryClient,
        descriptor: &BundleDescriptor,
        tag: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<Digest> {
        let auth = self.credentials.resolve(&tag.registry)?;
        let config = descriptor.to_canonical_json()?;
        let config_digest = Digest::sha256(&config);

        cancellable(cancel, client.push_blob(tag, &config, &config_digest, &auth)).await?;
        tracing::debug!(digest = %config_digest, size = config.len(), "Pushed bundle config");

        let manifest = bundle_manifest(descriptor, &config_digest, config.len())?;
        cancellable(cancel, client.push_manifest(tag, &manifest, &auth)).await?;
        cancellable(cancel, client.inspect(tag, &auth)).await
    }
}

/// The bundle tag must be present, parse, and name a tag rather than a digest.
fn validate_tag(tag: &str) -> Result<ImageReference> {
    if tag.trim().is_empty() {
        return Err(PublishError::config_with_hint(
            "a bundle tag is required to publish",
            "set `tag` in the manifest, e.g. registry.example.com/bundles/myapp:v1",
        ));
    }
    let reference = ImageReference::parse(tag)?;
    if reference.is_pinned() {
        return Err(PublishError::config_with_hint(
            format!("bundle tag {} must not contain a digest", tag),
            "expected value is REGISTRY/bundle:tag",
        ));
    }
    Ok(reference)
}

fn bundle_manifest(
    descriptor: &BundleDescriptor,
    config_digest: &Digest,
    config_size: usize,
) -> Result<RawManifest> {
    let document = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {
            "mediaType": BUNDLE_CONFIG_MEDIA_TYPE,
            "digest": config_digest.to_string(),
            "size": config_size,
        },
        "layers": [],
        "annotations": {
            "io.cnab.manifest.type": "config",
            "org.opencontainers.image.title": descriptor.name,
            "org.opencontainers.image.version": descriptor.version,
        },
    });
    Ok(RawManifest {
        media_type: OCI_MANIFEST.to_string(),
        bytes: serde_json::to_vec(&document)?,
    })
}
