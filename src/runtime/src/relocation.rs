//! Relocation of auxiliary bundle images.
//!
//! Every auxiliary image of a bundle is copied into the bundle's own
//! repository and the descriptor is rewritten to reference the copy by
//! digest. Images already present at the destination are not copied again,
//! so relocating an already relocated descriptor is a no-op.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use hoist_core::bundle::{BundleDescriptor, BundleImage};
use hoist_core::error::{PublishError, PublishStage, Result};
use hoist_core::event::{EventSink, FixupEvent};
use tokio_util::sync::CancellationToken;

use crate::cancel::{cancellable, check};
use crate::oci::credentials::CredentialProvider;
use crate::oci::digest::Digest;
use crate::oci::manifest::{BlobDescriptor, ManifestContent};
use crate::oci::reference::ImageReference;
use crate::oci::registry::{RegistryAuth, RegistryClient};

/// What a relocation run did, per image name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationReport {
    /// Images copied into the destination repository
    pub copied: Vec<String>,
    /// Images that were already present and only rewritten
    pub already_present: Vec<String>,
}

impl RelocationReport {
    pub fn copies(&self) -> usize {
        self.copied.len()
    }
}

struct CopyAuth {
    source: RegistryAuth,
    destination: RegistryAuth,
}

/// Copies auxiliary images into the bundle repository.
pub struct Relocator {
    client: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialProvider>,
    cancel: CancellationToken,
}

impl Relocator {
    pub fn new(
        client: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            credentials,
            cancel,
        }
    }

    /// Relocate every auxiliary image of `descriptor` into the repository of
    /// `target`, rewriting the descriptor in place.
    ///
    /// Images are processed one at a time in descriptor order. The first
    /// failure aborts the run; entries processed before it keep their
    /// rewritten references, so callers must not publish the descriptor.
    pub async fn relocate(
        &self,
        descriptor: &mut BundleDescriptor,
        target: &ImageReference,
        events: &dyn EventSink,
    ) -> Result<RelocationReport> {
        let mut report = RelocationReport::default();

        for (name, image) in descriptor.images.iter_mut() {
            let declared = image.image.clone();
            let copied = self
                .relocate_image(image, target, events)
                .await
                .map_err(|e| {
                    e.at_stage(
                        PublishStage::RelocationComplete,
                        format!("image {} ({})", name, declared),
                    )
                })?;
            if copied {
                report.copied.push(name.clone());
            } else {
                report.already_present.push(name.clone());
            }
        }

        tracing::info!(
            target = %target.name(),
            copied = report.copied.len(),
            already_present = report.already_present.len(),
            "Relocation complete"
        );
        Ok(report)
    }

    /// Relocate one image; returns whether content was copied.
    async fn relocate_image(
        &self,
        image: &mut BundleImage,
        target: &ImageReference,
        events: &dyn EventSink,
    ) -> Result<bool> {
        check(&self.cancel)?;

        let source = ImageReference::parse(&image.image)?;
        let auth = CopyAuth {
            source: self.credentials.resolve(&source.registry)?,
            destination: self.credentials.resolve(&target.registry)?,
        };

        let digest = match &source.digest {
            Some(digest) => digest.clone(),
            None => {
                cancellable(&self.cancel, self.client.inspect(&source, &auth.source)).await?
            }
        };
        if let Some(declared) = &image.content_digest {
            if *declared != digest.to_string() {
                return Err(PublishError::Config {
                    message: format!(
                        "image {} resolves to {} but the bundle declares {}",
                        source, digest, declared
                    ),
                    hint: None,
                });
            }
        }

        let destination = target.pin(&digest)?;
        let present = cancellable(
            &self.cancel,
            self.client.exists(&destination, &auth.destination),
        )
        .await?;

        if present {
            tracing::info!(image = %source, destination = %destination, "Image already present");
            events.emit(FixupEvent::already_present(&image.image, destination.to_string()))?;
        } else {
            tracing::info!(image = %source, destination = %destination, "Copying image");
            events.emit(FixupEvent::copy_start(&image.image, destination.to_string()))?;
            let result = self
                .copy_manifest(&source, &destination, digest.clone(), &auth)
                .await;
            let reported = events.emit(FixupEvent::copy_end(
                &image.image,
                destination.to_string(),
                result.as_ref().err().map(|e| e.to_string()),
            ));
            match (result, reported) {
                (Err(copy), Err(stream)) => {
                    tracing::warn!(image = %source, error = %stream, "Could not report copy failure");
                    return Err(copy);
                }
                (Err(copy), Ok(())) => return Err(copy),
                (Ok(()), reported) => reported?,
            }
        }

        if image.original_image.is_none() {
            image.original_image = Some(image.image.clone());
        }
        image.image = destination.to_string();
        image.content_digest = Some(digest.to_string());
        Ok(!present)
    }

    /// Copy the manifest `digest` and everything it references, children
    /// before parents, so the destination never sees a dangling manifest.
    fn copy_manifest<'a>(
        &'a self,
        source: &'a ImageReference,
        destination: &'a ImageReference,
        digest: Digest,
        auth: &'a CopyAuth,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let from = source.pin(&digest)?;
            let to = destination.pin(&digest)?;

            let manifest =
                cancellable(&self.cancel, self.client.pull_manifest(&from, &auth.source)).await?;
            if !digest.verify(&manifest.bytes) {
                return Err(PublishError::Transport {
                    registry: source.registry.clone(),
                    message: format!("manifest for {} does not match its digest", from),
                });
            }

            match manifest.content()? {
                ManifestContent::Image { config, layers } => {
                    for blob in layers.iter().chain(std::iter::once(&config)) {
                        self.copy_blob(&from, &to, blob, auth).await?;
                    }
                }
                ManifestContent::Index { manifests } => {
                    for child in &manifests {
                        self.copy_manifest(source, destination, child.digest()?, auth)
                            .await?;
                    }
                }
            }

            cancellable(
                &self.cancel,
                self.client.push_manifest(&to, &manifest, &auth.destination),
            )
            .await?;
            tracing::debug!(destination = %to, "Copied manifest");
            Ok(())
        }
        .boxed()
    }

    async fn copy_blob(
        &self,
        from: &ImageReference,
        to: &ImageReference,
        blob: &BlobDescriptor,
        auth: &CopyAuth,
    ) -> Result<()> {
        let digest = blob.digest()?;
        let data =
            cancellable(&self.cancel, self.client.pull_blob(from, blob, &auth.source)).await?;
        if !digest.verify(&data) {
            return Err(PublishError::Transport {
                registry: from.registry.clone(),
                message: format!("blob {} failed digest verification", digest),
            });
        }
        cancellable(
            &self.cancel,
            self.client.push_blob(to, &data, &digest, &auth.destination),
        )
        .await?;
        tracing::debug!(digest = %digest, size = data.len(), "Copied blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::credentials::StaticCredentials;
    use crate::oci::memory::{MemoryRegistry, RegistryOp};
    use hoist_core::bundle::{InvocationImage, SCHEMA_VERSION};
    use hoist_core::event::FixupEventKind;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn descriptor(images: &[(&str, &str)]) -> BundleDescriptor {
        BundleDescriptor {
            schema_version: SCHEMA_VERSION.to_string(),
            name: "myapp".to_string(),
            version: "0.1.0".to_string(),
            description: None,
            invocation_images: vec![InvocationImage {
                image: "myapp@sha256:aaaa".to_string(),
                image_type: "docker".to_string(),
                content_digest: None,
            }],
            images: images
                .iter()
                .map(|(name, image)| {
                    (
                        name.to_string(),
                        BundleImage {
                            image: image.to_string(),
                            image_type: "docker".to_string(),
                            content_digest: None,
                            description: None,
                            original_image: None,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            custom: BTreeMap::new(),
        }
    }

    fn relocator(registry: &MemoryRegistry) -> Relocator {
        Relocator::new(
            Arc::new(registry.clone()),
            Arc::new(StaticCredentials::new()),
            CancellationToken::new(),
        )
    }

    fn target() -> ImageReference {
        ImageReference::parse("registry.example.com/bundles/myapp:v1").unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<FixupEvent>>>, impl Fn(FixupEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        (events, move |e: FixupEvent| captured.lock().unwrap().push(e))
    }

    #[tokio::test]
    async fn test_copies_and_rewrites() {
        let registry = MemoryRegistry::new();
        let redis = ImageReference::parse("redis:7").unwrap();
        let digest = registry.seed_image(&redis, &[b"redis-layer"]);

        let mut bundle = descriptor(&[("cache", "redis:7")]);
        let (events, sink) = recorder();
        let report = relocator(&registry)
            .relocate(&mut bundle, &target(), &sink)
            .await
            .unwrap();

        assert_eq!(report.copied, vec!["cache".to_string()]);
        let image = &bundle.images["cache"];
        assert_eq!(
            image.image,
            format!("registry.example.com/bundles/myapp@{}", digest)
        );
        assert_eq!(image.content_digest.as_deref(), Some(digest.to_string().as_str()));
        assert_eq!(image.original_image.as_deref(), Some("redis:7"));

        let pinned = target().pin(&digest).unwrap();
        assert!(registry.manifest(&pinned).is_some());

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![FixupEventKind::CopyImageStart, FixupEventKind::CopyImageEnd]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("redis:7").unwrap(), &[b"r"]);
        registry.seed_image(&ImageReference::parse("postgres:16").unwrap(), &[b"p"]);

        let mut bundle = descriptor(&[("cache", "redis:7"), ("db", "postgres:16")]);
        let engine = relocator(&registry);
        engine
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();
        let first = bundle.to_canonical_json().unwrap();

        registry.clear_ops();
        let report = engine
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();

        assert_eq!(report.copies(), 0);
        assert_eq!(report.already_present.len(), 2);
        assert!(!registry.ops().iter().any(RegistryOp::is_push));
        assert_eq!(bundle.to_canonical_json().unwrap(), first);
    }

    #[tokio::test]
    async fn test_multi_platform_index_copied() {
        let registry = MemoryRegistry::new();
        let alpine = ImageReference::parse("alpine:3").unwrap();
        let digest = registry.seed_index(&alpine, &[&[b"amd64"], &[b"arm64"]]);

        let mut bundle = descriptor(&[("base", "alpine:3")]);
        relocator(&registry)
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();

        let pinned = target().pin(&digest).unwrap();
        let index = registry.manifest(&pinned).unwrap();
        match index.content().unwrap() {
            ManifestContent::Index { manifests } => {
                for child in manifests {
                    let child_ref = target().pin(&child.digest().unwrap()).unwrap();
                    assert!(registry.manifest(&child_ref).is_some());
                }
            }
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_emits_end_event_and_aborts() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("quay.io/org/a:1").unwrap(), &[b"a"]);
        registry.seed_image(&ImageReference::parse("quay.io/org/b:1").unwrap(), &[b"b"]);
        registry.break_pulls("quay.io/org/a");

        let mut bundle = descriptor(&[("a", "quay.io/org/a:1"), ("b", "quay.io/org/b:1")]);
        let (events, sink) = recorder();
        let err = relocator(&registry)
            .relocate(&mut bundle, &target(), &sink)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::RelocationComplete));
        assert!(err.to_string().contains("quay.io/org/a:1"));
        assert!(err.is_retryable());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, FixupEventKind::CopyImageStart);
        assert_eq!(events[1].kind, FixupEventKind::CopyImageEnd);
        assert!(events[1].is_failure());
        assert_eq!(bundle.images["b"].image, "quay.io/org/b:1");
    }

    /// Sink whose writes fail for the given event kinds.
    struct FailingSink(Vec<FixupEventKind>);

    impl EventSink for FailingSink {
        fn emit(&self, event: FixupEvent) -> Result<()> {
            if self.0.contains(&event.kind) {
                return Err(PublishError::Stream("broken pipe".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stream_failure_stops_relocation() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("quay.io/org/a:1").unwrap(), &[b"a"]);
        registry.seed_image(&ImageReference::parse("quay.io/org/b:1").unwrap(), &[b"b"]);

        let mut bundle = descriptor(&[("a", "quay.io/org/a:1"), ("b", "quay.io/org/b:1")]);
        let sink = FailingSink(vec![FixupEventKind::CopyImageStart]);
        let err = relocator(&registry)
            .relocate(&mut bundle, &target(), &sink)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::RelocationComplete));
        assert!(matches!(err.root(), PublishError::Stream(_)));
        assert!(err.to_string().contains("quay.io/org/a:1"));
        assert!(!registry.ops().iter().any(RegistryOp::is_push));
        assert_eq!(bundle.images["b"].image, "quay.io/org/b:1");
    }

    #[tokio::test]
    async fn test_stream_failure_after_copy_aborts() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("quay.io/org/a:1").unwrap(), &[b"a"]);
        registry.seed_image(&ImageReference::parse("quay.io/org/b:1").unwrap(), &[b"b"]);

        let mut bundle = descriptor(&[("a", "quay.io/org/a:1"), ("b", "quay.io/org/b:1")]);
        let sink = FailingSink(vec![FixupEventKind::CopyImageEnd]);
        let err = relocator(&registry)
            .relocate(&mut bundle, &target(), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err.root(), PublishError::Stream(_)));
        let manifest_pushes = registry
            .ops()
            .iter()
            .filter(|op| matches!(op, RegistryOp::PushManifest(_)))
            .count();
        assert_eq!(manifest_pushes, 1);
    }

    #[tokio::test]
    async fn test_copy_error_kept_when_stream_also_fails() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("quay.io/org/a:1").unwrap(), &[b"a"]);
        registry.break_pulls("quay.io/org/a");

        let mut bundle = descriptor(&[("a", "quay.io/org/a:1")]);
        let sink = FailingSink(vec![FixupEventKind::CopyImageEnd]);
        let err = relocator(&registry)
            .relocate(&mut bundle, &target(), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err.root(), PublishError::Transport { .. }));
        assert!(err.to_string().contains("quay.io/org/a:1"));
    }

    #[tokio::test]
    async fn test_sha512_pinned_source() {
        let registry = MemoryRegistry::new();
        let redis = ImageReference::parse("redis:7").unwrap();
        registry.seed_image(&redis, &[b"r"]);
        let manifest = registry.manifest(&redis).unwrap();
        let digest = Digest::sha512(&manifest.bytes);
        let pinned = redis.pin(&digest).unwrap();
        registry
            .push_manifest(&pinned, &manifest, &RegistryAuth::anonymous())
            .await
            .unwrap();

        let declared = pinned.to_string();
        let mut bundle = descriptor(&[("cache", declared.as_str())]);
        relocator(&registry)
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();

        let image = &bundle.images["cache"];
        assert_eq!(image.content_digest.as_deref(), Some(digest.to_string().as_str()));
        assert!(registry.manifest(&target().pin(&digest).unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_pinned_source_not_inspected() {
        let registry = MemoryRegistry::new();
        let nginx = ImageReference::parse("nginx:1.25").unwrap();
        let digest = registry.seed_image(&nginx, &[b"n"]);
        let declared = format!("nginx@{}", digest);

        let mut bundle = descriptor(&[("web", declared.as_str())]);
        relocator(&registry)
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();

        assert!(!registry
            .ops()
            .iter()
            .any(|op| matches!(op, RegistryOp::Inspect(r) if r.contains("nginx"))));
    }

    #[tokio::test]
    async fn test_declared_digest_mismatch() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("redis:7").unwrap(), &[b"r"]);

        let mut bundle = descriptor(&[("cache", "redis:7")]);
        bundle.images.get_mut("cache").unwrap().content_digest =
            Some(Digest::sha256(b"other").to_string());

        let err = relocator(&registry)
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), hoist_core::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_credentials_resolved_per_registry() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("ghcr.io/org/tool:1").unwrap(), &[b"t"]);
        registry.require_credentials("ghcr.io", RegistryAuth::basic("reader", "r"));
        registry.require_credentials("registry.example.com", RegistryAuth::basic("writer", "w"));

        let credentials = StaticCredentials::new()
            .with("ghcr.io", RegistryAuth::basic("reader", "r"))
            .with("registry.example.com", RegistryAuth::basic("writer", "w"));
        let engine = Relocator::new(
            Arc::new(registry.clone()),
            Arc::new(credentials),
            CancellationToken::new(),
        );

        let mut bundle = descriptor(&[("tool", "ghcr.io/org/tool:1")]);
        let report = engine
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap();
        assert_eq!(report.copies(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let registry = MemoryRegistry::new();
        registry.seed_image(&ImageReference::parse("redis:7").unwrap(), &[b"r"]);
        let token = CancellationToken::new();
        token.cancel();
        let engine = Relocator::new(
            Arc::new(registry.clone()),
            Arc::new(StaticCredentials::new()),
            token,
        );

        let mut bundle = descriptor(&[("cache", "redis:7")]);
        let err = engine
            .relocate(&mut bundle, &target(), &hoist_core::NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), PublishError::Cancelled));
        assert!(registry.ops().is_empty());
    }
}
