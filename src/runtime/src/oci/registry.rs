//! OCI registry client.
//!
//! [`RegistryClient`] is the seam the publish pipeline talks through.
//! [`OciRegistryClient`] implements it with the `oci-distribution` crate;
//! [`super::memory::MemoryRegistry`] implements it in memory.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hoist_core::error::{PublishError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::digest::Digest;
use super::layout::LocalImage;
use super::manifest::{BlobDescriptor, ManifestContent, RawManifest, ACCEPTED_MANIFEST_TYPES};
use super::reference::ImageReference;
use crate::progress::ProgressSink;

/// Authentication credentials for a container registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Anonymous access (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, falling back to anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Registries that may be reached over plain HTTP for one publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySecurityPolicy {
    insecure: BTreeSet<String>,
}

impl RegistrySecurityPolicy {
    /// Every registry over HTTPS.
    pub fn secure() -> Self {
        Self::default()
    }

    /// Policy for a bundle tag: only the tag's own registry may be insecure.
    ///
    /// Invocation and auxiliary image registries are never marked insecure,
    /// even when they differ from the tag's registry.
    pub fn for_bundle_tag(tag: &ImageReference, insecure: bool) -> Self {
        let mut policy = Self::default();
        if insecure {
            policy.insecure.insert(tag.registry.clone());
        }
        policy
    }

    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure.contains(registry)
    }

    pub fn insecure_registries(&self) -> impl Iterator<Item = &str> {
        self.insecure.iter().map(String::as_str)
    }

    fn protocol(&self) -> ClientProtocol {
        if self.insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(self.insecure.iter().cloned().collect())
        }
    }
}

/// Registry operations the publish pipeline needs.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Current manifest digest of `reference`, without pulling content.
    async fn inspect(&self, reference: &ImageReference, auth: &RegistryAuth) -> Result<Digest>;

    async fn pull_manifest(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<RawManifest>;

    async fn pull_blob(
        &self,
        reference: &ImageReference,
        blob: &BlobDescriptor,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>>;

    async fn push_blob(
        &self,
        reference: &ImageReference,
        data: &[u8],
        digest: &Digest,
        auth: &RegistryAuth,
    ) -> Result<()>;

    /// Push manifest bytes under the reference's tag or digest.
    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
        auth: &RegistryAuth,
    ) -> Result<()>;

    async fn exists(&self, reference: &ImageReference, auth: &RegistryAuth) -> Result<bool> {
        match self.inspect(reference, auth).await {
            Ok(_) => Ok(true),
            Err(PublishError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Builds a registry client for a given security policy.
pub trait RegistryConnector: Send + Sync {
    fn connect(&self, policy: &RegistrySecurityPolicy) -> Result<Arc<dyn RegistryClient>>;
}

/// Transport timeouts, configured per invocation.
///
/// `oci-distribution` does not expose socket timeouts, so each registry call
/// is bounded by the sum of both as a single deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportTimeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
}

impl TransportTimeouts {
    /// Deadline for one registry call, if any timeout is set.
    pub fn call_deadline(&self) -> Option<Duration> {
        match (self.connect, self.read) {
            (None, None) => None,
            (connect, read) => Some(connect.unwrap_or_default() + read.unwrap_or_default()),
        }
    }
}

/// Connector producing [`OciRegistryClient`]s.
#[derive(Debug, Clone, Default)]
pub struct OciConnector {
    timeouts: TransportTimeouts,
}

impl OciConnector {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self { timeouts }
    }
}

impl RegistryConnector for OciConnector {
    fn connect(&self, policy: &RegistrySecurityPolicy) -> Result<Arc<dyn RegistryClient>> {
        Ok(Arc::new(OciRegistryClient::new(policy, self.timeouts)))
    }
}

/// Registry client backed by `oci-distribution`.
pub struct OciRegistryClient {
    client: Client,
    timeouts: TransportTimeouts,
    /// `(repository name, push)` pairs already authenticated
    authorized: Mutex<HashSet<(String, bool)>>,
}

impl OciRegistryClient {
    pub fn new(policy: &RegistrySecurityPolicy, timeouts: TransportTimeouts) -> Self {
        let config = ClientConfig {
            protocol: policy.protocol(),
            ..Default::default()
        };
        for registry in policy.insecure_registries() {
            tracing::warn!(registry, "Using plain HTTP for insecure registry");
        }
        Self {
            client: Client::new(config),
            timeouts,
            authorized: Mutex::new(HashSet::new()),
        }
    }

    /// Run one `oci-distribution` call under the configured deadline.
    async fn call<T, F>(&self, reference: &ImageReference, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, OciDistributionError>>,
    {
        bounded(self.timeouts.call_deadline(), reference, request)
            .await?
            .map_err(|e| map_registry_error(reference, e))
    }

    async fn authorize(
        &self,
        reference: &ImageReference,
        oci_ref: &Reference,
        auth: &RegistryAuth,
        push: bool,
    ) -> Result<()> {
        let key = (reference.name(), push);
        if self
            .authorized
            .lock()
            .map(|set| set.contains(&key))
            .unwrap_or(false)
        {
            return Ok(());
        }

        let operation = if push {
            RegistryOperation::Push
        } else {
            RegistryOperation::Pull
        };
        self.call(
            reference,
            self.client.auth(oci_ref, &auth.to_oci_auth(), operation),
        )
        .await?;

        if let Ok(mut set) = self.authorized.lock() {
            set.insert(key);
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn inspect(&self, reference: &ImageReference, auth: &RegistryAuth) -> Result<Digest> {
        let oci_ref = to_oci_reference(reference)?;
        let oci_auth = auth.to_oci_auth();
        let digest = self
            .call(
                reference,
                self.client.fetch_manifest_digest(&oci_ref, &oci_auth),
            )
            .await?;
        Digest::parse(&digest)
    }

    async fn pull_manifest(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<RawManifest> {
        let oci_ref = to_oci_reference(reference)?;
        let oci_auth = auth.to_oci_auth();
        let (bytes, digest) = self
            .call(
                reference,
                self.client
                    .pull_manifest_raw(&oci_ref, &oci_auth, &ACCEPTED_MANIFEST_TYPES),
            )
            .await?;

        tracing::debug!(reference = %reference, digest = %digest, size = bytes.len(), "Pulled manifest");
        RawManifest::new(bytes, None)
    }

    async fn pull_blob(
        &self,
        reference: &ImageReference,
        blob: &BlobDescriptor,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        self.authorize(reference, &oci_ref, auth, false).await?;

        let descriptor = OciDescriptor {
            media_type: blob.media_type.clone(),
            digest: blob.digest.clone(),
            size: blob.size,
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.call(
            reference,
            self.client.pull_blob(&oci_ref, &descriptor, &mut data),
        )
        .await?;
        Ok(data)
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        data: &[u8],
        digest: &Digest,
        auth: &RegistryAuth,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.authorize(reference, &oci_ref, auth, true).await?;

        let digest = digest.to_string();
        self.call(reference, self.client.push_blob(&oci_ref, data, &digest))
            .await?;
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
        auth: &RegistryAuth,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.authorize(reference, &oci_ref, auth, true).await?;

        let content_type = http::HeaderValue::from_str(&manifest.media_type).map_err(|e| {
            PublishError::SerializationError(format!(
                "Invalid manifest media type '{}': {}",
                manifest.media_type, e
            ))
        })?;
        let url = self
            .call(
                reference,
                self.client
                    .push_manifest_raw(&oci_ref, manifest.bytes.clone(), content_type),
            )
            .await?;

        tracing::debug!(reference = %reference, url = %url, "Pushed manifest");
        Ok(())
    }
}

/// Push a locally stored image to `reference` and return the digest the
/// registry reports for it afterwards.
pub async fn push_local_image(
    client: &dyn RegistryClient,
    image: &LocalImage,
    reference: &ImageReference,
    auth: &RegistryAuth,
    progress: &dyn ProgressSink,
) -> Result<Digest> {
    tracing::info!(reference = %reference, source = %image.path().display(), "Pushing image to registry");
    progress.emit(&format!("The push refers to repository [{}]", reference.name()))?;

    let blobs = match image.manifest().content()? {
        ManifestContent::Image { config, layers } => {
            let mut blobs = layers;
            blobs.push(config);
            blobs
        }
        ManifestContent::Index { .. } => {
            return Err(PublishError::Config {
                message: format!(
                    "local image {} is a multi-platform index; push a single-platform image",
                    reference
                ),
                hint: None,
            });
        }
    };

    for blob in &blobs {
        let digest = blob.digest()?;
        progress.emit(&format!("{}: Preparing", digest.short()))?;
        let data = image.read_blob(&digest)?;
        client.push_blob(reference, &data, &digest, auth).await?;
        tracing::debug!(digest = %digest, size = data.len(), "Pushed blob");
        progress.emit(&format!("{}: Pushed", digest.short()))?;
    }

    client
        .push_manifest(reference, image.manifest(), auth)
        .await?;

    let digest = client.inspect(reference, auth).await?;
    progress.emit(&format!(
        "{}: digest: {} size: {}",
        reference.locator(),
        digest,
        image.manifest().bytes.len()
    ))?;

    tracing::info!(reference = %reference, digest = %digest, "Image pushed successfully");
    Ok(digest)
}

/// Await `request`, failing with a transport error once `deadline` passes.
async fn bounded<F: Future>(
    deadline: Option<Duration>,
    reference: &ImageReference,
    request: F,
) -> Result<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| PublishError::Transport {
                registry: reference.registry.clone(),
                message: format!("request timed out after {:?}", deadline),
            }),
        None => Ok(request.await),
    }
}

fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| PublishError::InvalidReference {
        reference: ref_str.clone(),
        reason: e.to_string(),
    })
}

/// Classify an `oci-distribution` failure into the publish error taxonomy.
fn map_registry_error(reference: &ImageReference, err: OciDistributionError) -> PublishError {
    let registry = reference.registry.clone();
    let message = err.to_string();
    match &err {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => {
            PublishError::Authentication { registry, message }
        }
        OciDistributionError::ImageManifestNotFoundError(_) => PublishError::NotFound {
            reference: reference.to_string(),
        },
        OciDistributionError::ServerError { code, .. } => match code {
            401 | 403 => PublishError::Authentication { registry, message },
            404 => PublishError::NotFound {
                reference: reference.to_string(),
            },
            _ => classify_message(reference, message),
        },
        OciDistributionError::RegistryError { envelope, .. } => {
            let codes: Vec<&OciErrorCode> = envelope.errors.iter().map(|e| &e.code).collect();
            if codes
                .iter()
                .any(|c| matches!(c, OciErrorCode::Denied | OciErrorCode::Unauthorized))
            {
                PublishError::Authentication { registry, message }
            } else if codes.iter().any(|c| {
                matches!(
                    c,
                    OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown
                )
            }) {
                PublishError::NotFound {
                    reference: reference.to_string(),
                }
            } else {
                classify_message(reference, message)
            }
        }
        _ => classify_message(reference, message),
    }
}

/// Registries report rejected credentials with a "denied" prefixed message.
fn classify_message(reference: &ImageReference, message: String) -> PublishError {
    let registry = reference.registry.clone();
    if message.trim_start().to_ascii_lowercase().starts_with("denied") {
        PublishError::Authentication { registry, message }
    } else {
        PublishError::Transport { registry, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ImageReference {
        ImageReference::parse("ghcr.io/org/app:v1").unwrap()
    }

    #[test]
    fn test_registry_auth_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_registry_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert_eq!(auth.username(), Some("user"));
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_registry_auth_debug_redacts_password() {
        let debug = format!("{:?}", RegistryAuth::basic("user", "s3cret"));
        assert!(debug.contains("user"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_policy_from_bundle_tag() {
        let tag = ImageReference::parse("localhost:5000/bundles/app:v1").unwrap();
        let policy = RegistrySecurityPolicy::for_bundle_tag(&tag, true);
        assert!(policy.is_insecure("localhost:5000"));
        assert!(!policy.is_insecure("docker.io"));
        assert!(matches!(policy.protocol(), ClientProtocol::HttpsExcept(ref r) if r == &vec!["localhost:5000".to_string()]));

        let secure = RegistrySecurityPolicy::for_bundle_tag(&tag, false);
        assert_eq!(secure, RegistrySecurityPolicy::secure());
        assert!(matches!(secure.protocol(), ClientProtocol::Https));
    }

    #[test]
    fn test_call_deadline() {
        assert_eq!(TransportTimeouts::default().call_deadline(), None);
        let timeouts = TransportTimeouts {
            connect: Some(Duration::from_secs(5)),
            read: Some(Duration::from_secs(30)),
        };
        assert_eq!(timeouts.call_deadline(), Some(Duration::from_secs(35)));
        let read_only = TransportTimeouts {
            connect: None,
            read: Some(Duration::from_secs(30)),
        };
        assert_eq!(read_only.call_deadline(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_stalled_request_times_out_as_transport() {
        let stalled = std::future::pending::<std::result::Result<(), OciDistributionError>>();
        let err = bounded(Some(Duration::from_millis(20)), &reference(), stalled)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Transport { ref registry, .. } if registry == "ghcr.io"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_request_without_deadline_completes() {
        let value = bounded(None, &reference(), async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_client_applies_timeouts() {
        let timeouts = TransportTimeouts {
            connect: Some(Duration::from_millis(10)),
            read: Some(Duration::from_millis(10)),
        };
        let client = OciRegistryClient::new(&RegistrySecurityPolicy::secure(), timeouts);
        let stalled = std::future::pending::<std::result::Result<(), OciDistributionError>>();
        let err = client.call(&reference(), stalled).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport { .. }));
    }

    #[test]
    fn test_to_oci_reference_with_tag() {
        let oci_ref = to_oci_reference(&reference()).unwrap();
        assert_eq!(oci_ref.to_string(), "ghcr.io/org/app:v1");
    }

    #[test]
    fn test_to_oci_reference_with_digest() {
        let digest = Digest::sha256(b"x");
        let pinned = reference().pin(&digest).unwrap();
        let oci_ref = to_oci_reference(&pinned).unwrap();
        assert_eq!(oci_ref.digest(), Some(digest.to_string().as_str()));
    }

    #[test]
    fn test_authentication_failure_maps_to_authentication() {
        let err = map_registry_error(
            &reference(),
            OciDistributionError::AuthenticationFailure("bad token".to_string()),
        );
        assert!(matches!(err, PublishError::Authentication { ref registry, .. } if registry == "ghcr.io"));
    }

    #[test]
    fn test_manifest_not_found_maps_to_not_found() {
        let err = map_registry_error(
            &reference(),
            OciDistributionError::ImageManifestNotFoundError("gone".to_string()),
        );
        assert!(matches!(err, PublishError::NotFound { .. }));
    }

    #[test]
    fn test_denied_message_is_authentication() {
        let err = classify_message(
            &reference(),
            "denied: requested access to the resource is denied".to_string(),
        );
        assert!(matches!(err, PublishError::Authentication { .. }));
    }

    #[test]
    fn test_other_message_is_transport() {
        let err = classify_message(&reference(), "connection refused".to_string());
        assert!(matches!(err, PublishError::Transport { .. }));
    }
}
