//! Hoist Runtime - bundle publish pipeline.
//!
//! Pushes a locally built invocation image, pins the bundle to its digest,
//! relocates every auxiliary image into the bundle repository and publishes
//! the bundle descriptor as an OCI manifest.

#![allow(clippy::result_large_err)]

pub mod builder;
pub mod cancel;
pub mod oci;
pub mod progress;
pub mod publish;
pub mod relocation;

// Re-export common types
pub use builder::{BundleBuilder, DescriptorBuilder, BUNDLE_FILE};
pub use oci::{
    CredentialProvider, CredentialStore, Digest, ImageReference, ImageStore, MemoryRegistry,
    OciConnector, RegistryAuth, RegistryClient, RegistryConnector, RegistrySecurityPolicy,
    StaticCredentials, TransportTimeouts,
};
pub use progress::{MemoryProgress, NullProgress, ProgressSink, WriterProgress};
pub use publish::{PublishOptions, PublishOutcome, Publisher};
pub use relocation::{RelocationReport, Relocator};

/// Hoist Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
