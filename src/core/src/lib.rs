//! Hoist Core - Foundational Types
//!
//! Error taxonomy, configuration, manifest and bundle descriptor models, and
//! relocation events shared by the hoist runtime and CLI.

pub mod bundle;
pub mod config;
pub mod error;
pub mod event;
pub mod manifest;

// Re-export commonly used types
pub use bundle::{BundleDescriptor, BundleImage, InvocationImage};
pub use config::PublishConfig;
pub use error::{ErrorKind, PublishError, PublishStage, Result};
pub use event::{EventSink, FixupEvent, FixupEventKind, NoopSink};
pub use manifest::{BundleManifest, ManifestImage};

/// Hoist version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
