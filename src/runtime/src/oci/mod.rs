//! OCI registry support for hoist.
//!
//! References, digests and manifests are modelled here, together with the
//! registry client used to push the invocation image and copy auxiliary
//! images, and the local stores the publisher reads from.
//!
//! ```text
//! ~/.hoist/
//! ├── auth.json               (registry credentials)
//! └── images/
//!     ├── index.json          (reference -> layout directory)
//!     └── sha256/<manifest digest>/
//!         ├── oci-layout
//!         ├── index.json
//!         └── blobs/sha256/...
//! ```

pub mod credentials;
pub mod digest;
pub mod layout;
pub mod manifest;
pub mod memory;
pub mod reference;
pub mod registry;
pub mod store;

pub use credentials::{CredentialProvider, CredentialStore, StaticCredentials};
pub use digest::Digest;
pub use layout::{write_layout, LocalImage};
pub use manifest::{BlobDescriptor, ManifestContent, RawManifest};
pub use memory::{MemoryRegistry, RegistryOp};
pub use reference::ImageReference;
pub use registry::{
    push_local_image, OciConnector, OciRegistryClient, RegistryAuth, RegistryClient,
    RegistryConnector, RegistrySecurityPolicy, TransportTimeouts,
};
pub use store::{ImageStore, StoredImage};
