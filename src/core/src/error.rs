use thiserror::Error;

/// Stages of a publish run, in the order they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStage {
    ManifestLoaded,
    InvocationImagePushed,
    InvocationReferencePinned,
    BundleDescriptorRead,
    BundleTagValidated,
    RelocationComplete,
    Published,
}

impl PublishStage {
    /// All stages in execution order.
    pub const ALL: [PublishStage; 7] = [
        PublishStage::ManifestLoaded,
        PublishStage::InvocationImagePushed,
        PublishStage::InvocationReferencePinned,
        PublishStage::BundleDescriptorRead,
        PublishStage::BundleTagValidated,
        PublishStage::RelocationComplete,
        PublishStage::Published,
    ];

    /// Human-readable description used in wrapped error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::ManifestLoaded => "unable to load manifest",
            Self::InvocationImagePushed => "unable to push CNAB invocation image",
            Self::InvocationReferencePinned => "unable to update invocation image reference",
            Self::BundleDescriptorRead => "unable to load CNAB bundle",
            Self::BundleTagValidated => "invalid bundle tag reference",
            Self::RelocationComplete => "unable to relocate bundle images",
            Self::Published => "unable to push CNAB bundle",
        }
    }
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ManifestLoaded => "manifest-loaded",
            Self::InvocationImagePushed => "invocation-image-pushed",
            Self::InvocationReferencePinned => "invocation-reference-pinned",
            Self::BundleDescriptorRead => "bundle-descriptor-read",
            Self::BundleTagValidated => "bundle-tag-validated",
            Self::RelocationComplete => "relocation-complete",
            Self::Published => "published",
        };
        write!(f, "{}", name)
    }
}

/// Broad classification of a [`PublishError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing manifest, missing bundle tag, malformed reference. Never retried.
    Configuration,
    /// The registry rejected the supplied credentials.
    Authentication,
    /// Network, registry availability or stream failure. Safe to retry.
    Transport,
    /// An artifact expected to exist remotely is missing.
    NotFound,
    /// The run was cancelled by the caller.
    Cancelled,
    /// Internal consistency failure (I/O, serialization, parser bugs).
    Internal,
}

/// Hoist error types
#[derive(Error, Debug)]
pub enum PublishError {
    /// Configuration error, always fatal
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        hint: Option<String>,
    },

    /// Malformed image or bundle reference
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Reference could not be resolved to a repository name
    #[error("Reference has no repository name: {0}")]
    UnnamedReference(String),

    /// Registry denied the credentials
    #[error("Authentication failed: {registry} - {message}")]
    Authentication { registry: String, message: String },

    /// Network or protocol failure talking to a registry
    #[error("Registry error: {registry} - {message}")]
    Transport { registry: String, message: String },

    /// Progress stream could not be fully consumed
    #[error("Progress stream error: {0}")]
    Stream(String),

    /// Remote artifact does not exist
    #[error("Not found: {reference}")]
    NotFound { reference: String },

    /// Cancelled by the caller
    #[error("Publish cancelled")]
    Cancelled,

    /// Failure in a publish stage, wrapping the underlying cause
    #[error("{}: {subject}", .stage.describe())]
    Stage {
        stage: PublishStage,
        subject: String,
        #[source]
        source: Box<PublishError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PublishError {
    /// Build a configuration error with a remediation hint.
    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        PublishError::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Wrap this error with the stage and subject it occurred in.
    pub fn at_stage(self, stage: PublishStage, subject: impl Into<String>) -> Self {
        PublishError::Stage {
            stage,
            subject: subject.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage wrappers.
    pub fn root(&self) -> &PublishError {
        match self {
            PublishError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage this error was raised in, if wrapped.
    pub fn stage(&self) -> Option<PublishStage> {
        match self {
            PublishError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            PublishError::Config { .. } | PublishError::InvalidReference { .. } => {
                ErrorKind::Configuration
            }
            PublishError::Authentication { .. } => ErrorKind::Authentication,
            PublishError::Transport { .. } | PublishError::Stream(_) => ErrorKind::Transport,
            PublishError::NotFound { .. } => ErrorKind::NotFound,
            PublishError::Cancelled => ErrorKind::Cancelled,
            PublishError::UnnamedReference(_)
            | PublishError::IoError(_)
            | PublishError::SerializationError(_)
            | PublishError::Stage { .. } => ErrorKind::Internal,
        }
    }

    /// Whether re-running the same publish may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Cancelled)
    }

    /// Remediation hint for configuration errors.
    pub fn hint(&self) -> Option<&str> {
        match self.root() {
            PublishError::Config { hint, .. } => hint.as_deref(),
            PublishError::InvalidReference { .. } => {
                Some("expected value is REGISTRY/bundle:tag")
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for PublishError {
    fn from(err: serde_yaml::Error) -> Self {
        PublishError::SerializationError(err.to_string())
    }
}

/// Result type alias for hoist operations
pub type Result<T> = std::result::Result<T, PublishError>;
