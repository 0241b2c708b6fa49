use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of fixup event emitted during relocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixupEventKind {
    /// Copy of an image into the destination repository is starting
    CopyImageStart,
    /// Copy finished, successfully or with `error` set
    CopyImageEnd,
    /// Image already present at the destination, no copy performed
    ImageAlreadyPresent,
}

/// Relocation progress notification. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixupEvent {
    pub kind: FixupEventKind,

    /// Image reference as declared in the bundle descriptor
    pub source_image: String,

    /// Destination reference, when already known
    pub destination: Option<String>,

    /// Failure message for a failed `CopyImageEnd`
    pub error: Option<String>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl FixupEvent {
    pub fn new(kind: FixupEventKind, source_image: impl Into<String>) -> Self {
        Self {
            kind,
            source_image: source_image.into(),
            destination: None,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn copy_start(source_image: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(FixupEventKind::CopyImageStart, source_image).with_destination(destination)
    }

    pub fn copy_end(
        source_image: impl Into<String>,
        destination: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        let mut event =
            Self::new(FixupEventKind::CopyImageEnd, source_image).with_destination(destination);
        event.error = error;
        event
    }

    pub fn already_present(source_image: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(FixupEventKind::ImageAlreadyPresent, source_image).with_destination(destination)
    }

    fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Receiver of fixup events. Passed explicitly into the relocation engine.
///
/// An error from `emit` ends the relocation run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FixupEvent) -> Result<()>;
}

impl<F> EventSink for F
where
    F: Fn(FixupEvent) + Send + Sync,
{
    fn emit(&self, event: FixupEvent) -> Result<()> {
        self(event);
        Ok(())
    }
}

/// Discards all events
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: FixupEvent) -> Result<()> {
        Ok(())
    }
}
