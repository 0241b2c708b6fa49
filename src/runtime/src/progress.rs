//! Human-readable progress output.
//!
//! The publisher reports what it is doing as plain text lines. Relocation
//! events are rendered into the same stream by [`EventLines`].

use std::io::Write;
use std::sync::{Arc, Mutex};

use hoist_core::error::{PublishError, Result};
use hoist_core::event::{EventSink, FixupEvent, FixupEventKind};

/// Receives progress lines. A failed write aborts the run with a stream error.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, line: &str) -> Result<()>;
}

/// Writes each line, newline terminated, to the wrapped writer.
pub struct WriterProgress<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ProgressSink for WriterProgress<W> {
    fn emit(&self, line: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| PublishError::Stream("progress writer poisoned".to_string()))?;
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| PublishError::Stream(e.to_string()))
    }
}

/// Collects lines in memory.
#[derive(Clone, Default)]
pub struct MemoryProgress {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ProgressSink for MemoryProgress {
    fn emit(&self, line: &str) -> Result<()> {
        self.lines
            .lock()
            .map_err(|_| PublishError::Stream("progress buffer poisoned".to_string()))?
            .push(line.to_string());
        Ok(())
    }
}

/// Discards all lines.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _line: &str) -> Result<()> {
        Ok(())
    }
}

/// Render a fixup event as a progress line.
pub fn fixup_line(event: &FixupEvent) -> String {
    match event.kind {
        FixupEventKind::CopyImageStart => {
            format!("Starting to copy image {}...", event.source_image)
        }
        FixupEventKind::CopyImageEnd => match &event.error {
            Some(err) => format!("Failed to copy image {}: {}", event.source_image, err),
            None => format!("Completed image {} copy", event.source_image),
        },
        FixupEventKind::ImageAlreadyPresent => format!(
            "Image {} already present at {}",
            event.source_image,
            event.destination.as_deref().unwrap_or("destination")
        ),
    }
}

/// Event sink that writes fixup events to a progress sink and forwards them
/// to an optional observer. A failed write is returned to the emitter.
pub struct EventLines {
    progress: Arc<dyn ProgressSink>,
    observer: Option<Arc<dyn EventSink>>,
}

impl EventLines {
    pub fn new(progress: Arc<dyn ProgressSink>, observer: Option<Arc<dyn EventSink>>) -> Self {
        Self { progress, observer }
    }
}

impl EventSink for EventLines {
    fn emit(&self, event: FixupEvent) -> Result<()> {
        let written = self.progress.emit(&fixup_line(&event));
        if let Some(observer) = &self.observer {
            observer.emit(event)?;
        }
        written
    }
}
