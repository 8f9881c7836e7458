//! Event reporting
//!
//! A [`Reporter`] receives every [`AuditEvent`] as soon as it is produced.
//! Events are never buffered by the audit core, so a long compare run shows
//! its findings while it is still walking.
//!
//! ## Reporters
//!
//! - [`TextReporter`]: one `NEW: `, `CHANGED: ` or `DELETED: ` line per event
//! - [`JsonReporter`]: one JSON object per line, tagged with `status`
//! - [`CollectingReporter`]: keeps events in memory

use crate::error::Result;
use crate::types::AuditEvent;
use std::io::Write;

/// Receiver for audit events
pub trait Reporter {
    /// Handle one event
    fn report(&mut self, event: &AuditEvent) -> Result<()>;

    /// Called once after the last event of a run
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes events as plain text lines
///
/// ```rust
/// use fsaudit::report::{Reporter, TextReporter};
/// use fsaudit::types::AuditEvent;
///
/// let mut reporter = TextReporter::new(Vec::new());
/// reporter.report(&AuditEvent::New { path: "/srv/f3".into() }).unwrap();
/// assert_eq!(reporter.into_inner(), b"NEW: /srv/f3\n");
/// ```
pub struct TextReporter<W: Write> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    /// Create a reporter writing to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn report(&mut self, event: &AuditEvent) -> Result<()> {
        writeln!(self.out, "{}", event)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes events as JSON lines
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    /// Create a reporter writing to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn report(&mut self, event: &AuditEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Vec<AuditEvent>,
}

impl CollectingReporter {
    /// Create a reporter holding no events
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in the order they were reported
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Take ownership of the collected events
    pub fn into_events(self) -> Vec<AuditEvent> {
        self.events
    }
}

impl Reporter for CollectingReporter {
    fn report(&mut self, event: &AuditEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}
