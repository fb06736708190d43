//! Append-only destinations for [`LogEvent`]s.

use std::io::Write;

use parking_lot::Mutex;

use crate::event::LogEvent;

/// Append-only event stream.
///
/// Called from allocation paths and from deallocators, possibly on the
/// reaper thread, so implementations must be cheap and must not panic.
pub trait EventSink: Send + Sync {
    /// Append one event.
    fn append(&self, event: LogEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn append(&self, _event: LogEvent) {}
}

/// Keeps events in memory, in append order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events appended so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Number of events appended so far.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events have been appended.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Remove and return all events.
    pub fn take(&self) -> Vec<LogEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

/// Re-emits events as `tracing` events on target `ndbuf::events`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn append(&self, event: LogEvent) {
        tracing::debug!(
            target: "ndbuf::events",
            event_type = ?event.event_type,
            timestamp_ms = event.timestamp_ms,
            workspace = event.workspace_id.as_ref().map(|w| w.as_str()),
            kind = %event.allocation_kind,
            constant = event.constant,
            instance = event.instance_id.0,
            bytes = event.bytes,
        );
    }
}

/// Writes one JSON object per line to `W`.
///
/// Write failures are reported through `tracing` and otherwise ignored:
/// losing a diagnostic line must never fail an allocation.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn append(&self, event: LogEvent) {
        let mut writer = self.writer.lock();
        let result = serde_json::to_writer(&mut *writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = result {
            tracing::warn!(error = %e, "dropping lifecycle event");
        }
    }
}

impl<W: Write + Send> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}
