//! Audit sinks.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::entry::AuditEntry;

/// Audit sink failure.
#[derive(Debug, Error)]
#[error("audit error: {0}")]
pub struct AuditError(pub String);

/// Destination for committed audit rows.
pub trait AuditSink: Send + Sync {
    /// Write one row.
    fn write(&self, entry: AuditEntry);

    /// Flush buffered rows.
    fn flush(&self) -> Result<(), AuditError>;
}

/// In-memory sink.
///
/// Clones share the same buffer, so a test can keep a handle to a sink
/// moved into a listener.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Drop every row.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no row was written.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Discards every row.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn write(&self, _entry: AuditEntry) {}

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Emits each row as a `tracing` event with target `audit`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            transaction = %entry.transaction_id,
            user = %entry.user,
            entity = %entry.entity,
            property = %entry.property,
            old = %entry.old_value,
            new = %entry.new_value,
            "{}",
            entry.to_log_line()
        );
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn write(&self, entry: AuditEntry) {
        (**self).write(entry)
    }

    fn flush(&self) -> Result<(), AuditError> {
        (**self).flush()
    }
}
