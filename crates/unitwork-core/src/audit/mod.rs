//! Audit trail.
//!
//! [`AuditListener`] turns published change sets into [`AuditEntry`] rows and
//! hands them to an [`AuditSink`] after the transaction commits.

mod entry;
mod listener;
mod sink;

pub use entry::AuditEntry;
pub use listener::AuditListener;
pub use sink::{AuditError, AuditSink, MemoryAuditSink, NullAuditSink, TracingAuditSink};
