//! Change set data model.
//!
//! This crate defines the types exchanged between the change collector, the
//! pre-commit publisher and the listeners that consume published changes.
//!
//! # Modules
//!
//! - [`value`] - Runtime property values
//! - [`change`] - Entity references, change kinds and per-entity records
//! - [`change_set`] - The immutable per-transaction change set
//! - [`error`] - Data model error types
//!
//! All types derive serde's `Serialize`/`Deserialize`, so change sets can be
//! persisted (outbox) or shipped to external consumers as JSON.

pub mod change;
pub mod change_set;
pub mod error;
pub mod value;

pub use change::{
    ChangeKind, EntityId, EntityRef, PropertyChange, PropertyFault, TrackedEntity, TransactionId,
};
pub use change_set::{ChangeSet, ChangeSetHeader, ChangeSummary};
pub use error::Error;
pub use value::Value;

/// Property name of the audit row recorded for a created entity.
pub const NEW_MARKER: &str = "[NEW]";

/// Property name of the audit row recorded for a deleted entity.
pub const DELETED_MARKER: &str = "[DELETED]";
