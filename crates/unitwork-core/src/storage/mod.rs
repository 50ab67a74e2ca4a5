//! Storage layer.
//!
//! A sled-backed entity store standing in for the persistence provider. It
//! holds one record per entity and commits entity writes together with
//! listener-staged writes (the outbox) in a single sled transaction.

mod config;
mod engine;
mod record;

pub mod key;

pub use config::StorageConfig;
pub use engine::{EntityStore, EntityWrite};
pub(crate) use engine::read_last_lsn;
pub use record::Record;
