//! Units of work.
//!
//! The [`TransactionCoordinator`] ties the store, the tracking policy and the
//! publisher together. Each [`Transaction`] owns a change collector, publishes
//! its change set once at pre-commit and then commits entity writes and
//! listener-staged writes in one atomic step.

mod coordinator;
mod unit_of_work;

pub use coordinator::{Interaction, TransactionCoordinator};
pub use unit_of_work::{CommitOutcome, Transaction, TransactionState};
