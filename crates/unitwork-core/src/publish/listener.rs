//! Listener interface.

use unitwork_proto::{ChangeSet, TransactionId};

use super::scope::CommitScope;
use crate::error::ListenerError;

/// A consumer of published change sets.
///
/// Listeners are shared across threads and called with the committing
/// transaction's change set before the commit is finalised. A listener that
/// keeps side effects must stage them under the change set's transaction id
/// and only make them visible in [`ChangeListener::on_commit`].
pub trait ChangeListener: Send + Sync {
    /// Unique listener name, used in errors, logs and metrics.
    fn name(&self) -> &str;

    /// Handle the change set of a committing transaction.
    ///
    /// Returning an error aborts the commit.
    fn on_changes(&self, changes: &ChangeSet, scope: &mut CommitScope)
        -> Result<(), ListenerError>;

    /// The transaction committed.
    fn on_commit(&self, _transaction_id: &TransactionId) {}

    /// The transaction rolled back after this listener saw its change set.
    fn on_rollback(&self, _transaction_id: &TransactionId) {}
}
