//! Writes staged by listeners for the enclosing commit.

/// Writes a listener asks the store to apply atomically with the entities.
#[derive(Debug, Default)]
pub struct CommitScope {
    outbox: Vec<Vec<u8>>,
}

impl CommitScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an encoded outbox entry. Its LSN is assigned at commit.
    pub fn stage_outbox(&mut self, entry: Vec<u8>) {
        self.outbox.push(entry);
    }

    /// Staged outbox entries in staging order.
    pub fn outbox_entries(&self) -> &[Vec<u8>] {
        &self.outbox
    }

    /// Whether nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty()
    }

    /// Drop every staged write.
    pub fn clear(&mut self) {
        self.outbox.clear();
    }
}
