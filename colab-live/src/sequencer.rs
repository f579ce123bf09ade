//! Per-document id allocation for new groups and items.

/// Monotonic id source. Every id handed out by one instance is distinct;
/// ids are never reused, even after the entity they named is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSequencer {
    next: i64,
}

impl IdSequencer {
    /// Start issuing at `next`.
    pub fn starting_at(next: i64) -> Self {
        Self { next }
    }

    /// Start issuing right after the largest id already in use.
    /// Negative or zero maxima start at 1.
    pub fn after(max_existing: i64) -> Self {
        Self::starting_at(max_existing.max(0) + 1)
    }

    /// Issue the next id.
    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> i64 {
        self.next
    }
}

impl Default for IdSequencer {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
