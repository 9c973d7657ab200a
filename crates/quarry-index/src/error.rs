//! Hash index errors.

use thiserror::Error;

use quarry_storage::BufferError;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur in the hash index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The linear probe wrapped back to its starting slot.
    ///
    /// The caller's recovery is to resize the table and retry the
    /// insert.
    #[error("hash table is full")]
    HashTableFull,

    /// A buffer pool operation failed underneath the index.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The table violated one of its own invariants.
    ///
    /// Seen only on bugs, e.g. a resize that cannot re-place a snapshot
    /// entry into the doubled bucket array.
    #[error("hash table invariant violated: {reason}")]
    InvariantViolation {
        /// What went wrong.
        reason: String,
    },
}

impl IndexError {
    /// Creates an invariant-violation error.
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// Returns true if a resize-and-retry can recover from this error.
    pub fn is_table_full(&self) -> bool {
        matches!(self, Self::HashTableFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_full_is_recoverable() {
        assert!(IndexError::HashTableFull.is_table_full());
        assert!(!IndexError::invariant("x").is_table_full());
    }
}
