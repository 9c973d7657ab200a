//! WAL error types.

use thiserror::Error;

use quarry_common::types::TxnId;
use quarry_storage::disk::DiskError;
use quarry_storage::BufferError;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur in the log manager and recovery.
#[derive(Debug, Error)]
pub enum WalError {
    /// Disk I/O failed. Fatal.
    #[error(transparent)]
    Disk(#[from] DiskError),

    /// A buffer pool operation failed during recovery.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A record larger than the log buffer capacity was appended.
    #[error("log record of {size} bytes exceeds buffer capacity {capacity}")]
    RecordTooLarge {
        /// Serialized record size.
        size: usize,
        /// Configured per-buffer capacity.
        capacity: usize,
    },

    /// A record failed header or payload sanity checks.
    ///
    /// Recovery treats the log from this offset on as incomplete.
    #[error("corrupt log record at offset {offset}: {reason}")]
    RecordCorrupt {
        /// Byte offset of the bad record in the log file.
        offset: u64,
        /// What failed.
        reason: String,
    },

    /// An operation referenced a transaction with no open log chain.
    #[error("transaction {txn_id} has no open log chain")]
    UnknownTransaction {
        /// The offending transaction.
        txn_id: TxnId,
    },

    /// Logging is disabled.
    #[error("logging is disabled")]
    LoggingDisabled,
}

impl WalError {
    /// Creates a record-corrupt error.
    pub fn record_corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::RecordCorrupt {
            offset,
            reason: reason.into(),
        }
    }
}
