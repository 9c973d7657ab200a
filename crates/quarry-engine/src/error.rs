//! Engine errors.

use thiserror::Error;

use quarry_common::types::Rid;
use quarry_storage::disk::DiskError;
use quarry_storage::BufferError;
use quarry_wal::WalError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Buffer pool failure.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Log manager or recovery failure.
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Disk manager failure.
    #[error(transparent)]
    Disk(#[from] DiskError),

    /// A tuple operation addressed a record that is not there.
    #[error("no tuple at {rid}")]
    TupleNotFound {
        /// The offending record id.
        rid: Rid,
    },

    /// A tuple does not fit in any page of the heap.
    #[error("tuple of {size} bytes does not fit in a page")]
    TupleTooLarge {
        /// Payload size.
        size: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong.
        reason: String,
    },
}
