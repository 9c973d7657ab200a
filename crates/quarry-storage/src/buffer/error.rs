//! Buffer pool errors.

use thiserror::Error;

use crate::disk::DiskError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every frame is pinned; no page can be brought in right now.
    ///
    /// This is a normal, retryable signal rather than a failure: callers
    /// release pins and try again.
    #[error("buffer pool exhausted: all frames are pinned")]
    PoolExhausted,

    /// Disk I/O failed underneath the pool. Fatal.
    #[error(transparent)]
    Disk(#[from] DiskError),
}

impl BufferError {
    /// Returns true if the operation may succeed on retry once pins are
    /// released.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted)
    }
}
