//! Buffer pool: frames, Clock replacement, and the pool manager.

mod clock;
mod error;
mod frame;
mod pool;

pub use clock::ClockReplacer;
pub use error::{BufferError, BufferResult};
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolStats};

use quarry_common::types::Lsn;

/// Write-ahead seam between the buffer pool and the log manager.
///
/// Before a dirty page reaches disk, the pool calls [`WalBarrier::ensure_durable`]
/// with the page's LSN; the log manager must not return until every log
/// record with an LSN up to and including it is on stable storage. This is
/// the sole coupling between the two subsystems.
pub trait WalBarrier: Send + Sync {
    /// Highest LSN whose record is durably on disk, or `Lsn::INVALID` if
    /// nothing has been flushed yet.
    fn persistent_lsn(&self) -> Lsn;

    /// Blocks until `persistent_lsn() >= lsn`, forcing a log flush if
    /// needed. `lsn` is always valid when the pool calls this.
    fn ensure_durable(&self, lsn: Lsn);
}
