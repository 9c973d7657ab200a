//! Sharp checkpoint.
//!
//! The checkpoint blocks all transactions behind a global latch, forces
//! the log to disk, flushes every dirty page (each write itself honours
//! the WAL rule), and unblocks. Afterwards every page in the pool is
//! clean and byte-identical to disk, and the persistent LSN has caught up
//! with the last appended LSN.

use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};

use quarry_storage::BufferPool;

use crate::error::WalResult;
use crate::manager::LogManager;

/// Guard held by a running transaction; a checkpoint waits for all of
/// them to drop before proceeding and blocks new ones while it runs.
pub type TxnGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Coordinates sharp checkpoints with running transactions.
pub struct CheckpointManager {
    /// Global latch: transactions hold it shared, checkpoints exclusive.
    txn_latch: Arc<RwLock<()>>,
}

impl CheckpointManager {
    /// Creates a checkpoint manager.
    pub fn new() -> Self {
        Self {
            txn_latch: Arc::new(RwLock::new(())),
        }
    }

    /// Registers a running transaction; the returned guard must live for
    /// the transaction's duration.
    pub fn txn_guard(&self) -> TxnGuard {
        self.txn_latch.read_arc()
    }

    /// Takes a sharp checkpoint.
    ///
    /// Blocks until every running transaction has released its guard,
    /// then forces the log, flushes all dirty pages, and releases the
    /// latch.
    pub fn checkpoint(&self, log: &LogManager, pool: &BufferPool) -> WalResult<()> {
        let _blocked = self.txn_latch.write();
        tracing::info!("checkpoint: transactions blocked");

        // Log first, then pages: the flush_all below may not write a page
        // whose mutations are not yet durable.
        log.flush(true);
        pool.flush_all_pages()?;

        tracing::info!(persistent_lsn = %log.persistent_lsn(), "checkpoint complete");
        Ok(())
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_waits_for_txn_guards() {
        let manager = Arc::new(CheckpointManager::new());

        let guard = manager.txn_guard();
        let manager2 = Arc::clone(&manager);
        let handle = std::thread::spawn(move || {
            // Exclusive acquisition parks until the guard drops.
            let _w = manager2.txn_latch.write();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(guard);
        handle.join().unwrap();
    }
}
