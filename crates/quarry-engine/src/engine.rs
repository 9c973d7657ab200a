//! Engine wiring.
//!
//! [`Engine::open`] builds the whole core in dependency order: disk
//! manager, buffer pool, log manager; runs recovery over whatever the
//! log file holds (with logging disabled, as recovery requires); wires
//! the pool's write-ahead barrier to the log manager; and only then
//! starts the flush thread.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quarry_common::types::TxnId;
use quarry_common::EngineConfig;
use quarry_storage::{BufferPool, DiskManager};
use quarry_wal::checkpoint::TxnGuard;
use quarry_wal::{recovery, CheckpointManager, LogManager, LogRecord};

use crate::error::{EngineError, EngineResult};
use crate::table_heap::TableHeap;

/// A running transaction.
///
/// Holds the shared side of the checkpoint latch: a sharp checkpoint
/// waits for every live `Transaction` to finish and blocks new ones
/// until it completes.
pub struct Transaction {
    id: TxnId,
    _guard: TxnGuard,
}

impl Transaction {
    /// This transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

/// The assembled storage engine core.
pub struct Engine {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    log: Arc<LogManager>,
    checkpoints: CheckpointManager,
    config: EngineConfig,
    next_txn_id: AtomicU32,
}

impl Engine {
    /// Opens (or creates) the database at `db_path`, recovers it, and
    /// brings the engine online.
    pub fn open(db_path: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|reason| EngineError::Config { reason })?;

        let disk = Arc::new(DiskManager::open(db_path)?);
        let pool = Arc::new(BufferPool::new(config.pool_size, Arc::clone(&disk)));
        let log = Arc::new(LogManager::new(
            Arc::clone(&disk),
            config.log_buffer_size,
            config.log_timeout,
        ));

        // Recovery runs before the barrier is wired and before logging is
        // enabled. The repaired pages go to disk right away, and LSN
        // assignment resumes past the highest LSN the log holds so new
        // records never compare below the stamps already on pages.
        let outcome = recovery::recover(
            Arc::clone(&disk),
            Arc::clone(&pool),
            config.log_buffer_size,
        )?;
        pool.flush_all_pages()?;
        if outcome.max_lsn.is_valid() {
            log.resume_from(outcome.max_lsn.next());
        }

        pool.set_wal(Arc::clone(&log) as Arc<dyn quarry_storage::WalBarrier>);
        if config.enable_logging {
            log.run_flush_thread();
            // Close the chains of the transactions undo rolled back, so
            // the next recovery does not walk them again.
            for &(txn_id, last_lsn) in &outcome.losers {
                let mut record = LogRecord::abort(txn_id, last_lsn);
                log.append(&mut record)?;
            }
            if !outcome.losers.is_empty() {
                log.flush(true);
            }
        }
        tracing::info!(
            pool_size = config.pool_size,
            logging = config.enable_logging,
            "engine online"
        );

        Ok(Self {
            disk,
            pool,
            log,
            checkpoints: CheckpointManager::new(),
            config,
            next_txn_id: AtomicU32::new(0),
        })
    }

    /// The engine's buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The engine's log manager.
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// The engine's disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// The configuration the engine was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a transaction: assigns an id, registers it with the
    /// checkpoint latch, and appends its BEGIN record.
    pub fn begin_transaction(&self) -> EngineResult<Transaction> {
        let guard = self.checkpoints.txn_guard();
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::AcqRel));
        if self.log.is_enabled() {
            self.log.begin(id)?;
        }
        Ok(Transaction { id, _guard: guard })
    }

    /// Commits `txn`: appends COMMIT and waits for group commit to make
    /// it durable.
    pub fn commit(&self, txn: Transaction) -> EngineResult<()> {
        if self.log.is_enabled() {
            self.log.commit(txn.id)?;
        }
        Ok(())
    }

    /// Aborts `txn` at the log level.
    ///
    /// Compensating the transaction's visible effects is the caller's
    /// job (through the table heap), mirroring how the transaction
    /// manager above this layer drives rollback from its write set.
    pub fn abort(&self, txn: Transaction) -> EngineResult<()> {
        if self.log.is_enabled() {
            self.log.abort(txn.id)?;
        }
        Ok(())
    }

    /// Creates a logged table heap owned by `txn`.
    pub fn create_table(&self, txn: &Transaction) -> EngineResult<TableHeap> {
        let log = self.log.is_enabled().then(|| Arc::clone(&self.log));
        TableHeap::create(Arc::clone(&self.pool), log, txn.id)
    }

    /// Takes a sharp checkpoint: blocks transactions, forces the log,
    /// flushes every dirty page, and unblocks.
    pub fn checkpoint(&self) -> EngineResult<()> {
        self.checkpoints.checkpoint(&self.log, &self.pool)?;
        Ok(())
    }

    /// Stops the flush thread and flushes the pool. The engine stays
    /// usable for unlogged reads afterwards.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.log.stop_flush_thread()?;
        self.pool.flush_all_pages()?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("log", &self.log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_and_shutdown() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("test.db"), EngineConfig::default()).unwrap();
        assert!(engine.log().is_enabled());
        engine.shutdown().unwrap();
        assert!(!engine.log().is_enabled());
    }

    #[test]
    fn test_txn_ids_are_distinct() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(
            dir.path().join("test.db"),
            EngineConfig::default().with_logging(false),
        )
        .unwrap();

        let t1 = engine.begin_transaction().unwrap();
        let t2 = engine.begin_transaction().unwrap();
        assert_ne!(t1.id(), t2.id());
    }

    #[test]
    fn test_unlogged_engine_accepts_work() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(
            dir.path().join("test.db"),
            EngineConfig::default().with_logging(false),
        )
        .unwrap();

        let txn = engine.begin_transaction().unwrap();
        let table = engine.create_table(&txn).unwrap();
        let rid = table
            .insert_tuple(txn.id(), &quarry_storage::page::Tuple::from(&b"x"[..]))
            .unwrap();
        engine.commit(txn).unwrap();

        assert!(table.get_tuple(rid).unwrap().is_some());
    }
}
