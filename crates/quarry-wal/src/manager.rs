//! Log manager.
//!
//! Records are appended into an *active* buffer; a dedicated flush thread
//! swaps it with a *flush* buffer and hands the latter to the disk
//! manager in a single write. The thread wakes on a timeout, on the
//! active buffer running out of room, or on an explicit force (commit,
//! abort, or the buffer pool about to evict a page whose LSN is not yet
//! durable). Commits waiting on the same flush pass ride one disk sync:
//! group commit.
//!
//! LSNs are assigned under the manager's latch, so append order, LSN
//! order, and buffer order all agree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use quarry_common::types::{Lsn, PageId, Rid, TxnId};
use quarry_storage::disk::DiskManager;
use quarry_storage::page::Tuple;
use quarry_storage::WalBarrier;

use crate::error::{WalError, WalResult};
use crate::record::{LogPayload, LogRecord};

/// Log manager statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStats {
    /// Records appended.
    pub records: u64,
    /// Bytes appended.
    pub bytes: u64,
    /// Flush passes that reached disk.
    pub flushes: u64,
}

/// The two swap buffers, plus the counters that must change under the
/// same latch as the buffer contents.
struct LogBuffers {
    active: Vec<u8>,
    flush: Vec<u8>,
    /// Next LSN to assign.
    next_lsn: Lsn,
    /// LSN of the most recently appended record.
    last_lsn: Lsn,
}

struct LogCore {
    buffers: Mutex<LogBuffers>,
    /// Wakes the flush thread (flush-wait).
    flush_cv: Condvar,
    /// Wakes appenders blocked on buffer space and callers waiting for a
    /// flush pass to complete (append-wait).
    append_cv: Condvar,
    /// Set when someone wants a flush now; cleared by the flush thread
    /// after each pass.
    needs_flush: AtomicBool,
    /// Highest LSN durably on disk; `Lsn::INVALID` until the first flush.
    persistent_lsn: AtomicU32,
    /// Whether logging is enabled (the flush thread is running).
    enabled: AtomicBool,
    /// Flush-thread sleep interval in milliseconds; runtime-mutable.
    timeout_ms: AtomicU64,
    capacity: usize,
    disk: Arc<DiskManager>,
    records: AtomicU64,
    bytes: AtomicU64,
    flushes: AtomicU64,
}

impl LogCore {
    /// One flush pass: swap the buffers, write the flush buffer out, and
    /// advance the persistent LSN to the last LSN appended before the
    /// swap. Called with the buffer latch held.
    fn flush_pass(&self, buffers: &mut LogBuffers) -> WalResult<()> {
        if buffers.active.is_empty() {
            return Ok(());
        }
        std::mem::swap(&mut buffers.active, &mut buffers.flush);
        let durable_up_to = buffers.last_lsn;

        self.disk.write_log(&buffers.flush)?;
        buffers.flush.clear();

        self.persistent_lsn
            .store(durable_up_to.as_u32(), Ordering::Release);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(persistent_lsn = %durable_up_to, "log flushed");
        Ok(())
    }
}

/// The write-ahead log manager.
pub struct LogManager {
    core: Arc<LogCore>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    /// Per-transaction last LSN, the tail of each open log chain.
    txn_last_lsn: Mutex<HashMap<TxnId, Lsn>>,
}

impl LogManager {
    /// Creates a log manager over `disk` with the given per-buffer
    /// capacity and flush timeout. Logging starts disabled; call
    /// [`LogManager::run_flush_thread`] to enable it.
    pub fn new(disk: Arc<DiskManager>, buffer_capacity: usize, timeout: Duration) -> Self {
        Self {
            core: Arc::new(LogCore {
                buffers: Mutex::new(LogBuffers {
                    active: Vec::with_capacity(buffer_capacity),
                    flush: Vec::with_capacity(buffer_capacity),
                    next_lsn: Lsn::FIRST,
                    last_lsn: Lsn::INVALID,
                }),
                flush_cv: Condvar::new(),
                append_cv: Condvar::new(),
                needs_flush: AtomicBool::new(false),
                persistent_lsn: AtomicU32::new(Lsn::INVALID.as_u32()),
                enabled: AtomicBool::new(false),
                timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
                capacity: buffer_capacity,
                disk,
                records: AtomicU64::new(0),
                bytes: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
            }),
            flush_thread: Mutex::new(None),
            txn_last_lsn: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if logging is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::Acquire)
    }

    /// Highest LSN durably on disk, `Lsn::INVALID` before the first flush.
    #[inline]
    pub fn persistent_lsn(&self) -> Lsn {
        Lsn::new(self.core.persistent_lsn.load(Ordering::Acquire))
    }

    /// LSN of the most recently appended record.
    pub fn last_lsn(&self) -> Lsn {
        self.core.buffers.lock().last_lsn
    }

    /// Resumes LSN assignment at `next_lsn`.
    ///
    /// Called once after recovery, before logging is enabled, so records
    /// appended to the surviving log file stay above every LSN already
    /// stamped on disk pages.
    pub fn resume_from(&self, next_lsn: Lsn) {
        debug_assert!(!self.is_enabled());
        let mut buffers = self.core.buffers.lock();
        debug_assert!(buffers.active.is_empty() && !buffers.last_lsn.is_valid());
        buffers.next_lsn = next_lsn;
    }

    /// Changes the flush-thread sleep interval. Takes effect on the next
    /// wait.
    pub fn set_log_timeout(&self, timeout: Duration) {
        self.core
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Release);
    }

    /// Returns a snapshot of the log statistics.
    pub fn stats(&self) -> LogStats {
        LogStats {
            records: self.core.records.load(Ordering::Relaxed),
            bytes: self.core.bytes.load(Ordering::Relaxed),
            flushes: self.core.flushes.load(Ordering::Relaxed),
        }
    }

    /// Starts the flush thread and enables logging. No-op if already
    /// running.
    pub fn run_flush_thread(&self) {
        if self.core.enabled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("log flush thread starting");

        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name("quarry-log-flush".to_string())
            .spawn(move || {
                while core.enabled.load(Ordering::Acquire) {
                    let mut buffers = core.buffers.lock();
                    if !core.needs_flush.load(Ordering::Acquire) {
                        let timeout =
                            Duration::from_millis(core.timeout_ms.load(Ordering::Acquire));
                        core.flush_cv.wait_for(&mut buffers, timeout);
                    }

                    if let Err(e) = core.flush_pass(&mut buffers) {
                        // An unwritable log is fatal for durability;
                        // surface it loudly and stop claiming progress.
                        tracing::warn!(error = %e, "log flush failed");
                    }
                    core.needs_flush.store(false, Ordering::Release);
                    core.append_cv.notify_all();
                }
            })
            .expect("failed to spawn log flush thread");

        *self.flush_thread.lock() = Some(handle);
    }

    /// Requests a forced flush, disables logging, and joins the flush
    /// thread. Any bytes still buffered are written out synchronously, so
    /// both buffers end empty.
    pub fn stop_flush_thread(&self) -> WalResult<()> {
        if !self.core.enabled.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let _buffers = self.core.buffers.lock();
            self.core.needs_flush.store(true, Ordering::Release);
            self.core.flush_cv.notify_one();
        }
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }

        // The thread may have observed the cleared flag before flushing;
        // drain whatever is left and release anyone still parked on the
        // append condvar.
        let mut buffers = self.core.buffers.lock();
        self.core.flush_pass(&mut buffers)?;
        debug_assert!(buffers.active.is_empty());
        debug_assert!(buffers.flush.is_empty());
        self.core.needs_flush.store(false, Ordering::Release);
        self.core.append_cv.notify_all();
        tracing::info!("log flush thread stopped");
        Ok(())
    }

    /// Appends `record`, assigning its LSN. Blocks while the active
    /// buffer has no room, after signalling the flush thread.
    pub fn append(&self, record: &mut LogRecord) -> WalResult<Lsn> {
        let size = record.size();
        if size > self.core.capacity {
            return Err(WalError::RecordTooLarge {
                size,
                capacity: self.core.capacity,
            });
        }

        let mut buffers = self.core.buffers.lock();
        while buffers.active.len() + size > self.core.capacity {
            self.core.needs_flush.store(true, Ordering::Release);
            self.core.flush_cv.notify_one();
            self.core.append_cv.wait(&mut buffers);
        }

        let lsn = buffers.next_lsn;
        buffers.next_lsn = lsn.next();
        record.header.lsn = lsn;
        record.serialize(&mut buffers.active);
        buffers.last_lsn = lsn;

        self.core.records.fetch_add(1, Ordering::Relaxed);
        self.core.bytes.fetch_add(size as u64, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Requests a log flush.
    ///
    /// With `force`, the flush thread is woken immediately and the call
    /// returns once that pass completes. Without it, the call simply
    /// waits out one flush pass (timeout-driven), which is what group
    /// commit rides on.
    pub fn flush(&self, force: bool) {
        if !self.is_enabled() {
            return;
        }
        let mut buffers = self.core.buffers.lock();
        if force {
            self.core.needs_flush.store(true, Ordering::Release);
            self.core.flush_cv.notify_one();
            while self.core.needs_flush.load(Ordering::Acquire) && self.is_enabled() {
                self.core.append_cv.wait(&mut buffers);
            }
        } else {
            self.core.append_cv.wait(&mut buffers);
        }
    }

    /// Blocks until every record up to `lsn` is durable.
    pub fn wait_durable(&self, lsn: Lsn) {
        while self.is_enabled() && !self.is_durable(lsn) {
            self.flush(false);
        }
    }

    /// Returns true if `lsn` is covered by the persistent LSN.
    pub fn is_durable(&self, lsn: Lsn) -> bool {
        let persistent = self.persistent_lsn();
        persistent.is_valid() && persistent >= lsn
    }

    // ---------------------------------------------------------------------
    // Transaction-chain append helpers
    // ---------------------------------------------------------------------

    /// Appends BEGIN for `txn_id`, opening its log chain.
    pub fn begin(&self, txn_id: TxnId) -> WalResult<Lsn> {
        self.check_enabled()?;
        let mut record = LogRecord::begin(txn_id);
        let lsn = self.append(&mut record)?;
        self.txn_last_lsn.lock().insert(txn_id, lsn);
        Ok(lsn)
    }

    /// Appends COMMIT, closes the chain, and waits for group commit: the
    /// call returns only once the commit record is durable.
    pub fn commit(&self, txn_id: TxnId) -> WalResult<Lsn> {
        let lsn = self.append_closing(txn_id, LogPayload::Commit)?;
        self.wait_durable(lsn);
        Ok(lsn)
    }

    /// Appends ABORT, closes the chain, and waits for durability like
    /// commit does.
    pub fn abort(&self, txn_id: TxnId) -> WalResult<Lsn> {
        let lsn = self.append_closing(txn_id, LogPayload::Abort)?;
        self.wait_durable(lsn);
        Ok(lsn)
    }

    /// Appends an INSERT record to `txn_id`'s chain.
    pub fn log_insert(&self, txn_id: TxnId, rid: Rid, tuple: Tuple) -> WalResult<Lsn> {
        self.append_chained(txn_id, LogPayload::Insert { rid, tuple })
    }

    /// Appends a MARKDELETE record to `txn_id`'s chain.
    pub fn log_mark_delete(&self, txn_id: TxnId, rid: Rid, tuple: Tuple) -> WalResult<Lsn> {
        self.append_chained(txn_id, LogPayload::MarkDelete { rid, tuple })
    }

    /// Appends an APPLYDELETE record to `txn_id`'s chain.
    pub fn log_apply_delete(&self, txn_id: TxnId, rid: Rid, tuple: Tuple) -> WalResult<Lsn> {
        self.append_chained(txn_id, LogPayload::ApplyDelete { rid, tuple })
    }

    /// Appends a ROLLBACKDELETE record to `txn_id`'s chain.
    pub fn log_rollback_delete(&self, txn_id: TxnId, rid: Rid, tuple: Tuple) -> WalResult<Lsn> {
        self.append_chained(txn_id, LogPayload::RollbackDelete { rid, tuple })
    }

    /// Appends an UPDATE record to `txn_id`'s chain.
    pub fn log_update(
        &self,
        txn_id: TxnId,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> WalResult<Lsn> {
        self.append_chained(
            txn_id,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    /// Appends a NEWPAGE record to `txn_id`'s chain.
    pub fn log_new_page(
        &self,
        txn_id: TxnId,
        prev_page_id: PageId,
        page_id: PageId,
    ) -> WalResult<Lsn> {
        self.append_chained(
            txn_id,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    fn append_chained(&self, txn_id: TxnId, payload: LogPayload) -> WalResult<Lsn> {
        self.check_enabled()?;
        let mut chains = self.txn_last_lsn.lock();
        let prev_lsn = *chains
            .get(&txn_id)
            .ok_or(WalError::UnknownTransaction { txn_id })?;

        let mut record = LogRecord::new(txn_id, prev_lsn, payload);
        let lsn = self.append(&mut record)?;
        chains.insert(txn_id, lsn);
        Ok(lsn)
    }

    fn append_closing(&self, txn_id: TxnId, payload: LogPayload) -> WalResult<Lsn> {
        self.check_enabled()?;
        let mut chains = self.txn_last_lsn.lock();
        let prev_lsn = chains
            .remove(&txn_id)
            .ok_or(WalError::UnknownTransaction { txn_id })?;

        let mut record = LogRecord::new(txn_id, prev_lsn, payload);
        self.append(&mut record)
    }

    fn check_enabled(&self) -> WalResult<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(WalError::LoggingDisabled)
        }
    }
}

impl WalBarrier for LogManager {
    fn persistent_lsn(&self) -> Lsn {
        LogManager::persistent_lsn(self)
    }

    fn ensure_durable(&self, lsn: Lsn) {
        if !self.is_enabled() || self.is_durable(lsn) {
            return;
        }
        tracing::debug!(%lsn, "eviction forcing log flush");
        while self.is_enabled() && !self.is_durable(lsn) {
            self.flush(true);
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let _ = self.stop_flush_thread();
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("enabled", &self.is_enabled())
            .field("persistent_lsn", &self.persistent_lsn())
            .finish()
    }
}
