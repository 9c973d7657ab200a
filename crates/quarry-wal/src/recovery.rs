//! Log recovery: redo and undo passes.
//!
//! Invoked at startup with logging disabled. The redo pass scans the log
//! file from offset 0, rebuilding the active-transaction table and an
//! LSN-to-offset index, and replays every mutation whose LSN is newer
//! than the target page's LSN. The undo pass then walks each still-open
//! transaction's chain backwards and applies compensations
//! unconditionally.
//!
//! A record that fails deserialization ends the redo scan: everything
//! from that offset on is treated as an incomplete tail.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_common::types::{Lsn, PageId, TxnId};
use quarry_storage::buffer::BufferFrame;
use quarry_storage::disk::DiskManager;
use quarry_storage::page::TablePage;
use quarry_storage::BufferPool;

use crate::error::WalResult;
use crate::record::{LogPayload, LogRecord, RecordType};

/// ARIES-style redo/undo recovery over one log file.
pub struct LogRecovery {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    /// Transactions with no COMMIT/ABORT seen, mapped to their last LSN.
    active_txn: HashMap<TxnId, Lsn>,
    /// Byte offset of every record seen during redo, for the undo walk.
    lsn_offsets: HashMap<Lsn, u64>,
    /// Highest LSN seen during the scan.
    max_lsn: Lsn,
    /// Read-ahead buffer for the log file.
    buffer: Vec<u8>,
    /// Scan position in the log file.
    offset: u64,
}

impl LogRecovery {
    /// Creates a recovery run reading the log in `buffer_size`-byte
    /// chunks.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>, buffer_size: usize) -> Self {
        Self {
            disk,
            pool,
            active_txn: HashMap::new(),
            lsn_offsets: HashMap::new(),
            max_lsn: Lsn::INVALID,
            buffer: vec![0u8; buffer_size],
            offset: 0,
        }
    }

    /// Transactions still open when the scan ended (the losers).
    pub fn active_transactions(&self) -> &HashMap<TxnId, Lsn> {
        &self.active_txn
    }

    /// Highest LSN the redo scan saw, `Lsn::INVALID` for an empty log.
    ///
    /// The log manager resumes assignment past this so new records never
    /// compare below the stamps already on disk.
    pub fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }

    /// Redo pass: replay every mutation the on-disk pages have not seen.
    pub fn redo(&mut self) -> WalResult<()> {
        let mut mutations = 0u64;
        loop {
            let read = self.disk.read_log(&mut self.buffer, self.offset)?;
            if read == 0 {
                break;
            }

            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&self.buffer[pos..read]) {
                let lsn = record.lsn();
                let txn_id = record.txn_id();

                match record.record_type() {
                    RecordType::Commit | RecordType::Abort => {
                        self.active_txn.remove(&txn_id);
                    }
                    _ => {
                        self.active_txn.insert(txn_id, lsn);
                    }
                }
                self.lsn_offsets.insert(lsn, self.offset + pos as u64);
                if !self.max_lsn.is_valid() || lsn > self.max_lsn {
                    self.max_lsn = lsn;
                }
                pos += record.size();

                if record.record_type().is_mutation() {
                    self.redo_record(&record)?;
                    mutations += 1;
                }
            }

            if pos == 0 {
                // Nothing parseable at this offset: incomplete tail.
                break;
            }
            self.offset += pos as u64;
        }

        tracing::info!(
            scanned_bytes = self.offset,
            mutations,
            open_txns = self.active_txn.len(),
            "redo pass complete"
        );
        Ok(())
    }

    /// Undo pass: roll back every transaction left open by the redo pass.
    ///
    /// Returns the rolled-back transactions with their last LSNs so the
    /// caller can close their chains with ABORT records.
    pub fn undo(&mut self) -> WalResult<Vec<(TxnId, Lsn)>> {
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();

        for &(txn_id, last_lsn) in &losers {
            tracing::info!(%txn_id, %last_lsn, "rolling back transaction");
            let mut lsn = last_lsn;
            while lsn.is_valid() {
                let record = self.read_record_at(lsn)?;
                debug_assert_eq!(record.lsn(), lsn);
                self.undo_record(&record)?;
                lsn = record.prev_lsn();
            }
        }

        self.active_txn.clear();
        self.lsn_offsets.clear();
        Ok(losers)
    }

    /// Re-reads the record with `lsn` through the offset index.
    fn read_record_at(&mut self, lsn: Lsn) -> WalResult<LogRecord> {
        let offset = *self
            .lsn_offsets
            .get(&lsn)
            .ok_or_else(|| crate::error::WalError::record_corrupt(0, format!("lsn {lsn} not indexed")))?;

        let read = self.disk.read_log(&mut self.buffer, offset)?;
        LogRecord::deserialize(&self.buffer[..read])
            .ok_or_else(|| crate::error::WalError::record_corrupt(offset, "undo re-read failed"))
    }

    /// Replays one mutation if the page has not seen it yet.
    fn redo_record(&self, record: &LogRecord) -> WalResult<()> {
        let lsn = record.lsn();
        match &record.payload {
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                let redone = self.with_page(*page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.init(*page_id, *prev_page_id);
                    page.set_lsn(lsn);
                    true
                })?;

                // Stitch the chain: the predecessor may have been flushed
                // before it learned about its successor.
                if redone && prev_page_id.is_valid() {
                    self.with_page(*prev_page_id, |page| {
                        if page.next_page_id() == *page_id {
                            false
                        } else {
                            page.set_next_page_id(*page_id);
                            true
                        }
                    })?;
                }
            }
            LogPayload::Insert { rid, tuple } => {
                self.with_page(rid.page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.insert_tuple(tuple);
                    page.set_lsn(lsn);
                    true
                })?;
            }
            LogPayload::Update {
                rid,
                new_tuple,
                ..
            } => {
                self.with_page(rid.page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.update_tuple(rid.slot, new_tuple);
                    page.set_lsn(lsn);
                    true
                })?;
            }
            LogPayload::MarkDelete { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.mark_delete(rid.slot);
                    page.set_lsn(lsn);
                    true
                })?;
            }
            LogPayload::ApplyDelete { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.apply_delete(rid.slot);
                    page.set_lsn(lsn);
                    true
                })?;
            }
            LogPayload::RollbackDelete { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    if !needs_redo(page.lsn(), lsn) {
                        return false;
                    }
                    page.rollback_delete(rid.slot);
                    page.set_lsn(lsn);
                    true
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies the compensation for one record of a losing transaction.
    ///
    /// Compensations are applied unconditionally; the page-LSN gate only
    /// exists in the redo pass.
    fn undo_record(&self, record: &LogRecord) -> WalResult<()> {
        match &record.payload {
            LogPayload::Begin => {
                debug_assert!(!record.prev_lsn().is_valid());
            }
            LogPayload::Commit | LogPayload::Abort => {
                debug_assert!(false, "finished transaction in undo");
            }
            // Page allocation is not undone.
            LogPayload::NewPage { .. } => {}
            LogPayload::Insert { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    page.apply_delete(rid.slot);
                    true
                })?;
            }
            LogPayload::Update {
                rid, old_tuple, ..
            } => {
                self.with_page(rid.page_id, |page| {
                    page.update_tuple(rid.slot, old_tuple);
                    true
                })?;
            }
            LogPayload::MarkDelete { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    page.rollback_delete(rid.slot);
                    true
                })?;
            }
            LogPayload::ApplyDelete { rid, tuple } => {
                self.with_page(rid.page_id, |page| {
                    page.insert_tuple(tuple);
                    true
                })?;
            }
            LogPayload::RollbackDelete { rid, .. } => {
                self.with_page(rid.page_id, |page| {
                    page.mark_delete(rid.slot);
                    true
                })?;
            }
        }
        Ok(())
    }

    /// Fetches a page, runs `f` on it under the page latch, and unpins it
    /// dirty iff `f` reported a modification.
    fn with_page<F>(&self, page_id: PageId, f: F) -> WalResult<bool>
    where
        F: FnOnce(&mut TablePage<'_>) -> bool,
    {
        let frame = self.pool.fetch_page(page_id)?;
        let dirty = {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            let dirty = f(&mut page);
            if dirty {
                sync_frame_lsn(&frame, &page);
            }
            dirty
        };
        self.pool.unpin_page(page_id, dirty);
        Ok(dirty)
    }
}

/// Redo is needed when the page has never been stamped or its LSN is
/// older than the record's.
fn needs_redo(page_lsn: Lsn, record_lsn: Lsn) -> bool {
    !page_lsn.is_valid() || page_lsn < record_lsn
}

fn sync_frame_lsn(frame: &Arc<BufferFrame>, page: &TablePage<'_>) {
    let lsn = page.lsn();
    if lsn.is_valid() {
        frame.set_lsn(lsn);
    }
}

/// What a completed recovery run leaves behind.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// Highest LSN found in the log; the log manager resumes past it.
    pub max_lsn: Lsn,
    /// Rolled-back transactions and their last LSNs. Their chains are
    /// still open in the log until ABORT records close them.
    pub losers: Vec<(TxnId, Lsn)>,
}

/// Convenience: full recovery (redo then undo) against a fresh pool.
pub fn recover(
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    buffer_size: usize,
) -> WalResult<RecoveryOutcome> {
    let mut recovery = LogRecovery::new(disk, pool, buffer_size);
    recovery.redo()?;
    let losers = recovery.undo()?;
    Ok(RecoveryOutcome {
        max_lsn: recovery.max_lsn(),
        losers,
    })
}
