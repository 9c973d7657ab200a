//! Logged table heap.
//!
//! A table heap is a doubly-linked chain of slotted pages. Every
//! mutation appends the matching log record before the caller releases
//! the page, stamps the record's LSN into the page header and the
//! frame's LSN mirror, and unpins dirty. With logging disabled the same
//! operations run bare.

use std::sync::Arc;

use quarry_common::constants::PAGE_SIZE;
use quarry_common::types::{PageId, Rid, TxnId};
use quarry_storage::buffer::BufferFrame;
use quarry_storage::page::{TablePage, Tuple};
use quarry_storage::BufferPool;
use quarry_wal::LogManager;

use crate::error::{EngineError, EngineResult};

/// Outcome of one page visit during an insert walk.
enum HeapStep {
    Done(Rid),
    Follow(PageId),
    Grown(PageId),
}

/// A chain of slotted pages holding one table's tuples.
pub struct TableHeap {
    pool: Arc<BufferPool>,
    log: Option<Arc<LogManager>>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Creates a heap with one empty page, logged against `txn_id`.
    pub fn create(
        pool: Arc<BufferPool>,
        log: Option<Arc<LogManager>>,
        txn_id: TxnId,
    ) -> EngineResult<Self> {
        let (first_page_id, frame) = pool.new_page()?;
        {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            page.init(first_page_id, PageId::INVALID);

            if let Some(log) = log.as_deref() {
                let lsn = log.log_new_page(txn_id, PageId::INVALID, first_page_id)?;
                page.set_lsn(lsn);
                frame.set_lsn(lsn);
            }
        }
        pool.unpin_page(first_page_id, true);

        Ok(Self {
            pool,
            log,
            first_page_id,
        })
    }

    /// Re-attaches to an existing heap rooted at `first_page_id`.
    pub fn open(
        pool: Arc<BufferPool>,
        log: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Self {
        Self {
            pool,
            log,
            first_page_id,
        }
    }

    /// The heap's first page.
    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts a tuple, extending the chain with a fresh page when no
    /// existing page has room.
    pub fn insert_tuple(&self, txn_id: TxnId, tuple: &Tuple) -> EngineResult<Rid> {
        if tuple.len() + 64 > PAGE_SIZE {
            return Err(EngineError::TupleTooLarge { size: tuple.len() });
        }

        let mut page_id = self.first_page_id;
        loop {
            let frame = self.pool.fetch_page(page_id)?;
            // One latch scope decides: insert here, follow the chain, or
            // grow it. Holding the tail latch across the growth keeps two
            // inserters from both linking a successor onto the same tail.
            let step = {
                let mut data = frame.write_data();
                let mut page = TablePage::new(&mut data);
                match page.insert_tuple(tuple) {
                    Some(slot) => {
                        let rid = Rid::new(page_id, slot);
                        self.stamp(&frame, &mut page, |log| {
                            log.log_insert(txn_id, rid, tuple.clone())
                        })?;
                        HeapStep::Done(rid)
                    }
                    None if page.next_page_id().is_valid() => {
                        HeapStep::Follow(page.next_page_id())
                    }
                    None => {
                        let new_page_id = self.extend(txn_id, page_id)?;
                        page.set_next_page_id(new_page_id);
                        HeapStep::Grown(new_page_id)
                    }
                }
            };

            match step {
                HeapStep::Done(rid) => {
                    self.pool.unpin_page(page_id, true);
                    return Ok(rid);
                }
                HeapStep::Follow(next) => {
                    self.pool.unpin_page(page_id, false);
                    page_id = next;
                }
                HeapStep::Grown(next) => {
                    self.pool.unpin_page(page_id, true);
                    page_id = next;
                }
            }
        }
    }

    /// Reads the tuple at `rid`; `None` if it is absent or mark-deleted.
    pub fn get_tuple(&self, rid: Rid) -> EngineResult<Option<Tuple>> {
        let frame = self.pool.fetch_page(rid.page_id)?;
        let tuple = {
            let mut data = frame.write_data();
            TablePage::new(&mut data).get_tuple(rid.slot)
        };
        self.pool.unpin_page(rid.page_id, false);
        Ok(tuple)
    }

    /// Marks the tuple at `rid` deleted.
    pub fn mark_delete(&self, txn_id: TxnId, rid: Rid) -> EngineResult<bool> {
        let frame = self.pool.fetch_page(rid.page_id)?;
        let marked = {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            if page.mark_delete(rid.slot) {
                self.stamp(&frame, &mut page, |log| {
                    log.log_mark_delete(txn_id, rid, Tuple::empty())
                })?;
                true
            } else {
                false
            }
        };
        self.pool.unpin_page(rid.page_id, marked);
        Ok(marked)
    }

    /// Rolls back a delete mark at `rid`.
    pub fn rollback_delete(&self, txn_id: TxnId, rid: Rid) -> EngineResult<bool> {
        let frame = self.pool.fetch_page(rid.page_id)?;
        let rolled = {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            if page.rollback_delete(rid.slot) {
                self.stamp(&frame, &mut page, |log| {
                    log.log_rollback_delete(txn_id, rid, Tuple::empty())
                })?;
                true
            } else {
                false
            }
        };
        self.pool.unpin_page(rid.page_id, rolled);
        Ok(rolled)
    }

    /// Physically removes the tuple at `rid`, logging its image so undo
    /// can re-insert it.
    pub fn apply_delete(&self, txn_id: TxnId, rid: Rid) -> EngineResult<()> {
        let frame = self.pool.fetch_page(rid.page_id)?;
        let removed = {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            match page.tuple_image(rid.slot) {
                Some(image) => {
                    if page.apply_delete(rid.slot) {
                        self.stamp(&frame, &mut page, |log| {
                            log.log_apply_delete(txn_id, rid, image.clone())
                        })?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        self.pool.unpin_page(rid.page_id, removed);
        if removed {
            Ok(())
        } else {
            Err(EngineError::TupleNotFound { rid })
        }
    }

    /// Replaces the tuple at `rid`, logging both images.
    pub fn update_tuple(&self, txn_id: TxnId, rid: Rid, new_tuple: &Tuple) -> EngineResult<bool> {
        let frame = self.pool.fetch_page(rid.page_id)?;
        let updated = {
            let mut data = frame.write_data();
            let mut page = TablePage::new(&mut data);
            match page.update_tuple(rid.slot, new_tuple) {
                Some(old_tuple) => {
                    self.stamp(&frame, &mut page, |log| {
                        log.log_update(txn_id, rid, old_tuple.clone(), new_tuple.clone())
                    })?;
                    true
                }
                None => false,
            }
        };
        self.pool.unpin_page(rid.page_id, updated);
        Ok(updated)
    }

    /// Collects every live tuple in chain order.
    pub fn scan(&self) -> EngineResult<Vec<(Rid, Tuple)>> {
        let mut result = Vec::new();
        let mut page_id = self.first_page_id;
        while page_id.is_valid() {
            let frame = self.pool.fetch_page(page_id)?;
            let next = {
                let mut data = frame.write_data();
                let page = TablePage::new(&mut data);
                for slot in 0..page.tuple_count() {
                    if let Some(tuple) = page.get_tuple(slot) {
                        result.push((Rid::new(page_id, slot), tuple));
                    }
                }
                page.next_page_id()
            };
            self.pool.unpin_page(page_id, false);
            page_id = next;
        }
        Ok(result)
    }

    /// Allocates and initializes a page chained after `tail_page_id`.
    /// The caller links the tail's next pointer.
    fn extend(&self, txn_id: TxnId, tail_page_id: PageId) -> EngineResult<PageId> {
        let (new_page_id, new_frame) = self.pool.new_page()?;
        {
            let mut data = new_frame.write_data();
            let mut page = TablePage::new(&mut data);
            page.init(new_page_id, tail_page_id);
            if let Some(log) = self.log.as_deref() {
                let lsn = log.log_new_page(txn_id, tail_page_id, new_page_id)?;
                page.set_lsn(lsn);
                new_frame.set_lsn(lsn);
            }
        }
        self.pool.unpin_page(new_page_id, true);
        Ok(new_page_id)
    }

    /// Appends the record produced by `append`, then stamps its LSN into
    /// the page header and the frame mirror.
    fn stamp<F>(
        &self,
        frame: &Arc<BufferFrame>,
        page: &mut TablePage<'_>,
        append: F,
    ) -> EngineResult<()>
    where
        F: FnOnce(&LogManager) -> quarry_wal::WalResult<quarry_common::types::Lsn>,
    {
        if let Some(log) = self.log.as_deref() {
            let lsn = append(log)?;
            page.set_lsn(lsn);
            frame.set_lsn(lsn);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TableHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHeap")
            .field("first_page_id", &self.first_page_id)
            .field("logged", &self.log.is_some())
            .finish()
    }
}
