//! Buffer pool manager.
//!
//! The pool maps page ids to a fixed array of frames, pins frames while
//! they are in use, and evicts unpinned frames through the Clock replacer
//! when room is needed. Victims are always taken from the free list
//! first.
//!
//! Eviction discipline: the new mapping is installed and the frame's page
//! latch is acquired while the page table latch is still held; all disk
//! I/O then happens under the frame latch alone, so the global latch is
//! never held across a syscall. A concurrent fetch of the incoming page
//! finds the mapping, pins the frame, and blocks on the page latch until
//! the content is ready.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use quarry_common::types::PageId;

use super::clock::ClockReplacer;
use super::error::BufferResult;
use super::frame::{BufferFrame, FrameId};
use super::{BufferError, WalBarrier};
use crate::disk::DiskManager;

/// Point-in-time counters for the buffer pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    /// Page fetches served from memory.
    pub hits: u64,
    /// Page fetches that went to disk.
    pub misses: u64,
    /// Frames evicted to make room.
    pub evictions: u64,
    /// Pages written out (flush or eviction).
    pub writes: u64,
}

/// The buffer pool manager.
pub struct BufferPool {
    pool_size: usize,
    frames: Vec<Arc<BufferFrame>>,
    /// Page table: page id -> frame index. A page id is present iff some
    /// frame holds it.
    page_table: RwLock<HashMap<PageId, FrameId>>,
    /// Frames holding no page. Disjoint from the page table's range.
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: ClockReplacer,
    disk: Arc<DiskManager>,
    /// Log manager seam for the WAL-before-data rule; absent when logging
    /// is disabled.
    wal: RwLock<Option<Arc<dyn WalBarrier>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

impl BufferPool {
    /// Creates a buffer pool with `pool_size` frames over `disk`.
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");

        let page_size = quarry_common::constants::PAGE_SIZE;
        let frames = (0..pool_size)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i), page_size)))
            .collect();
        let free_list = (0..pool_size).map(FrameId::new).collect();

        Self {
            pool_size,
            frames,
            page_table: RwLock::new(HashMap::with_capacity(pool_size)),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(pool_size),
            disk,
            wal: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Attaches the log manager used for the WAL-before-data rule.
    pub fn set_wal(&self, wal: Arc<dyn WalBarrier>) {
        *self.wal.write() = Some(wal);
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocates a fresh disk page and pins it in a frame.
    ///
    /// The frame is zeroed and marked dirty (the page has no on-disk image
    /// yet). Fails with [`BufferError::PoolExhausted`] iff every frame is
    /// pinned; no page id is consumed in that case.
    pub fn new_page(&self) -> BufferResult<(PageId, Arc<BufferFrame>)> {
        let mut table = self.page_table.write();
        let frame_id = self.take_candidate(&mut table)?;
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        let page_id = self.disk.allocate_page();

        // Frame latch before the table latch drops; I/O happens under it.
        let mut data = frame.write_data();
        let evicted = self.retarget(&mut table, &frame, page_id);
        frame.set_dirty(true);
        drop(table);

        if let Some((old_id, old_lsn)) = evicted {
            self.wal_barrier(old_lsn);
            self.disk.write_page(old_id, &data)?;
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        data.fill(0);
        drop(data);

        Ok((page_id, frame))
    }

    /// Fetches page `page_id`, pinning its frame.
    ///
    /// Fails with [`BufferError::PoolExhausted`] iff the page is not
    /// resident and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<BufferFrame>> {
        {
            let table = self.page_table.read();
            if let Some(&frame_id) = table.get(&page_id) {
                let frame = Arc::clone(&self.frames[frame_id.index()]);
                frame.pin();
                self.replacer.pin(frame_id);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }
        }

        let mut table = self.page_table.write();
        // Someone may have brought the page in while we upgraded.
        if let Some(&frame_id) = table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id.index()]);
            frame.pin();
            self.replacer.pin(frame_id);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame);
        }

        let frame_id = self.take_candidate(&mut table)?;
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        let mut data = frame.write_data();
        let evicted = self.retarget(&mut table, &frame, page_id);
        frame.set_dirty(false);
        drop(table);

        if let Some((old_id, old_lsn)) = evicted {
            self.wal_barrier(old_lsn);
            self.disk.write_page(old_id, &data)?;
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        self.disk.read_page(page_id, &mut data)?;
        drop(data);

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    /// Releases one pin on `page_id`, OR-ing `dirty` into the frame's
    /// dirty flag.
    ///
    /// Returns false if the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let table = self.page_table.read();
        let Some(&frame_id) = table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];

        // OR-merge: a clean unpin must never clear an earlier dirty one.
        if dirty {
            frame.set_dirty(true);
        }

        match frame.try_unpin() {
            None => false,
            Some(0) => {
                self.replacer.unpin(frame_id);
                true
            }
            Some(_) => true,
        }
    }

    /// Writes `page_id` out if it is resident and dirty.
    ///
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<bool> {
        let table = self.page_table.read();
        let Some(&frame_id) = table.get(&page_id) else {
            return Ok(false);
        };
        let frame = Arc::clone(&self.frames[frame_id.index()]);
        let data = frame.read_data();
        drop(table);

        if frame.is_dirty() {
            self.wal_barrier(frame.lsn());
            self.disk.write_page(page_id, &data)?;
            frame.set_dirty(false);
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(true)
    }

    /// Deletes `page_id`.
    ///
    /// Returns false if the page is resident and pinned. A non-resident
    /// page is simply deallocated on disk.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        let mut table = self.page_table.write();
        let Some(&frame_id) = table.get(&page_id) else {
            self.disk.deallocate_page(page_id);
            return Ok(true);
        };
        let frame = &self.frames[frame_id.index()];
        if frame.is_pinned() {
            return Ok(false);
        }

        table.remove(&page_id);
        self.replacer.pin(frame_id);
        frame.reset();
        self.free_list.lock().push_back(frame_id);
        self.disk.deallocate_page(page_id);
        Ok(true)
    }

    /// Flushes every dirty resident page.
    pub fn flush_all_pages(&self) -> BufferResult<()> {
        let resident: Vec<PageId> = self.page_table.read().keys().copied().collect();
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Returns true if `page_id` is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.read().contains_key(&page_id)
    }

    /// Number of resident pages.
    pub fn resident_pages(&self) -> usize {
        self.page_table.read().len()
    }

    /// Number of frames in the free list.
    pub fn free_frames(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Number of victim-eligible frames in the replacer.
    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    /// Number of resident pages whose frame is dirty.
    pub fn dirty_pages(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| !f.is_empty() && f.is_dirty())
            .count()
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Picks the frame a new occupant will use: free list first, then a
    /// clock victim. Caller holds the page table write latch.
    fn take_candidate(
        &self,
        _table: &mut HashMap<PageId, FrameId>,
    ) -> BufferResult<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }
        self.replacer.victim().ok_or(BufferError::PoolExhausted)
    }

    /// Re-points `frame` at `page_id` in the page table, pinning it for
    /// the caller. Returns the evicted (page id, page LSN) if the frame
    /// held a dirty page that must be written back first.
    fn retarget(
        &self,
        table: &mut HashMap<PageId, FrameId>,
        frame: &BufferFrame,
        page_id: PageId,
    ) -> Option<(PageId, quarry_common::types::Lsn)> {
        let old_page_id = frame.page_id();
        let evicted = if old_page_id.is_valid() {
            table.remove(&old_page_id);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(old = %old_page_id, new = %page_id, "evicting page");
            frame.is_dirty().then(|| (old_page_id, frame.lsn()))
        } else {
            None
        };

        table.insert(page_id, frame.frame_id());
        frame.set_page_id(page_id);
        frame.set_lsn(quarry_common::types::Lsn::INVALID);
        frame.pin_count_reset_to_one();
        evicted
    }

    /// Applies the WAL-before-data rule for a page about to be written.
    fn wal_barrier(&self, page_lsn: quarry_common::types::Lsn) {
        if !page_lsn.is_valid() {
            return;
        }
        let wal = self.wal.read();
        if let Some(wal) = wal.as_ref() {
            let persistent = wal.persistent_lsn();
            if !persistent.is_valid() || persistent < page_lsn {
                wal.ensure_durable(page_lsn);
            }
        }
    }
}

impl BufferFrame {
    /// Sets the pin count to exactly one. Only the pool calls this, while
    /// it holds the table latch and the frame is unreachable (freshly
    /// taken from the free list or the replacer).
    fn pin_count_reset_to_one(&self) {
        debug_assert_eq!(self.pin_count(), 0);
        self.pin();
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("pool_size", &self.pool_size)
            .field("resident", &self.resident_pages())
            .field("free", &self.free_frames())
            .field("replacer", &self.replacer_size())
            .finish()
    }
}
