//! Buffer frame - a slot in the buffer pool that holds a page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use quarry_common::types::{Lsn, PageId};

/// Frame identifier - index into the buffer pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for FrameId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

/// A buffer frame holds a single page in memory.
///
/// The page data sits behind a reader-writer latch that doubles as the
/// per-page latch consumers take while reading or mutating the page. The
/// metadata (resident page id, pin count, dirty flag, LSN mirror) is
/// atomic so the pool can inspect frames without the data latch.
///
/// The LSN mirror tracks the page LSN of the buffered image for the
/// WAL-before-data check; pages that are never logged leave it invalid.
pub struct BufferFrame {
    /// Frame ID (index in the frame array).
    frame_id: FrameId,
    /// Page data buffer; the lock is the per-page latch.
    data: RwLock<Box<[u8]>>,
    /// Page ID stored in this frame (INVALID if empty).
    page_id: AtomicU32,
    /// Pin count (number of active users).
    pin_count: AtomicU32,
    /// Whether the page was modified since it was last written out.
    dirty: AtomicBool,
    /// Page LSN of the buffered image.
    lsn: AtomicU32,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId, page_size: usize) -> Self {
        Self {
            frame_id,
            data: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            lsn: AtomicU32::new(Lsn::INVALID.as_u32()),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID stored in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Sets the page ID for this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns true if no page is resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count, returning the new value, or `None` if
    /// the count was already zero.
    #[inline]
    pub fn try_unpin(&self) -> Option<u32> {
        let mut current = self.pin_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.pin_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current - 1),
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns true if the frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Returns the page LSN mirror.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new(self.lsn.load(Ordering::Acquire))
    }

    /// Sets the page LSN mirror.
    #[inline]
    pub fn set_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn.as_u32(), Ordering::Release);
    }

    /// Takes the page latch in shared mode.
    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Takes the page latch in exclusive mode.
    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Resets the frame to the empty state. The data buffer is left as-is;
    /// the next occupant zeroes or overwrites it.
    pub fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.lsn.store(Lsn::INVALID.as_u32(), Ordering::Release);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("lsn", &self.lsn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_frame_is_empty_clean_unpinned() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.lsn().is_valid());
    }

    #[test]
    fn test_pin_unpin() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.try_unpin(), Some(1));
        assert_eq!(frame.try_unpin(), Some(0));
        assert_eq!(frame.try_unpin(), None);
    }

    #[test]
    fn test_reset() {
        let frame = BufferFrame::new(FrameId::new(3), 4096);
        frame.set_page_id(PageId::new(42));
        frame.pin();
        frame.set_dirty(true);
        frame.set_lsn(Lsn::new(10));

        frame.reset();

        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.lsn().is_valid());
    }

    #[test]
    fn test_data_latch() {
        let frame = BufferFrame::new(FrameId::new(0), 4096);
        {
            let mut data = frame.write_data();
            data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        let data = frame.read_data();
        assert_eq!(&data[0..4], &[1, 2, 3, 4]);
    }
}
