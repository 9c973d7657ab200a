//! Slotted data page for variable-length tuples.
//!
//! # Page Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   page_id
//!   4       4   lsn
//!   8       4   prev_page_id
//!  12       4   next_page_id
//!  16       4   free_space_pointer (start of tuple data)
//!  20       4   tuple_count (slots ever created, live or not)
//!  24      ...  slot array, 8 bytes per slot, grows upward
//!  ...          free space
//!  ...          tuple bodies, grow downward from the page end
//! ```
//!
//! Each slot is `offset (4) || size (4)`. A slot whose offset and size are
//! both zero has been physically deleted and may be reused; the high bit of
//! the size field marks a tuple that is logically deleted but still
//! present (the mark/rollback/apply delete protocol).

use quarry_common::types::{Lsn, PageId};

use super::tuple::Tuple;

/// Byte offset of the page id field.
const OFFSET_PAGE_ID: usize = 0;
/// Byte offset of the LSN field.
const OFFSET_LSN: usize = 4;
const OFFSET_PREV_PAGE_ID: usize = 8;
const OFFSET_NEXT_PAGE_ID: usize = 12;
const OFFSET_FREE_SPACE_POINTER: usize = 16;
const OFFSET_TUPLE_COUNT: usize = 20;

/// Size of the page header in bytes.
pub const TABLE_PAGE_HEADER_SIZE: usize = 24;

/// Size of one slot array entry.
pub const SLOT_SIZE: usize = 8;

/// High bit of a slot's size field: tuple is mark-deleted.
const DELETE_MASK: u32 = 1 << 31;

/// View over a slotted data page.
pub struct TablePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePage<'a> {
    /// Creates a table page view into the given buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than the page header.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= TABLE_PAGE_HEADER_SIZE,
            "buffer too small for table page"
        );
        Self { data }
    }

    /// Initializes a fresh page.
    ///
    /// The LSN bytes are left as found (a zeroed page reads as LSN 0); the
    /// caller stamps the LSN once the allocation is logged.
    pub fn init(&mut self, page_id: PageId, prev_page_id: PageId) {
        self.write_u32(OFFSET_PAGE_ID, page_id.as_u32());
        self.write_u32(OFFSET_PREV_PAGE_ID, prev_page_id.as_u32());
        self.write_u32(OFFSET_NEXT_PAGE_ID, PageId::INVALID.as_u32());
        self.write_u32(OFFSET_FREE_SPACE_POINTER, self.data.len() as u32);
        self.write_u32(OFFSET_TUPLE_COUNT, 0);
    }

    /// Returns the page id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.read_u32(OFFSET_PAGE_ID))
    }

    /// Returns the page LSN.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new(self.read_u32(OFFSET_LSN))
    }

    /// Sets the page LSN.
    #[inline]
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.write_u32(OFFSET_LSN, lsn.as_u32());
    }

    /// Returns the previous page in the chain.
    #[inline]
    pub fn prev_page_id(&self) -> PageId {
        PageId::new(self.read_u32(OFFSET_PREV_PAGE_ID))
    }

    /// Sets the previous page in the chain.
    #[inline]
    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        self.write_u32(OFFSET_PREV_PAGE_ID, page_id.as_u32());
    }

    /// Returns the next page in the chain.
    #[inline]
    pub fn next_page_id(&self) -> PageId {
        PageId::new(self.read_u32(OFFSET_NEXT_PAGE_ID))
    }

    /// Sets the next page in the chain.
    #[inline]
    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.write_u32(OFFSET_NEXT_PAGE_ID, page_id.as_u32());
    }

    /// Number of slots ever created on this page.
    #[inline]
    pub fn tuple_count(&self) -> u32 {
        self.read_u32(OFFSET_TUPLE_COUNT)
    }

    /// Start of the tuple data region.
    #[inline]
    fn free_space_pointer(&self) -> usize {
        self.read_u32(OFFSET_FREE_SPACE_POINTER) as usize
    }

    fn set_free_space_pointer(&mut self, ptr: usize) {
        self.write_u32(OFFSET_FREE_SPACE_POINTER, ptr as u32);
    }

    /// Bytes between the end of the slot array and the tuple data.
    pub fn free_space(&self) -> usize {
        let slots_end = TABLE_PAGE_HEADER_SIZE + self.tuple_count() as usize * SLOT_SIZE;
        self.free_space_pointer().saturating_sub(slots_end)
    }

    /// Inserts a tuple, returning its slot number.
    ///
    /// Returns `None` if the tuple is empty or the page cannot fit it.
    /// Physically deleted slots are reused before the slot array grows.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Option<u32> {
        if tuple.is_empty() {
            return None;
        }

        let count = self.tuple_count();
        let recycled = (0..count).find(|&i| {
            let (offset, size) = self.slot(i);
            offset == 0 && size == 0
        });

        let needed = match recycled {
            Some(_) => tuple.len(),
            None => tuple.len() + SLOT_SIZE,
        };
        if self.free_space() < needed {
            return None;
        }

        let new_ptr = self.free_space_pointer() - tuple.len();
        self.data[new_ptr..new_ptr + tuple.len()].copy_from_slice(tuple.data());
        self.set_free_space_pointer(new_ptr);

        let slot = match recycled {
            Some(slot) => slot,
            None => {
                self.write_u32(OFFSET_TUPLE_COUNT, count + 1);
                count
            }
        };
        self.set_slot(slot, new_ptr as u32, tuple.len() as u32);
        Some(slot)
    }

    /// Reads the tuple in `slot`.
    ///
    /// Returns `None` for out-of-range, physically deleted, or
    /// mark-deleted slots.
    pub fn get_tuple(&self, slot: u32) -> Option<Tuple> {
        if slot >= self.tuple_count() {
            return None;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 || size & DELETE_MASK != 0 {
            return None;
        }
        let offset = offset as usize;
        Some(Tuple::from(&self.data[offset..offset + size as usize]))
    }

    /// Reads the payload in `slot` whether or not it is mark-deleted.
    ///
    /// Returns `None` only for out-of-range or physically deleted slots.
    /// This is what the apply-delete path logs so undo can re-insert the
    /// tuple.
    pub fn tuple_image(&self, slot: u32) -> Option<Tuple> {
        if slot >= self.tuple_count() {
            return None;
        }
        let (offset, raw_size) = self.slot(slot);
        if raw_size == 0 {
            return None;
        }
        let size = (raw_size & !DELETE_MASK) as usize;
        let offset = offset as usize;
        Some(Tuple::from(&self.data[offset..offset + size]))
    }

    /// Marks the tuple in `slot` as deleted without reclaiming space.
    ///
    /// Returns false if the slot holds no live, unmarked tuple.
    pub fn mark_delete(&mut self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 || size & DELETE_MASK != 0 {
            return false;
        }
        self.set_slot(slot, offset, size | DELETE_MASK);
        true
    }

    /// Clears a delete mark set by [`TablePage::mark_delete`].
    pub fn rollback_delete(&mut self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 {
            return false;
        }
        self.set_slot(slot, offset, size & !DELETE_MASK);
        true
    }

    /// Physically removes the tuple in `slot`, compacting the data region.
    ///
    /// Works on both marked and unmarked tuples; the slot becomes
    /// reusable. Returns false if the slot holds no tuple.
    pub fn apply_delete(&mut self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let (offset, raw_size) = self.slot(slot);
        let size = (raw_size & !DELETE_MASK) as usize;
        if raw_size == 0 {
            return false;
        }

        let offset = offset as usize;
        let free_ptr = self.free_space_pointer();

        // Close the gap: everything below the tuple slides up by its size.
        self.data.copy_within(free_ptr..offset, free_ptr + size);
        self.set_free_space_pointer(free_ptr + size);

        for i in 0..self.tuple_count() {
            if i == slot {
                continue;
            }
            let (other_offset, other_size) = self.slot(i);
            if other_size != 0 && (other_offset as usize) < offset {
                self.set_slot(i, other_offset + size as u32, other_size);
            }
        }
        self.set_slot(slot, 0, 0);
        true
    }

    /// Replaces the tuple in `slot` with `new_tuple`, returning the old one.
    ///
    /// Fails (returns `None`) on empty replacements, missing or
    /// mark-deleted tuples, and when a growing update does not fit.
    pub fn update_tuple(&mut self, slot: u32, new_tuple: &Tuple) -> Option<Tuple> {
        if new_tuple.is_empty() || slot >= self.tuple_count() {
            return None;
        }
        let (offset, raw_size) = self.slot(slot);
        if raw_size == 0 || raw_size & DELETE_MASK != 0 {
            return None;
        }

        let old_size = raw_size as usize;
        let new_size = new_tuple.len();
        if new_size > old_size && self.free_space() < new_size - old_size {
            return None;
        }

        let offset = offset as usize;
        let old = Tuple::from(&self.data[offset..offset + old_size]);

        // The tuple's end stays fixed; the region below it shifts by the
        // size delta, as does every slot offset inside that region.
        let free_ptr = self.free_space_pointer();
        let new_free_ptr = (free_ptr + old_size) - new_size;
        let new_offset = (offset + old_size) - new_size;
        self.data.copy_within(free_ptr..offset, new_free_ptr);
        self.set_free_space_pointer(new_free_ptr);

        for i in 0..self.tuple_count() {
            if i == slot {
                continue;
            }
            let (other_offset, other_size) = self.slot(i);
            if other_size != 0 && (other_offset as usize) < offset {
                let shifted = (other_offset as usize + old_size) - new_size;
                self.set_slot(i, shifted as u32, other_size);
            }
        }

        self.data[new_offset..new_offset + new_size].copy_from_slice(new_tuple.data());
        self.set_slot(slot, new_offset as u32, new_size as u32);
        Some(old)
    }

    #[inline]
    fn slot(&self, slot: u32) -> (u32, u32) {
        let base = TABLE_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
        (self.read_u32(base), self.read_u32(base + 4))
    }

    #[inline]
    fn set_slot(&mut self, slot: u32, offset: u32, size: u32) {
        let base = TABLE_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
        self.write_u32(base, offset);
        self.write_u32(base + 4, size);
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::constants::PAGE_SIZE;

    fn fresh_page(buf: &mut [u8]) -> TablePage<'_> {
        let mut page = TablePage::new(buf);
        page.init(PageId::new(1), PageId::INVALID);
        page
    }

    #[test]
    fn test_init() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let page = fresh_page(&mut buf);

        assert_eq!(page.page_id(), PageId::new(1));
        assert_eq!(page.lsn(), Lsn::new(0));
        assert!(!page.prev_page_id().is_valid());
        assert!(!page.next_page_id().is_valid());
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.free_space(), PAGE_SIZE - TABLE_PAGE_HEADER_SIZE);
    }

    #[test]
    fn test_insert_and_get() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let t1 = Tuple::from(&b"first"[..]);
        let t2 = Tuple::from(&b"second"[..]);
        let s1 = page.insert_tuple(&t1).unwrap();
        let s2 = page.insert_tuple(&t2).unwrap();

        assert_eq!(s1, 0);
        assert_eq!(s2, 1);
        assert_eq!(page.get_tuple(s1).unwrap(), t1);
        assert_eq!(page.get_tuple(s2).unwrap(), t2);
        assert_eq!(page.tuple_count(), 2);
    }

    #[test]
    fn test_insert_rejects_empty_and_oversized() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        assert!(page.insert_tuple(&Tuple::empty()).is_none());
        let huge = Tuple::from(vec![0u8; PAGE_SIZE]);
        assert!(page.insert_tuple(&huge).is_none());
    }

    #[test]
    fn test_mark_and_rollback_delete() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let slot = page.insert_tuple(&Tuple::from(&b"x"[..])).unwrap();
        assert!(page.mark_delete(slot));
        assert!(page.get_tuple(slot).is_none());
        // A second mark fails: the tuple is already marked.
        assert!(!page.mark_delete(slot));

        assert!(page.rollback_delete(slot));
        assert_eq!(page.get_tuple(slot).unwrap(), Tuple::from(&b"x"[..]));
    }

    #[test]
    fn test_apply_delete_compacts_and_recycles() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let a = Tuple::from(&b"aaaa"[..]);
        let b = Tuple::from(&b"bbbbbb"[..]);
        let c = Tuple::from(&b"cc"[..]);
        let sa = page.insert_tuple(&a).unwrap();
        let sb = page.insert_tuple(&b).unwrap();
        let sc = page.insert_tuple(&c).unwrap();

        let free_before = page.free_space();
        assert!(page.apply_delete(sb));
        assert_eq!(page.free_space(), free_before + b.len());

        // Neighbours survive the compaction.
        assert_eq!(page.get_tuple(sa).unwrap(), a);
        assert_eq!(page.get_tuple(sc).unwrap(), c);
        assert!(page.get_tuple(sb).is_none());

        // The freed slot is reused before the slot array grows.
        let d = Tuple::from(&b"dd"[..]);
        let sd = page.insert_tuple(&d).unwrap();
        assert_eq!(sd, sb);
        assert_eq!(page.tuple_count(), 3);
        assert_eq!(page.get_tuple(sd).unwrap(), d);
    }

    #[test]
    fn test_apply_delete_on_marked_tuple() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let slot = page.insert_tuple(&Tuple::from(&b"doomed"[..])).unwrap();
        assert!(page.mark_delete(slot));
        assert!(page.apply_delete(slot));
        assert!(page.get_tuple(slot).is_none());
    }

    #[test]
    fn test_update_same_size() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let slot = page.insert_tuple(&Tuple::from(&b"abcd"[..])).unwrap();
        let old = page.update_tuple(slot, &Tuple::from(&b"wxyz"[..])).unwrap();
        assert_eq!(old, Tuple::from(&b"abcd"[..]));
        assert_eq!(page.get_tuple(slot).unwrap(), Tuple::from(&b"wxyz"[..]));
    }

    #[test]
    fn test_update_resizes_and_shifts_neighbours() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let a = Tuple::from(&b"aaaa"[..]);
        let b = Tuple::from(&b"bb"[..]);
        let sa = page.insert_tuple(&a).unwrap();
        let sb = page.insert_tuple(&b).unwrap();

        // Grow the first tuple; the second one sits below it and must move.
        let grown = Tuple::from(&b"aaaaaaaa"[..]);
        let old = page.update_tuple(sa, &grown).unwrap();
        assert_eq!(old, a);
        assert_eq!(page.get_tuple(sa).unwrap(), grown);
        assert_eq!(page.get_tuple(sb).unwrap(), b);

        // Shrink it back.
        let shrunk = Tuple::from(&b"a"[..]);
        page.update_tuple(sa, &shrunk).unwrap();
        assert_eq!(page.get_tuple(sa).unwrap(), shrunk);
        assert_eq!(page.get_tuple(sb).unwrap(), b);
    }

    #[test]
    fn test_update_rejects_marked_tuple() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let slot = page.insert_tuple(&Tuple::from(&b"abc"[..])).unwrap();
        page.mark_delete(slot);
        assert!(page.update_tuple(slot, &Tuple::from(&b"xyz"[..])).is_none());
    }

    #[test]
    fn test_fill_page_to_capacity() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh_page(&mut buf);

        let tuple = Tuple::from(vec![0xabu8; 100]);
        let mut inserted = 0;
        while page.insert_tuple(&tuple).is_some() {
            inserted += 1;
        }
        assert!(inserted > 0);
        assert!(page.free_space() < tuple.len() + SLOT_SIZE);

        for slot in 0..inserted {
            assert_eq!(page.get_tuple(slot).unwrap(), tuple);
        }
    }
}
