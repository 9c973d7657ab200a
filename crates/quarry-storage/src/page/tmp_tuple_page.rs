//! Temp-tuple page for intermediate results.
//!
//! # Page Layout
//!
//! ```text
//! | page_id (4) | lsn (4) | free_space_pointer (4) | ... free ... | size (4) | data | size (4) | data |
//!                                                  ^
//!                                                  free space pointer
//! ```
//!
//! Tuples are laid out from the page end downward; the insertion cursor
//! writes the data first and the size last, so a forward reader at a
//! tuple's offset always sees size-then-data.

use quarry_common::types::{Lsn, PageId};

use super::hash_block_page::SlotData;
use super::tuple::Tuple;

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_FREE_SPACE: usize = 8;

/// Size of the temp-tuple page header.
pub const TMP_TUPLE_PAGE_HEADER_SIZE: usize = 12;

/// Size of the per-tuple length prefix.
const TUPLE_SIZE_PREFIX: usize = 4;

/// Reference to a tuple stored in a temp-tuple page: page plus byte offset.
///
/// This is the 8-byte value stored in hash-join block pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TmpTuple {
    /// Page holding the tuple.
    pub page_id: PageId,
    /// Byte offset of the size prefix within the page.
    pub offset: u32,
}

impl TmpTuple {
    /// Creates a new temp-tuple reference.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, offset: u32) -> Self {
        Self { page_id, offset }
    }
}

impl SlotData for TmpTuple {
    const LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.as_u32().to_le_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::new(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
            offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// View over a temp-tuple page.
pub struct TmpTuplePage<'a> {
    data: &'a mut [u8],
}

impl<'a> TmpTuplePage<'a> {
    /// Creates a temp-tuple page view into the given buffer.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= TMP_TUPLE_PAGE_HEADER_SIZE,
            "buffer too small for tmp tuple page"
        );
        Self { data }
    }

    /// Initializes the page: id set, LSN untouched, cursor at the page end.
    pub fn init(&mut self, page_id: PageId) {
        self.write_u32(OFFSET_PAGE_ID, page_id.as_u32());
        let page_size = self.data.len();
        self.set_free_space_pointer(page_size as u32);
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

    /// Returns the insertion cursor.
    #[inline]
    pub fn free_space_pointer(&self) -> u32 {
        self.read_u32(OFFSET_FREE_SPACE)
    }

    #[inline]
    fn set_free_space_pointer(&mut self, ptr: u32) {
        self.write_u32(OFFSET_FREE_SPACE, ptr);
    }

    /// Bytes remaining for tuples.
    #[inline]
    pub fn free_space_remaining(&self) -> usize {
        self.free_space_pointer() as usize - TMP_TUPLE_PAGE_HEADER_SIZE
    }

    /// Inserts a tuple, returning a reference to it.
    ///
    /// Returns `None` if the tuple is empty or the page has no room for
    /// the data plus its size prefix.
    pub fn insert(&mut self, tuple: &Tuple) -> Option<TmpTuple> {
        if tuple.is_empty() {
            return None;
        }
        if self.free_space_remaining() < tuple.len() + TUPLE_SIZE_PREFIX {
            return None;
        }

        // Data first, size last, so the final write exposes the tuple.
        let data_ptr = self.free_space_pointer() as usize - tuple.len();
        self.data[data_ptr..data_ptr + tuple.len()].copy_from_slice(tuple.data());

        let size_ptr = data_ptr - TUPLE_SIZE_PREFIX;
        self.write_u32(size_ptr, tuple.len() as u32);
        self.set_free_space_pointer(size_ptr as u32);

        Some(TmpTuple::new(self.page_id(), size_ptr as u32))
    }

    /// Reads the tuple at `offset` (as produced by [`TmpTuplePage::insert`]).
    pub fn get(&self, offset: u32) -> Option<Tuple> {
        let offset = offset as usize;
        if offset < TMP_TUPLE_PAGE_HEADER_SIZE || offset + TUPLE_SIZE_PREFIX > self.data.len() {
            return None;
        }
        let size = self.read_u32(offset) as usize;
        let start = offset + TUPLE_SIZE_PREFIX;
        if size == 0 || start + size > self.data.len() {
            return None;
        }
        Some(Tuple::from(&self.data[start..start + size]))
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

    #[test]
    fn test_init() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TmpTuplePage::new(&mut buf);
        page.init(PageId::new(9));

        assert_eq!(page.page_id(), PageId::new(9));
        assert_eq!(page.free_space_pointer(), PAGE_SIZE as u32);
        assert_eq!(
            page.free_space_remaining(),
            PAGE_SIZE - TMP_TUPLE_PAGE_HEADER_SIZE
        );
    }

    #[test]
    fn test_insert_layout_is_size_then_data() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TmpTuplePage::new(&mut buf);
        page.init(PageId::new(1));

        let tmp = page.insert(&Tuple::from(&b"abcd"[..])).unwrap();
        assert_eq!(tmp.page_id, PageId::new(1));
        assert_eq!(tmp.offset as usize, PAGE_SIZE - 8);

        // Forward read at the offset: size, then data.
        assert_eq!(&buf[PAGE_SIZE - 8..PAGE_SIZE - 4], &4u32.to_le_bytes());
        assert_eq!(&buf[PAGE_SIZE - 4..], b"abcd");
    }

    #[test]
    fn test_insert_then_get() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TmpTuplePage::new(&mut buf);
        page.init(PageId::new(1));

        let t1 = Tuple::from(&b"first"[..]);
        let t2 = Tuple::from(&b"second one"[..]);
        let r1 = page.insert(&t1).unwrap();
        let r2 = page.insert(&t2).unwrap();

        assert!(r2.offset < r1.offset);
        assert_eq!(page.get(r1.offset).unwrap(), t1);
        assert_eq!(page.get(r2.offset).unwrap(), t2);
    }

    #[test]
    fn test_insert_until_full() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TmpTuplePage::new(&mut buf);
        page.init(PageId::new(1));

        let tuple = Tuple::from(vec![1u8; 500]);
        let mut count = 0;
        while page.insert(&tuple).is_some() {
            count += 1;
        }
        assert_eq!(
            count,
            (PAGE_SIZE - TMP_TUPLE_PAGE_HEADER_SIZE) / (500 + TUPLE_SIZE_PREFIX)
        );
    }

    #[test]
    fn test_tmp_tuple_slot_roundtrip() {
        let tmp = TmpTuple::new(PageId::new(3), 4000);
        let mut buf = [0u8; 8];
        tmp.encode(&mut buf);
        assert_eq!(TmpTuple::decode(&buf), tmp);
    }
}
