//! Hash table header page.
//!
//! # Page Layout
//!
//! ```text
//! | page_id (4) | lsn (4) | size (4) | num_blocks (4) | block_page_id (4) * num_blocks |
//! ```
//!
//! `size` is the total bucket count of the table; the block id list is
//! append-only and ordered, forming the logical bucket array.

use quarry_common::constants::PAGE_SIZE;
use quarry_common::types::{Lsn, PageId};

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_SIZE: usize = 8;
const OFFSET_NUM_BLOCKS: usize = 12;

/// Size of the hash header page's fixed fields.
pub const HASH_HEADER_SIZE: usize = 16;

/// Maximum number of block page ids a header page can record.
pub const MAX_BLOCK_PAGE_IDS: usize = (PAGE_SIZE - HASH_HEADER_SIZE) / 4;

/// View over a hash table header page.
pub struct HashHeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HashHeaderPage<'a> {
    /// Creates a header page view into the given buffer.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= HASH_HEADER_SIZE,
            "buffer too small for hash header page"
        );
        Self { data }
    }

    /// Initializes the page with zero buckets and no blocks.
    pub fn init(&mut self, page_id: PageId) {
        self.write_u32(OFFSET_PAGE_ID, page_id.as_u32());
        self.write_u32(OFFSET_SIZE, 0);
        self.write_u32(OFFSET_NUM_BLOCKS, 0);
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

    /// Total bucket count of the table.
    #[inline]
    pub fn size(&self) -> usize {
        self.read_u32(OFFSET_SIZE) as usize
    }

    /// Sets the total bucket count.
    #[inline]
    pub fn set_size(&mut self, size: usize) {
        self.write_u32(OFFSET_SIZE, size as u32);
    }

    /// Number of block pages recorded so far.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.read_u32(OFFSET_NUM_BLOCKS) as usize
    }

    /// Appends a block page id to the list.
    ///
    /// # Panics
    ///
    /// Panics if the header page is out of room for block ids.
    pub fn add_block_page_id(&mut self, page_id: PageId) {
        let index = self.num_blocks();
        assert!(index < MAX_BLOCK_PAGE_IDS, "hash header page full");
        self.write_u32(HASH_HEADER_SIZE + index * 4, page_id.as_u32());
        self.write_u32(OFFSET_NUM_BLOCKS, (index + 1) as u32);
    }

    /// Returns the `index`-th block page id.
    #[inline]
    pub fn block_page_id(&self, index: usize) -> PageId {
        debug_assert!(index < self.num_blocks());
        PageId::new(self.read_u32(HASH_HEADER_SIZE + index * 4))
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
