//! Hash table block page.
//!
//! A block page is an array of fixed-width (key, value) slots followed by
//! two bitmaps:
//!
//! ```text
//! | slot 0 | slot 1 | ... | slot B-1 | occupied[ceil(B/8)] | readable[ceil(B/8)] |
//! ```
//!
//! `occupied` records that a slot has ever been used; `readable` records
//! that it currently holds a live entry. `readable` implies `occupied`; a
//! slot with `occupied` set and `readable` clear is a tombstone and keeps
//! linear probe chains intact through deletions.

use std::marker::PhantomData;

use quarry_common::constants::PAGE_SIZE;
use quarry_common::types::Rid;

use super::bitmap;

/// Fixed-width datum storable in a hash block slot.
///
/// Keys and values both implement this; `LEN` is the encoded width and
/// equality is what insert/remove use for duplicate and match detection.
pub trait SlotData: Copy + PartialEq {
    /// Encoded width in bytes.
    const LEN: usize;

    /// Encodes into the first `LEN` bytes of `buf`.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes from the first `LEN` bytes of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

impl SlotData for u32 {
    const LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[0..4].try_into().unwrap())
    }
}

impl SlotData for u64 {
    const LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf[0..8].try_into().unwrap())
    }
}

impl SlotData for Rid {
    const LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        Rid::encode(self, buf);
    }

    fn decode(buf: &[u8]) -> Self {
        Rid::decode(buf)
    }
}

/// Number of (key, value) slots that fit in one block page alongside the
/// two bitmaps, for a combined slot width of `slot_len` bytes.
#[must_use]
pub const fn block_capacity(slot_len: usize) -> usize {
    // Each slot costs slot_len bytes plus two bits of bitmap.
    let mut cap = (4 * PAGE_SIZE) / (4 * slot_len + 1);
    while cap * slot_len + 2 * ((cap + 7) / 8) > PAGE_SIZE {
        cap -= 1;
    }
    cap
}

/// Read-only view over a hash block page.
pub struct HashBlockPage<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

/// Mutable view over a hash block page.
pub struct HashBlockPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: SlotData, V: SlotData> HashBlockPage<'a, K, V> {
    /// Slots per block page for this (K, V) instantiation.
    pub const CAPACITY: usize = block_capacity(K::LEN + V::LEN);

    /// Creates a read view into the given buffer.
    pub fn new(data: &'a [u8]) -> Self {
        assert!(data.len() >= PAGE_SIZE, "buffer too small for block page");
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Returns true if the slot has ever been used.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        occupied_get::<K, V>(self.data, slot)
    }

    /// Returns true if the slot holds a live entry.
    #[inline]
    pub fn is_readable(&self, slot: usize) -> bool {
        readable_get::<K, V>(self.data, slot)
    }

    /// Reads the key in `slot`. The slot must be readable.
    #[inline]
    pub fn key_at(&self, slot: usize) -> K {
        debug_assert!(self.is_readable(slot));
        key_at::<K, V>(self.data, slot)
    }

    /// Reads the value in `slot`. The slot must be readable.
    #[inline]
    pub fn value_at(&self, slot: usize) -> V {
        debug_assert!(self.is_readable(slot));
        value_at::<K, V>(self.data, slot)
    }
}

impl<'a, K: SlotData, V: SlotData> HashBlockPageMut<'a, K, V> {
    /// Slots per block page for this (K, V) instantiation.
    pub const CAPACITY: usize = block_capacity(K::LEN + V::LEN);

    /// Creates a mutable view into the given buffer.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(data.len() >= PAGE_SIZE, "buffer too small for block page");
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Returns true if the slot has ever been used.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        occupied_get::<K, V>(self.data, slot)
    }

    /// Returns true if the slot holds a live entry.
    #[inline]
    pub fn is_readable(&self, slot: usize) -> bool {
        readable_get::<K, V>(self.data, slot)
    }

    /// Reads the key in `slot`. The slot must be readable.
    #[inline]
    pub fn key_at(&self, slot: usize) -> K {
        debug_assert!(self.is_readable(slot));
        key_at::<K, V>(self.data, slot)
    }

    /// Reads the value in `slot`. The slot must be readable.
    #[inline]
    pub fn value_at(&self, slot: usize) -> V {
        debug_assert!(self.is_readable(slot));
        value_at::<K, V>(self.data, slot)
    }

    /// Stores (key, value) in `slot` if it is not currently readable.
    ///
    /// Returns false if the slot already holds a live entry. Writing into
    /// a tombstoned slot is allowed and revives it.
    pub fn insert(&mut self, slot: usize, key: &K, value: &V) -> bool {
        if self.is_readable(slot) {
            return false;
        }

        let base = slot * (K::LEN + V::LEN);
        key.encode(&mut self.data[base..base + K::LEN]);
        value.encode(&mut self.data[base + K::LEN..base + K::LEN + V::LEN]);

        let cap = Self::CAPACITY;
        bitmap::bit_set(&mut self.data[occupied_offset::<K, V>()..], slot);
        let readable = readable_offset::<K, V>(cap);
        bitmap::bit_set(&mut self.data[readable..], slot);
        true
    }

    /// Clears the readable bit of `slot`, leaving a tombstone.
    pub fn remove(&mut self, slot: usize) {
        debug_assert!(self.is_readable(slot));
        let readable = readable_offset::<K, V>(Self::CAPACITY);
        bitmap::bit_clear(&mut self.data[readable..], slot);
    }
}

#[inline]
const fn occupied_offset<K: SlotData, V: SlotData>() -> usize {
    block_capacity(K::LEN + V::LEN) * (K::LEN + V::LEN)
}

#[inline]
const fn readable_offset<K: SlotData, V: SlotData>(capacity: usize) -> usize {
    occupied_offset::<K, V>() + bitmap::bytes_for(capacity)
}

#[inline]
fn occupied_get<K: SlotData, V: SlotData>(data: &[u8], slot: usize) -> bool {
    bitmap::bit_get(&data[occupied_offset::<K, V>()..], slot)
}

#[inline]
fn readable_get<K: SlotData, V: SlotData>(data: &[u8], slot: usize) -> bool {
    let cap = block_capacity(K::LEN + V::LEN);
    bitmap::bit_get(&data[readable_offset::<K, V>(cap)..], slot)
}

#[inline]
fn key_at<K: SlotData, V: SlotData>(data: &[u8], slot: usize) -> K {
    let base = slot * (K::LEN + V::LEN);
    K::decode(&data[base..base + K::LEN])
}

#[inline]
fn value_at<K: SlotData, V: SlotData>(data: &[u8], slot: usize) -> V {
    let base = slot * (K::LEN + V::LEN) + K::LEN;
    V::decode(&data[base..base + V::LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::types::PageId;

    type Block<'a> = HashBlockPageMut<'a, u32, u64>;

    #[test]
    fn test_capacity_fits_in_page() {
        // Slots plus both bitmaps must fit, and capacity should not be
        // needlessly small.
        fn check(slot_len: usize) {
            let cap = block_capacity(slot_len);
            assert!(cap * slot_len + 2 * bitmap::bytes_for(cap) <= PAGE_SIZE);
            let one_more = cap + 1;
            assert!(one_more * slot_len + 2 * bitmap::bytes_for(one_more) > PAGE_SIZE);
        }
        check(8);
        check(12);
        check(16);
        check(72);
    }

    #[test]
    fn test_insert_and_read() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut block = Block::new(&mut buf);

        assert!(!block.is_occupied(0));
        assert!(block.insert(0, &7, &49));
        assert!(block.is_occupied(0));
        assert!(block.is_readable(0));
        assert_eq!(block.key_at(0), 7);
        assert_eq!(block.value_at(0), 49);
    }

    #[test]
    fn test_insert_into_readable_slot_fails() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut block = Block::new(&mut buf);

        assert!(block.insert(3, &1, &2));
        assert!(!block.insert(3, &9, &9));
        assert_eq!(block.key_at(3), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut block = Block::new(&mut buf);

        block.insert(5, &1, &2);
        block.remove(5);
        assert!(block.is_occupied(5));
        assert!(!block.is_readable(5));

        // Tombstones can be revived.
        assert!(block.insert(5, &3, &4));
        assert_eq!(block.key_at(5), 3);
    }

    #[test]
    fn test_last_slot_bits_do_not_clobber_neighbours() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut block = Block::new(&mut buf);
        let last = Block::CAPACITY - 1;

        block.insert(last, &11, &22);
        block.insert(last - 1, &33, &44);
        assert_eq!(block.key_at(last), 11);
        assert_eq!(block.key_at(last - 1), 33);

        block.remove(last - 1);
        assert!(block.is_readable(last));
    }

    #[test]
    fn test_rid_valued_block() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut block = HashBlockPageMut::<u64, Rid>::new(&mut buf);

        let rid = Rid::new(PageId::new(3), 9);
        assert!(block.insert(0, &0xfeed, &rid));
        assert_eq!(block.value_at(0), rid);
    }

    #[test]
    fn test_read_view_matches_mut_view() {
        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut block = Block::new(&mut buf);
            block.insert(2, &5, &25);
        }
        let view = HashBlockPage::<u32, u64>::new(&buf);
        assert!(view.is_readable(2));
        assert_eq!(view.key_at(2), 5);
        assert_eq!(view.value_at(2), 25);
    }
}
