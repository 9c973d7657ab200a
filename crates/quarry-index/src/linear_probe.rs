//! Linear-probing hash table over buffer-pool pages.

use std::hash::Hasher;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use siphasher::sip::SipHasher13;

use quarry_common::types::PageId;
use quarry_storage::page::{HashBlockPage, HashBlockPageMut, HashHeaderPage, SlotData};
use quarry_storage::BufferPool;

use crate::error::{IndexError, IndexResult};

/// Cached copy of the bucket-array shape stored in the header page.
///
/// Guarded by the table-level latch: lookups, inserts, and removes hold
/// it shared, resize holds it exclusive.
struct Shape {
    num_buckets: usize,
    block_ids: Vec<PageId>,
}

/// A disk-backed linear-probing hash table.
///
/// Keys may repeat across slots; exact (key, value) duplicates are
/// rejected. Buckets are spread across block pages in header order, and
/// probing wraps across page boundaries back to the first bucket.
pub struct LinearProbeHashTable<K, V> {
    pool: Arc<BufferPool>,
    header_page_id: PageId,
    shape: RwLock<Shape>,
    _marker: PhantomData<(K, V)>,
}

impl<K: SlotData, V: SlotData> LinearProbeHashTable<K, V> {
    /// Slots per block page for this instantiation.
    const BLOCK_CAPACITY: usize = HashBlockPageMut::<'static, K, V>::CAPACITY;

    /// Creates a table with `num_buckets` buckets, allocating the header
    /// page and every block page through the buffer pool.
    pub fn new(pool: Arc<BufferPool>, num_buckets: usize) -> IndexResult<Self> {
        assert!(num_buckets > 0, "hash table needs at least one bucket");

        let (header_page_id, header_frame) = pool.new_page()?;
        {
            let mut data = header_frame.write_data();
            let mut header = HashHeaderPage::new(&mut data[..]);
            header.init(header_page_id);
            header.set_size(num_buckets);
        }

        let num_blocks = Self::blocks_for(num_buckets);
        let mut block_ids = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let (block_id, _frame) = pool.new_page()?;
            pool.unpin_page(block_id, false);
            block_ids.push(block_id);
        }

        {
            let mut data = header_frame.write_data();
            let mut header = HashHeaderPage::new(&mut data[..]);
            for &block_id in &block_ids {
                header.add_block_page_id(block_id);
            }
        }
        pool.unpin_page(header_page_id, true);

        Ok(Self {
            pool,
            header_page_id,
            shape: RwLock::new(Shape {
                num_buckets,
                block_ids,
            }),
            _marker: PhantomData,
        })
    }

    /// Opens an existing table from its header page.
    pub fn open(pool: Arc<BufferPool>, header_page_id: PageId) -> IndexResult<Self> {
        let frame = pool.fetch_page(header_page_id)?;
        let shape = {
            let mut data = frame.write_data();
            let header = HashHeaderPage::new(&mut data[..]);
            let num_buckets = header.size();
            let block_ids = (0..header.num_blocks())
                .map(|i| header.block_page_id(i))
                .collect();
            Shape {
                num_buckets,
                block_ids,
            }
        };
        pool.unpin_page(header_page_id, false);

        Ok(Self {
            pool,
            header_page_id,
            shape: RwLock::new(shape),
            _marker: PhantomData,
        })
    }

    /// The header page anchoring this table.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Total bucket count, as recorded in the header page.
    pub fn size(&self) -> IndexResult<usize> {
        let shape = self.shape.read();
        let frame = self.pool.fetch_page(self.header_page_id)?;
        let size = {
            let mut data = frame.write_data();
            HashHeaderPage::new(&mut data[..]).size()
        };
        self.pool.unpin_page(self.header_page_id, false);
        debug_assert_eq!(size, shape.num_buckets);
        Ok(size)
    }

    /// Collects every value stored under `key`.
    pub fn get(&self, key: &K) -> IndexResult<Vec<V>> {
        let shape = self.shape.read();
        let mut probe = Probe::start::<K, V>(&shape, self.bucket_of(key, shape.num_buckets));
        let mut result = Vec::new();

        let mut frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
        loop {
            let stop = {
                let data = frame.read_data();
                let block = HashBlockPage::<K, V>::new(&data[..]);
                if block.is_occupied(probe.slot) {
                    if block.is_readable(probe.slot) && block.key_at(probe.slot) == *key {
                        result.push(block.value_at(probe.slot));
                    }
                    false
                } else {
                    // No insert ever probed past here.
                    true
                }
            };
            if stop {
                break;
            }

            let crossed = probe.advance::<K, V>(&shape);
            if crossed {
                self.pool.unpin_page(frame.page_id(), false);
                frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
            }
            if probe.wrapped() {
                break;
            }
        }
        self.pool.unpin_page(frame.page_id(), false);
        Ok(result)
    }

    /// Inserts (key, value).
    ///
    /// Returns `Ok(false)` if exactly this pair is already present, and
    /// [`IndexError::HashTableFull`] if the probe wrapped without finding
    /// a slot; the caller is expected to resize and retry.
    pub fn insert(&self, key: &K, value: &V) -> IndexResult<bool> {
        let shape = self.shape.read();
        self.insert_with_shape(&shape, key, value)
    }

    /// Removes (key, value), tombstoning its slot.
    ///
    /// Returns false if the pair is not present.
    pub fn remove(&self, key: &K, value: &V) -> IndexResult<bool> {
        let shape = self.shape.read();
        let mut probe = Probe::start::<K, V>(&shape, self.bucket_of(key, shape.num_buckets));

        let mut frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
        loop {
            let outcome = {
                let mut data = frame.write_data();
                let mut block = HashBlockPageMut::<K, V>::new(&mut data[..]);
                if !block.is_occupied(probe.slot) {
                    Some(false)
                } else if block.is_readable(probe.slot)
                    && block.key_at(probe.slot) == *key
                    && block.value_at(probe.slot) == *value
                {
                    block.remove(probe.slot);
                    Some(true)
                } else {
                    None
                }
            };
            if let Some(removed) = outcome {
                self.pool.unpin_page(frame.page_id(), removed);
                return Ok(removed);
            }

            let crossed = probe.advance::<K, V>(&shape);
            if crossed {
                self.pool.unpin_page(frame.page_id(), false);
                frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
            }
            if probe.wrapped() {
                break;
            }
        }
        self.pool.unpin_page(frame.page_id(), false);
        Ok(false)
    }

    /// Doubles the bucket count to `2 * current_size` and rehashes every
    /// live entry.
    ///
    /// The caller passes the live bucket count; a concurrent structure
    /// change between reading the size and calling resize makes the call
    /// a no-op only if the table already grew past the target.
    pub fn resize(&self, current_size: usize) -> IndexResult<()> {
        let mut shape = self.shape.write();
        let new_buckets = current_size * 2;
        if new_buckets <= shape.num_buckets {
            return Ok(());
        }
        tracing::debug!(from = shape.num_buckets, to = new_buckets, "resizing hash table");

        // Snapshot every live entry and tombstone it in place.
        let mut entries: Vec<(K, V)> = Vec::new();
        for (block_index, &block_id) in shape.block_ids.iter().enumerate() {
            let frame = self.pool.fetch_page(block_id)?;
            {
                let mut data = frame.write_data();
                let mut block = HashBlockPageMut::<K, V>::new(&mut data[..]);
                for slot in 0..slots_in_block::<K, V>(&shape, block_index) {
                    if block.is_readable(slot) {
                        entries.push((block.key_at(slot), block.value_at(slot)));
                        block.remove(slot);
                    }
                }
            }
            self.pool.unpin_page(block_id, true);
        }

        // Grow the block array.
        let old_blocks = shape.block_ids.len();
        let new_blocks = Self::blocks_for(new_buckets);
        for _ in old_blocks..new_blocks {
            let (block_id, _frame) = self.pool.new_page()?;
            self.pool.unpin_page(block_id, false);
            shape.block_ids.push(block_id);
        }
        shape.num_buckets = new_buckets;

        // Publish the new shape in the header page.
        let frame = self.pool.fetch_page(self.header_page_id)?;
        {
            let mut data = frame.write_data();
            let mut header = HashHeaderPage::new(&mut data[..]);
            header.set_size(new_buckets);
            for &block_id in &shape.block_ids[old_blocks..] {
                header.add_block_page_id(block_id);
            }
        }
        self.pool.unpin_page(self.header_page_id, true);

        // Rehash. The doubled table must take every snapshot entry back.
        for (key, value) in &entries {
            match self.insert_with_shape(&shape, key, value) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(IndexError::invariant("duplicate entry during rehash"));
                }
                Err(IndexError::HashTableFull) => {
                    return Err(IndexError::invariant("doubled table overflowed during rehash"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn insert_with_shape(&self, shape: &Shape, key: &K, value: &V) -> IndexResult<bool> {
        let mut probe = Probe::start::<K, V>(shape, self.bucket_of(key, shape.num_buckets));

        let mut frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
        loop {
            let inserted = {
                let mut data = frame.write_data();
                let mut block = HashBlockPageMut::<K, V>::new(&mut data[..]);
                if block.insert(probe.slot, key, value) {
                    Some(true)
                } else if block.key_at(probe.slot) == *key && block.value_at(probe.slot) == *value {
                    Some(false)
                } else {
                    None
                }
            };
            match inserted {
                Some(true) => {
                    self.pool.unpin_page(frame.page_id(), true);
                    return Ok(true);
                }
                Some(false) => {
                    self.pool.unpin_page(frame.page_id(), false);
                    return Ok(false);
                }
                None => {}
            }

            let crossed = probe.advance::<K, V>(shape);
            if crossed {
                self.pool.unpin_page(frame.page_id(), false);
                frame = self.pool.fetch_page(shape.block_ids[probe.block])?;
            }
            if probe.wrapped() {
                self.pool.unpin_page(frame.page_id(), false);
                return Err(IndexError::HashTableFull);
            }
        }
    }

    fn bucket_of(&self, key: &K, num_buckets: usize) -> usize {
        let mut encoded = vec![0u8; K::LEN];
        key.encode(&mut encoded);
        let mut hasher = SipHasher13::new();
        hasher.write(&encoded);
        (hasher.finish() % num_buckets as u64) as usize
    }

    fn blocks_for(num_buckets: usize) -> usize {
        (num_buckets - 1) / Self::BLOCK_CAPACITY + 1
    }
}

/// Probe cursor over the logical bucket array.
struct Probe {
    block: usize,
    slot: usize,
    start_block: usize,
    start_slot: usize,
    moved: bool,
}

impl Probe {
    fn start<K: SlotData, V: SlotData>(shape: &Shape, bucket: usize) -> Self {
        let capacity = HashBlockPageMut::<'static, K, V>::CAPACITY;
        let block = bucket / capacity;
        let slot = bucket % capacity;
        debug_assert!(block < shape.block_ids.len());
        Self {
            block,
            slot,
            start_block: block,
            start_slot: slot,
            moved: false,
        }
    }

    /// Steps to the next bucket; returns true when the step crossed a
    /// page boundary.
    fn advance<K: SlotData, V: SlotData>(&mut self, shape: &Shape) -> bool {
        self.moved = true;
        self.slot += 1;
        if self.slot == slots_in_block::<K, V>(shape, self.block) {
            self.slot = 0;
            self.block += 1;
            if self.block == shape.block_ids.len() {
                self.block = 0;
            }
            true
        } else {
            false
        }
    }

    /// True once the cursor is back at the initial bucket.
    fn wrapped(&self) -> bool {
        self.moved && self.block == self.start_block && self.slot == self.start_slot
    }
}

/// Buckets held by `block_index`: every block holds the full page
/// capacity except the last, which takes the remainder.
fn slots_in_block<K: SlotData, V: SlotData>(shape: &Shape, block_index: usize) -> usize {
    let capacity = HashBlockPageMut::<'static, K, V>::CAPACITY;
    if block_index + 1 == shape.block_ids.len() {
        shape.num_buckets - capacity * (shape.block_ids.len() - 1)
    } else {
        capacity
    }
}

impl<K, V> std::fmt::Debug for LinearProbeHashTable<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.shape.read();
        f.debug_struct("LinearProbeHashTable")
            .field("header_page_id", &self.header_page_id)
            .field("num_buckets", &shape.num_buckets)
            .field("blocks", &shape.block_ids.len())
            .finish()
    }
}
