//! On-disk page layouts.
//!
//! Every layout in this module is a thin view over a page-sized byte
//! buffer; nothing here owns memory or touches the buffer pool. All
//! multi-byte fields are little-endian.

pub mod bitmap;
mod hash_block_page;
mod hash_header_page;
mod table_page;
mod tmp_tuple_page;
mod tuple;

pub use hash_block_page::{block_capacity, HashBlockPage, HashBlockPageMut, SlotData};
pub use hash_header_page::HashHeaderPage;
pub use table_page::TablePage;
pub use tmp_tuple_page::{TmpTuple, TmpTuplePage};
pub use tuple::Tuple;

/// Fixed-width index key: raw bytes, zero-padded to `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize>(pub [u8; N]);

impl<const N: usize> GenericKey<N> {
    /// Builds a key from a byte slice, truncating or zero-padding to `N`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self(data)
    }
}

impl<const N: usize> SlotData for GenericKey<N> {
    const LEN: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self(data)
    }
}
