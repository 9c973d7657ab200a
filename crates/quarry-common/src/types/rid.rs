//! Record identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PageId;
use crate::constants::RID_SIZE;

/// Record identifier - locates a tuple as (page, slot).
///
/// Encoded as 8 bytes little-endian on the wire: page id followed by
/// slot number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the tuple.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Invalid record identifier.
    pub const INVALID: Self = Self {
        page_id: PageId::INVALID,
        slot: u32::MAX,
    };

    /// Creates a new `Rid`.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Checks if this is a valid record identifier.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.page_id.is_valid()
    }

    /// Encodes the rid into an 8-byte buffer.
    #[inline]
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.as_u32().to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Returns the encoded 8-byte form.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; RID_SIZE] {
        let mut buf = [0u8; RID_SIZE];
        self.encode(&mut buf);
        buf
    }

    /// Decodes a rid from an 8-byte buffer.
    #[inline]
    #[must_use]
    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= RID_SIZE);
        let page_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let slot = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Self {
            page_id: PageId::new(page_id),
            slot,
        }
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}, {})", self.page_id, self.slot)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}
