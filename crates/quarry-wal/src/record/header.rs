//! Log record header.
//!
//! Every record begins with a fixed 20-byte little-endian header:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   size         total record bytes, >= 20
//!   4       4   lsn
//!   8       4   txn_id
//!  12       4   prev_lsn     previous record of the same transaction
//!  16       4   record_type
//! ```

use bytes::{Buf, BufMut};

use quarry_common::constants::LOG_RECORD_HEADER_SIZE;
use quarry_common::types::{Lsn, TxnId};

use super::types::RecordType;

/// Fixed log record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record size in bytes, header included.
    pub size: u32,
    /// LSN of this record; assigned by the log manager on append.
    pub lsn: Lsn,
    /// Transaction that produced the record.
    pub txn_id: TxnId,
    /// Previous LSN of the same transaction (`Lsn::INVALID` at BEGIN).
    pub prev_lsn: Lsn,
    /// Record type.
    pub record_type: RecordType,
}

impl RecordHeader {
    /// Header size in bytes.
    pub const SIZE: usize = LOG_RECORD_HEADER_SIZE;

    /// Creates a header; the LSN starts invalid and is filled in by the
    /// log manager under its latch.
    pub fn new(size: u32, txn_id: TxnId, prev_lsn: Lsn, record_type: RecordType) -> Self {
        Self {
            size,
            lsn: Lsn::INVALID,
            txn_id,
            prev_lsn,
            record_type,
        }
    }

    /// Serializes the header.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.lsn.as_u32());
        buf.put_u32_le(self.txn_id.as_u32());
        buf.put_u32_le(self.prev_lsn.as_u32());
        buf.put_u32_le(self.record_type.as_u32());
    }

    /// Deserializes a header, without sanity checks.
    ///
    /// Returns `None` if fewer than [`RecordHeader::SIZE`] bytes remain or
    /// the record type byte is unknown.
    pub fn deserialize(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }
        let size = buf.get_u32_le();
        let lsn = Lsn::new(buf.get_u32_le());
        let txn_id = TxnId::new(buf.get_u32_le());
        let prev_lsn = Lsn::new(buf.get_u32_le());
        let record_type = RecordType::from_u32(buf.get_u32_le())?;

        Some(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
        })
    }

    /// Sanity-checks the fields every well-formed record satisfies.
    ///
    /// A zeroed or torn tail of the log file fails here, which is how
    /// recovery detects the end of the usable log.
    pub fn is_sane(&self) -> bool {
        self.size >= Self::SIZE as u32 && self.lsn.is_valid() && self.txn_id.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = RecordHeader::new(28, TxnId::new(3), Lsn::new(7), RecordType::NewPage);
        header.lsn = Lsn::new(8);

        let mut buf = Vec::new();
        header.serialize(&mut buf);
        assert_eq!(buf.len(), RecordHeader::SIZE);

        let decoded = RecordHeader::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_sane());
    }

    #[test]
    fn test_wire_layout() {
        let mut header = RecordHeader::new(20, TxnId::new(2), Lsn::INVALID, RecordType::Begin);
        header.lsn = Lsn::new(0);

        let mut buf = Vec::new();
        header.serialize(&mut buf);

        assert_eq!(&buf[0..4], &20u32.to_le_bytes());
        assert_eq!(&buf[4..8], &0u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());
        assert_eq!(&buf[12..16], &u32::MAX.to_le_bytes());
        assert_eq!(&buf[16..20], &RecordType::Begin.as_u32().to_le_bytes());
    }

    #[test]
    fn test_zeroed_bytes_fail_sanity() {
        // Record type 0 is reserved, so a zeroed header does not even parse.
        let zeroes = [0u8; RecordHeader::SIZE];
        assert!(RecordHeader::deserialize(&mut &zeroes[..]).is_none());
    }

    #[test]
    fn test_short_buffer() {
        let buf = [0u8; 10];
        assert!(RecordHeader::deserialize(&mut &buf[..]).is_none());
    }
}
