//! Log record types and payloads.

use bytes::{Buf, BufMut};

use quarry_common::constants::RID_SIZE;
use quarry_common::types::{Lsn, PageId, Rid, TxnId};
use quarry_storage::page::Tuple;

use super::header::RecordHeader;

/// Record type identifier.
///
/// The integer values are stable within a log file; 0 is reserved so a
/// zeroed tail never parses as a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordType {
    /// Transaction start.
    Begin = 1,
    /// Transaction commit.
    Commit = 2,
    /// Transaction abort.
    Abort = 3,
    /// Tuple insert.
    Insert = 4,
    /// Tuple logically deleted.
    MarkDelete = 5,
    /// Tuple physically removed.
    ApplyDelete = 6,
    /// Delete mark rolled back.
    RollbackDelete = 7,
    /// Tuple overwritten (old and new images).
    Update = 8,
    /// Page allocated and linked into a chain.
    NewPage = 9,
}

impl RecordType {
    /// Converts the record type to its wire value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parses a record type from its wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Insert),
            5 => Some(Self::MarkDelete),
            6 => Some(Self::ApplyDelete),
            7 => Some(Self::RollbackDelete),
            8 => Some(Self::Update),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }

    /// Returns true if records of this type mutate a page.
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::MarkDelete
                | Self::ApplyDelete
                | Self::RollbackDelete
                | Self::Update
                | Self::NewPage
        )
    }
}

/// Type-specific payload of a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// Header-only record.
    Begin,
    /// Header-only record.
    Commit,
    /// Header-only record.
    Abort,
    /// Tuple inserted at `rid`.
    Insert {
        /// Location of the new tuple.
        rid: Rid,
        /// The inserted tuple.
        tuple: Tuple,
    },
    /// Tuple at `rid` marked deleted.
    MarkDelete {
        /// Location of the tuple.
        rid: Rid,
        /// The tuple image (may be empty).
        tuple: Tuple,
    },
    /// Tuple at `rid` physically removed.
    ApplyDelete {
        /// Location of the removed tuple.
        rid: Rid,
        /// The removed tuple, needed to undo the delete.
        tuple: Tuple,
    },
    /// Delete mark at `rid` rolled back.
    RollbackDelete {
        /// Location of the tuple.
        rid: Rid,
        /// The tuple image (may be empty).
        tuple: Tuple,
    },
    /// Tuple at `rid` overwritten.
    Update {
        /// Location of the tuple.
        rid: Rid,
        /// Image before the update.
        old_tuple: Tuple,
        /// Image after the update.
        new_tuple: Tuple,
    },
    /// Page `page_id` allocated after `prev_page_id`.
    NewPage {
        /// Predecessor in the page chain (`PageId::INVALID` for the head).
        prev_page_id: PageId,
        /// The allocated page.
        page_id: PageId,
    },
}

impl LogPayload {
    /// The record type this payload belongs to.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin => RecordType::Begin,
            Self::Commit => RecordType::Commit,
            Self::Abort => RecordType::Abort,
            Self::Insert { .. } => RecordType::Insert,
            Self::MarkDelete { .. } => RecordType::MarkDelete,
            Self::ApplyDelete { .. } => RecordType::ApplyDelete,
            Self::RollbackDelete { .. } => RecordType::RollbackDelete,
            Self::Update { .. } => RecordType::Update,
            Self::NewPage { .. } => RecordType::NewPage,
        }
    }

    fn serialized_size(&self) -> usize {
        match self {
            Self::Begin | Self::Commit | Self::Abort => 0,
            Self::Insert { tuple, .. }
            | Self::MarkDelete { tuple, .. }
            | Self::ApplyDelete { tuple, .. }
            | Self::RollbackDelete { tuple, .. } => RID_SIZE + tuple.serialized_size(),
            Self::Update {
                old_tuple,
                new_tuple,
                ..
            } => RID_SIZE + old_tuple.serialized_size() + new_tuple.serialized_size(),
            Self::NewPage { .. } => 8,
        }
    }
}

/// A complete log record: header plus typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record header.
    pub header: RecordHeader,
    /// Record payload.
    pub payload: LogPayload,
}

impl LogRecord {
    /// Creates a record for `payload`; the header size is computed, the
    /// LSN stays invalid until the log manager assigns one on append.
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        let size = (RecordHeader::SIZE + payload.serialized_size()) as u32;
        let header = RecordHeader::new(size, txn_id, prev_lsn, payload.record_type());
        Self { header, payload }
    }

    /// Creates a BEGIN record (head of a transaction's chain).
    pub fn begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, Lsn::INVALID, LogPayload::Begin)
    }

    /// Creates a COMMIT record.
    pub fn commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Commit)
    }

    /// Creates an ABORT record.
    pub fn abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Abort)
    }

    /// Creates an INSERT record.
    pub fn insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Insert { rid, tuple })
    }

    /// Creates a MARKDELETE record.
    pub fn mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::MarkDelete { rid, tuple })
    }

    /// Creates an APPLYDELETE record carrying the removed tuple.
    pub fn apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::ApplyDelete { rid, tuple })
    }

    /// Creates a ROLLBACKDELETE record.
    pub fn rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::RollbackDelete { rid, tuple })
    }

    /// Creates an UPDATE record carrying both tuple images.
    pub fn update(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, old_tuple: Tuple, new_tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    /// Creates a NEWPAGE record.
    pub fn new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    /// Total serialized size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    /// This record's LSN.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// The transaction that produced this record.
    #[inline]
    pub fn txn_id(&self) -> TxnId {
        self.header.txn_id
    }

    /// Previous record of the same transaction.
    #[inline]
    pub fn prev_lsn(&self) -> Lsn {
        self.header.prev_lsn
    }

    /// This record's type.
    #[inline]
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    /// Serializes the whole record (header then payload).
    pub fn serialize(&self, buf: &mut impl BufMut) {
        self.header.serialize(buf);
        match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { rid, tuple }
            | LogPayload::MarkDelete { rid, tuple }
            | LogPayload::ApplyDelete { rid, tuple }
            | LogPayload::RollbackDelete { rid, tuple } => {
                buf.put_slice(&rid.to_bytes());
                tuple.serialize(buf);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                buf.put_slice(&rid.to_bytes());
                old_tuple.serialize(buf);
                new_tuple.serialize(buf);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                buf.put_u32_le(prev_page_id.as_u32());
                buf.put_u32_le(page_id.as_u32());
            }
        }
    }

    /// Deserializes one record from the front of `buf`.
    ///
    /// Returns `None` when the bytes do not form a complete, sane record,
    /// which recovery treats as the end of the usable log.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        let mut cursor = buf;
        let header = RecordHeader::deserialize(&mut cursor)?;
        if !header.is_sane() || buf.len() < header.size as usize {
            return None;
        }

        let payload = match header.record_type {
            RecordType::Begin => LogPayload::Begin,
            RecordType::Commit => LogPayload::Commit,
            RecordType::Abort => LogPayload::Abort,
            RecordType::Insert => {
                let (rid, tuple) = Self::read_rid_tuple(&mut cursor)?;
                LogPayload::Insert { rid, tuple }
            }
            RecordType::MarkDelete => {
                let (rid, tuple) = Self::read_rid_tuple(&mut cursor)?;
                LogPayload::MarkDelete { rid, tuple }
            }
            RecordType::ApplyDelete => {
                let (rid, tuple) = Self::read_rid_tuple(&mut cursor)?;
                LogPayload::ApplyDelete { rid, tuple }
            }
            RecordType::RollbackDelete => {
                let (rid, tuple) = Self::read_rid_tuple(&mut cursor)?;
                LogPayload::RollbackDelete { rid, tuple }
            }
            RecordType::Update => {
                let (rid, old_tuple) = Self::read_rid_tuple(&mut cursor)?;
                let new_tuple = Tuple::deserialize(&mut cursor)?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            RecordType::NewPage => {
                if cursor.remaining() < 8 {
                    return None;
                }
                let prev_page_id = PageId::new(cursor.get_u32_le());
                let page_id = PageId::new(cursor.get_u32_le());
                LogPayload::NewPage {
                    prev_page_id,
                    page_id,
                }
            }
        };

        let record = Self { header, payload };
        // The declared size must agree with what the payload occupies.
        if record.header.size as usize != RecordHeader::SIZE + record.payload.serialized_size() {
            return None;
        }
        Some(record)
    }

    fn read_rid_tuple(cursor: &mut &[u8]) -> Option<(Rid, Tuple)> {
        if cursor.remaining() < RID_SIZE {
            return None;
        }
        let mut rid_buf = [0u8; RID_SIZE];
        cursor.copy_to_slice(&mut rid_buf);
        let rid = Rid::decode(&rid_buf);
        let tuple = Tuple::deserialize(cursor)?;
        Some((rid, tuple))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mut record: LogRecord, lsn: u32) -> LogRecord {
        record.header.lsn = Lsn::new(lsn);
        let mut buf = Vec::new();
        record.serialize(&mut buf);
        assert_eq!(buf.len(), record.size());
        let decoded = LogRecord::deserialize(&buf).unwrap();
        assert_eq!(decoded, record);
        decoded
    }

    #[test]
    fn test_header_only_records_are_20_bytes() {
        let begin = roundtrip(LogRecord::begin(TxnId::new(1)), 0);
        assert_eq!(begin.size(), 20);
        assert!(!begin.prev_lsn().is_valid());

        let commit = roundtrip(LogRecord::commit(TxnId::new(1), Lsn::new(0)), 1);
        assert_eq!(commit.size(), 20);

        let abort = roundtrip(LogRecord::abort(TxnId::new(1), Lsn::new(0)), 1);
        assert_eq!(abort.size(), 20);
    }

    #[test]
    fn test_new_page_record_is_28_bytes() {
        let record = roundtrip(
            LogRecord::new_page(TxnId::new(1), Lsn::new(0), PageId::INVALID, PageId::new(2)),
            1,
        );
        assert_eq!(record.size(), 28);
    }

    #[test]
    fn test_insert_record() {
        let rid = Rid::new(PageId::new(2), 0);
        let tuple = Tuple::from(&b"payload"[..]);
        let record = roundtrip(
            LogRecord::insert(TxnId::new(1), Lsn::new(1), rid, tuple.clone()),
            2,
        );
        assert_eq!(record.size(), 20 + 8 + 4 + tuple.len());
        match record.payload {
            LogPayload::Insert {
                rid: r,
                tuple: ref t,
            } => {
                assert_eq!(r, rid);
                assert_eq!(*t, tuple);
            }
            _ => panic!("expected insert payload"),
        }
    }

    #[test]
    fn test_delete_record_with_empty_tuple_is_32_bytes() {
        let rid = Rid::new(PageId::new(4), 1);
        let record = roundtrip(
            LogRecord::mark_delete(TxnId::new(1), Lsn::new(2), rid, Tuple::empty()),
            3,
        );
        assert_eq!(record.size(), 32);
    }

    #[test]
    fn test_update_record_carries_both_images() {
        let rid = Rid::new(PageId::new(4), 1);
        let record = roundtrip(
            LogRecord::update(
                TxnId::new(1),
                Lsn::new(2),
                rid,
                Tuple::from(&b"old"[..]),
                Tuple::from(&b"newer"[..]),
            ),
            3,
        );
        assert_eq!(record.size(), 20 + 8 + (4 + 3) + (4 + 5));
    }

    #[test]
    fn test_truncated_payload_fails() {
        let rid = Rid::new(PageId::new(2), 0);
        let mut record = LogRecord::insert(TxnId::new(1), Lsn::new(1), rid, Tuple::from(&b"xyzw"[..]));
        record.header.lsn = Lsn::new(2);
        let mut buf = Vec::new();
        record.serialize(&mut buf);

        assert!(LogRecord::deserialize(&buf[..buf.len() - 1]).is_none());
        assert!(LogRecord::deserialize(&buf[..10]).is_none());
    }

    #[test]
    fn test_size_mismatch_fails() {
        let mut record = LogRecord::begin(TxnId::new(1));
        record.header.lsn = Lsn::new(0);
        record.header.size = 24; // lies about its size
        let mut buf = Vec::new();
        record.serialize(&mut buf);
        buf.extend_from_slice(&[0u8; 4]);
        assert!(LogRecord::deserialize(&buf).is_none());
    }

    #[test]
    fn test_record_type_values_are_stable() {
        for (value, rt) in [
            (1, RecordType::Begin),
            (2, RecordType::Commit),
            (3, RecordType::Abort),
            (4, RecordType::Insert),
            (5, RecordType::MarkDelete),
            (6, RecordType::ApplyDelete),
            (7, RecordType::RollbackDelete),
            (8, RecordType::Update),
            (9, RecordType::NewPage),
        ] {
            assert_eq!(rt.as_u32(), value);
            assert_eq!(RecordType::from_u32(value), Some(rt));
        }
        assert_eq!(RecordType::from_u32(0), None);
        assert_eq!(RecordType::from_u32(10), None);
    }
}
