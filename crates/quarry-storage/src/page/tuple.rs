//! Tuple payload and its wire codec.

use bytes::{Buf, BufMut, Bytes};

/// An opaque tuple payload.
///
/// On the wire a tuple is `u32 length` followed by `length` payload
/// bytes; the engine core never interprets the payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Bytes,
}

impl Tuple {
    /// Creates a tuple from a payload.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Creates an empty tuple.
    #[must_use]
    pub fn empty() -> Self {
        Self { data: Bytes::new() }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the serialized form: length prefix plus payload.
    #[inline]
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + self.data.len()
    }

    /// Serializes the tuple as `u32 length || payload`.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Deserializes a tuple, returning `None` if the buffer is truncated.
    pub fn deserialize(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return None;
        }
        Some(Self {
            data: buf.copy_to_bytes(len),
        })
    }
}

impl From<&[u8]> for Tuple {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Tuple {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let tuple = Tuple::from(&b"hello"[..]);
        let mut buf = Vec::new();
        tuple.serialize(&mut buf);
        assert_eq!(buf.len(), tuple.serialized_size());

        let decoded = Tuple::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn test_empty_tuple_serializes_to_length_prefix() {
        let tuple = Tuple::empty();
        let mut buf = Vec::new();
        tuple.serialize(&mut buf);
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_input() {
        assert!(Tuple::deserialize(&mut &[1u8, 0][..]).is_none());
        // Length says 4 bytes but only 2 follow.
        assert!(Tuple::deserialize(&mut &[4u8, 0, 0, 0, 1, 2][..]).is_none());
    }
}
