use std::cmp::Ordering;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid};

/// A key with a fixed-width on-page encoding.
pub trait IndexKey: Clone + Send + Sync + 'static {
    const ENCODED_SIZE: usize;
    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// A value with a fixed-width on-page encoding.
pub trait IndexValue: Clone + Send + Sync + 'static {
    const ENCODED_SIZE: usize;
    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// Total order over keys. Trees carry a comparator instance so key types
/// with several meaningful orders need no wrapper types.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Comparator that delegates to the key's `Ord`.
pub struct DefaultComparator<K> {
    _phantom: PhantomData<fn(K)>,
}

impl<K> DefaultComparator<K> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<K> Default for DefaultComparator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for DefaultComparator<K> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K: Ord + Send + Sync + 'static> KeyComparator<K> for DefaultComparator<K> {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl IndexValue for Rid {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, self.page_id);
        LittleEndian::write_u32(&mut buf[4..], self.slot);
    }

    fn decode(buf: &[u8]) -> Self {
        Rid {
            page_id: LittleEndian::read_i32(buf) as PageId,
            slot: LittleEndian::read_u32(&buf[4..]),
        }
    }
}

impl IndexValue for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexValue for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}
