use std::cmp::Ordering;

use bytes::{Buf, BufMut};

use crate::storage::page::page::PageId;

/// Fixed-width encoding of index keys and values inside bucket pages.
pub trait Storable: Sized {
    const SIZE: usize;

    fn encode<B: BufMut>(&self, buf: &mut B);
    fn decode<B: Buf>(buf: &mut B) -> Self;
}

impl Storable for i32 {
    const SIZE: usize = 4;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_i32_le()
    }
}

impl Storable for i64 {
    const SIZE: usize = 8;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_i64_le()
    }
}

impl Storable for u32 {
    const SIZE: usize = 4;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u32_le()
    }
}

impl Storable for u64 {
    const SIZE: usize = 8;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u64_le()
    }
}

// Fixed-size opaque keys, e.g. padded strings
impl<const N: usize> Storable for [u8; N] {
    const SIZE: usize = N;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        let mut key = [0u8; N];
        buf.copy_to_slice(&mut key);
        key
    }
}

/// Record id: the page holding a tuple and its slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Rid { page_id, slot_num }
    }
}

impl Storable for Rid {
    const SIZE: usize = 8;

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.page_id);
        buf.put_u32_le(self.slot_num);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        let page_id = buf.get_u32_le();
        let slot_num = buf.get_u32_le();
        Rid { page_id, slot_num }
    }
}

/// Key equality and ordering used by bucket lookups.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

impl<K, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        self(lhs, rhs)
    }
}

/// Compares keys through their `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}
