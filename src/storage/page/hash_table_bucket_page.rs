//! Leaf level of a disk extendible hash index.
//!
//! Layout:
//! ```text
//! | size (u32) | max_size (u32) | (K, V) | (K, V) | ... |
//! ```
//! Entries are packed in insertion order, removal shifts the tail down.

use std::{cmp::Ordering, marker::PhantomData};

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    index::codec::{KeyComparator, Storable},
    storage::page::page::page_constants::PAGE_SIZE,
};

pub const HTABLE_BUCKET_PAGE_METADATA_SIZE: usize = 8;

const SIZE_OFFSET: usize = 0;
const MAX_SIZE_OFFSET: usize = 4;

/// Number of entries of `entry_size` bytes that fit in one bucket page.
pub const fn bucket_array_size(entry_size: usize) -> usize {
    (PAGE_SIZE - HTABLE_BUCKET_PAGE_METADATA_SIZE) / entry_size
}

pub struct HashTableBucketPage<B, K, V> {
    data: B,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<B, K, V> HashTableBucketPage<B, K, V>
where
    B: AsRef<[u8]>,
    K: Storable,
    V: Storable,
{
    pub fn new(data: B) -> Self {
        HashTableBucketPage {
            data,
            _marker: PhantomData,
        }
    }

    /// Upper bound for `max_size` given the key and value widths.
    pub fn capacity() -> u32 {
        bucket_array_size(K::SIZE + V::SIZE) as u32
    }

    fn entry_offset(idx: u32) -> usize {
        HTABLE_BUCKET_PAGE_METADATA_SIZE + idx as usize * (K::SIZE + V::SIZE)
    }

    pub fn size(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[SIZE_OFFSET..])
    }

    pub fn max_size(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[MAX_SIZE_OFFSET..])
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn check_index(&self, idx: u32) {
        assert!(
            idx < self.size(),
            "bucket index {} out of range for {} entries",
            idx,
            self.size()
        );
    }

    pub fn key_at(&self, idx: u32) -> K {
        self.check_index(idx);
        let offset = Self::entry_offset(idx);
        K::decode(&mut &self.data.as_ref()[offset..offset + K::SIZE])
    }

    pub fn value_at(&self, idx: u32) -> V {
        self.check_index(idx);
        let offset = Self::entry_offset(idx) + K::SIZE;
        V::decode(&mut &self.data.as_ref()[offset..offset + V::SIZE])
    }

    pub fn entry_at(&self, idx: u32) -> (K, V) {
        (self.key_at(idx), self.value_at(idx))
    }

    fn find(&self, key: &K, cmp: &impl KeyComparator<K>) -> Option<u32> {
        (0..self.size()).find(|idx| cmp.compare(&self.key_at(*idx), key) == Ordering::Equal)
    }

    pub fn lookup(&self, key: &K, cmp: &impl KeyComparator<K>) -> Option<V> {
        self.find(key, cmp).map(|idx| self.value_at(idx))
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        (0..self.size()).map(|idx| self.entry_at(idx)).collect()
    }
}

impl<B, K, V> HashTableBucketPage<B, K, V>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
    K: Storable,
    V: Storable,
{
    pub fn init(&mut self, max_size: u32) {
        assert!(
            max_size <= Self::capacity(),
            "bucket max size {} exceeds page capacity {}",
            max_size,
            Self::capacity()
        );

        let data = self.data.as_mut();
        LittleEndian::write_u32(&mut data[SIZE_OFFSET..], 0);
        LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..], max_size);
    }

    fn set_size(&mut self, size: u32) {
        LittleEndian::write_u32(&mut self.data.as_mut()[SIZE_OFFSET..], size);
    }

    fn write_entry(&mut self, idx: u32, key: &K, value: &V) {
        let offset = Self::entry_offset(idx);
        let mut slot = &mut self.data.as_mut()[offset..offset + K::SIZE + V::SIZE];
        key.encode(&mut slot);
        value.encode(&mut slot);
    }

    /// Appends the entry. Fails if the bucket is full or the key is present.
    pub fn insert(&mut self, key: &K, value: &V, cmp: &impl KeyComparator<K>) -> bool {
        if self.is_full() || self.find(key, cmp).is_some() {
            return false;
        }

        let size = self.size();
        self.write_entry(size, key, value);
        self.set_size(size + 1);
        true
    }

    pub fn remove(&mut self, key: &K, cmp: &impl KeyComparator<K>) -> bool {
        match self.find(key, cmp) {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, idx: u32) {
        self.check_index(idx);

        let size = self.size();
        let start = Self::entry_offset(idx + 1);
        let end = Self::entry_offset(size);
        self.data
            .as_mut()
            .copy_within(start..end, Self::entry_offset(idx));
        self.set_size(size - 1);
    }

    pub fn clear(&mut self) {
        self.set_size(0);
    }
}
