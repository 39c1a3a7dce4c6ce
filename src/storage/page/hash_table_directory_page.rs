//! Second level of a disk extendible hash index.
//!
//! Layout:
//! ```text
//! | max_depth (u32) | global_depth (u32) | local_depths (512 x u8) | bucket_page_ids (512 x u32) |
//! ```
//! Only the first `2^global_depth` slots are live.

use std::collections::HashMap;

use anyhow::ensure;
use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::page::{PageId, INVALID_PAGE_ID};

pub const HTABLE_DIRECTORY_MAX_DEPTH: u32 = 9;
pub const HTABLE_DIRECTORY_ARRAY_SIZE: usize = 1 << HTABLE_DIRECTORY_MAX_DEPTH;

const MAX_DEPTH_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + HTABLE_DIRECTORY_ARRAY_SIZE;

pub struct HashTableDirectoryPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashTableDirectoryPage<B> {
    pub fn new(data: B) -> Self {
        HashTableDirectoryPage { data }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn max_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes()[MAX_DEPTH_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes()[GLOBAL_DEPTH_OFFSET..])
    }

    /// Number of live slots.
    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    pub fn max_size(&self) -> u32 {
        1 << self.max_depth()
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    pub fn local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1 << self.get_local_depth(bucket_idx)) - 1
    }

    /// The low `global_depth` bits of the hash select the slot.
    pub fn hash_to_bucket_index(&self, hash: u32) -> u32 {
        hash & self.global_depth_mask()
    }

    pub fn get_bucket_page_id(&self, bucket_idx: u32) -> PageId {
        self.check_index(bucket_idx);
        let offset = BUCKET_IDS_OFFSET + bucket_idx as usize * 4;
        LittleEndian::read_u32(&self.bytes()[offset..])
    }

    pub fn get_local_depth(&self, bucket_idx: u32) -> u32 {
        self.check_index(bucket_idx);
        self.bytes()[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] as u32
    }

    /// Slot that differs from `bucket_idx` only in bit `local_depth - 1`.
    pub fn get_split_image_index(&self, bucket_idx: u32) -> u32 {
        let local_depth = self.get_local_depth(bucket_idx);
        assert!(local_depth > 0, "bucket at depth 0 has no split image");
        bucket_idx ^ (1 << (local_depth - 1))
    }

    /// True when every live slot has a local depth below the global depth.
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        global_depth > 0 && (0..self.size()).all(|idx| self.get_local_depth(idx) < global_depth)
    }

    /// Checks the directory invariants:
    /// - every local depth is at most the global depth
    /// - a bucket with local depth `d` is referenced by exactly `2^(global - d)` slots
    /// - two slots share a bucket exactly when they agree on the low `d` bits
    pub fn verify_integrity(&self) -> anyhow::Result<()> {
        let global_depth = self.global_depth();
        ensure!(
            global_depth <= self.max_depth(),
            "global depth {} exceeds max depth {}",
            global_depth,
            self.max_depth()
        );

        let mut page_id_to_count: HashMap<PageId, u32> = HashMap::new();
        let mut page_id_to_local_depth: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.get_bucket_page_id(idx);
            let local_depth = self.get_local_depth(idx);

            ensure!(page_id != INVALID_PAGE_ID, "slot {} has no bucket", idx);
            ensure!(
                local_depth <= global_depth,
                "slot {} has local depth {} above global depth {}",
                idx,
                local_depth,
                global_depth
            );

            *page_id_to_count.entry(page_id).or_insert(0) += 1;
            let expected = *page_id_to_local_depth.entry(page_id).or_insert(local_depth);
            ensure!(
                expected == local_depth,
                "bucket page {} is referenced with local depths {} and {}",
                page_id,
                expected,
                local_depth
            );
        }

        for (page_id, count) in &page_id_to_count {
            let local_depth = page_id_to_local_depth[page_id];
            let required = 1 << (global_depth - local_depth);
            ensure!(
                *count == required,
                "bucket page {} with local depth {} is referenced by {} slots, expected {}",
                page_id,
                local_depth,
                count,
                required
            );
        }

        for idx in 0..self.size() {
            let mask = self.local_depth_mask(idx);
            for other in 0..self.size() {
                let shares_bucket = self.get_bucket_page_id(idx) == self.get_bucket_page_id(other);
                ensure!(
                    shares_bucket == ((idx & mask) == (other & mask)),
                    "slots {} and {} disagree with local depth {}",
                    idx,
                    other,
                    self.get_local_depth(idx)
                );
            }
        }

        Ok(())
    }

    fn check_index(&self, bucket_idx: u32) {
        assert!(
            (bucket_idx as usize) < HTABLE_DIRECTORY_ARRAY_SIZE,
            "bucket index {} out of range",
            bucket_idx
        );
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashTableDirectoryPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Formats an empty directory: depth 0 and no buckets.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= HTABLE_DIRECTORY_MAX_DEPTH,
            "directory depth {} exceeds {}",
            max_depth,
            HTABLE_DIRECTORY_MAX_DEPTH
        );

        let data = self.bytes_mut();
        LittleEndian::write_u32(&mut data[MAX_DEPTH_OFFSET..], max_depth);
        LittleEndian::write_u32(&mut data[GLOBAL_DEPTH_OFFSET..], 0);
        data[LOCAL_DEPTHS_OFFSET..BUCKET_IDS_OFFSET].fill(0);
        for idx in 0..HTABLE_DIRECTORY_ARRAY_SIZE {
            let offset = BUCKET_IDS_OFFSET + idx * 4;
            LittleEndian::write_u32(&mut data[offset..], INVALID_PAGE_ID);
        }
    }

    fn set_global_depth(&mut self, global_depth: u32) {
        LittleEndian::write_u32(&mut self.bytes_mut()[GLOBAL_DEPTH_OFFSET..], global_depth);
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, bucket_page_id: PageId) {
        self.check_index(bucket_idx);
        let offset = BUCKET_IDS_OFFSET + bucket_idx as usize * 4;
        LittleEndian::write_u32(&mut self.bytes_mut()[offset..], bucket_page_id);
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u32) {
        self.check_index(bucket_idx);
        assert!(
            local_depth <= self.max_depth(),
            "local depth {} exceeds max depth {}",
            local_depth,
            self.max_depth()
        );
        self.bytes_mut()[LOCAL_DEPTHS_OFFSET + bucket_idx as usize] = local_depth as u8;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        let local_depth = self.get_local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, local_depth + 1);
    }

    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        let local_depth = self.get_local_depth(bucket_idx);
        assert!(local_depth > 0, "local depth of slot {} is already 0", bucket_idx);
        self.set_local_depth(bucket_idx, local_depth - 1);
    }

    /// Doubles the directory. Slot `i + size` mirrors slot `i`.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(
            global_depth < self.max_depth(),
            "directory is already at max depth {}",
            self.max_depth()
        );

        let size = self.size();
        for idx in 0..size {
            let page_id = self.get_bucket_page_id(idx);
            let local_depth = self.get_local_depth(idx);
            self.set_bucket_page_id(idx + size, page_id);
            self.set_local_depth(idx + size, local_depth);
        }
        self.set_global_depth(global_depth + 1);
    }

    /// Halves the directory, clearing the upper half of the slots.
    pub fn decr_global_depth(&mut self) {
        let global_depth = self.global_depth();
        assert!(global_depth > 0, "directory is already at depth 0");

        let half = self.size() / 2;
        for idx in half..self.size() {
            self.set_bucket_page_id(idx, INVALID_PAGE_ID);
            self.set_local_depth(idx, 0);
        }
        self.set_global_depth(global_depth - 1);
    }
}
