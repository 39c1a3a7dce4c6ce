//! First level of a disk extendible hash index.
//!
//! Layout:
//! ```text
//! | directory_page_ids (512 x u32) | max_depth (u32) |
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::page::{PageId, INVALID_PAGE_ID};

pub const HTABLE_HEADER_MAX_DEPTH: u32 = 9;
pub const HTABLE_HEADER_ARRAY_SIZE: usize = 1 << HTABLE_HEADER_MAX_DEPTH;

const DIRECTORY_IDS_OFFSET: usize = 0;
const MAX_DEPTH_OFFSET: usize = DIRECTORY_IDS_OFFSET + HTABLE_HEADER_ARRAY_SIZE * 4;

/// View over the bytes of a header page. Works on anything that derefs to a
/// page, mutation needs a mutable buffer.
pub struct HashTableHeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HashTableHeaderPage<B> {
    pub fn new(data: B) -> Self {
        HashTableHeaderPage { data }
    }

    pub fn max_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[MAX_DEPTH_OFFSET..])
    }

    /// Number of directory slots in use.
    pub fn max_size(&self) -> u32 {
        1 << self.max_depth()
    }

    /// The top `max_depth` bits of the hash select the directory.
    pub fn hash_to_directory_index(&self, hash: u32) -> u32 {
        match self.max_depth() {
            0 => 0,
            depth => hash >> (32 - depth),
        }
    }

    pub fn get_directory_page_id(&self, directory_idx: u32) -> PageId {
        self.check_index(directory_idx);
        let offset = DIRECTORY_IDS_OFFSET + directory_idx as usize * 4;
        LittleEndian::read_u32(&self.data.as_ref()[offset..])
    }

    fn check_index(&self, directory_idx: u32) {
        assert!(
            directory_idx < self.max_size(),
            "directory index {} out of range for header of depth {}",
            directory_idx,
            self.max_depth()
        );
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashTableHeaderPage<B> {
    /// Formats a fresh header with every directory slot empty.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= HTABLE_HEADER_MAX_DEPTH,
            "header depth {} exceeds {}",
            max_depth,
            HTABLE_HEADER_MAX_DEPTH
        );

        let data = self.data.as_mut();
        LittleEndian::write_u32(&mut data[MAX_DEPTH_OFFSET..], max_depth);
        for idx in 0..HTABLE_HEADER_ARRAY_SIZE {
            let offset = DIRECTORY_IDS_OFFSET + idx * 4;
            LittleEndian::write_u32(&mut data[offset..], INVALID_PAGE_ID);
        }
    }

    pub fn set_directory_page_id(&mut self, directory_idx: u32, directory_page_id: PageId) {
        self.check_index(directory_idx);
        let offset = DIRECTORY_IDS_OFFSET + directory_idx as usize * 4;
        LittleEndian::write_u32(&mut self.data.as_mut()[offset..], directory_page_id);
    }
}
