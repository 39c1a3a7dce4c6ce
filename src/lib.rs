//! Storage core of the Geode kernel: a fixed-size buffer pool over a paged
//! disk store, and a disk-backed extendible hash index built from pool pages.

pub mod buffer;
pub mod config;
pub mod error;
pub mod index;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod tests;

pub use buffer::buffer_pool_manager::BufferPoolManager;
pub use config::{BufferPoolOptions, HashTableOptions};
pub use error::{ConfigError, DiskError, HashTableError};
pub use index::extendible_hash_table::DiskExtendibleHashTable;
pub use storage::page::page::{FrameId, PageId, INVALID_PAGE_ID};
