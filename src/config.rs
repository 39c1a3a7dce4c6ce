//! Construction options for the buffer pool and the hash index.

use crate::{
    error::ConfigError,
    storage::page::{
        hash_table_directory_page::HTABLE_DIRECTORY_MAX_DEPTH,
        hash_table_header_page::HTABLE_HEADER_MAX_DEPTH,
    },
};

pub const DEFAULT_POOL_SIZE: usize = 64;
pub const DEFAULT_REPLACER_K: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolOptions {
    // Number of frames, allocated once at construction
    pub pool_size: usize,
    // History depth of the LRU-K replacer
    pub replacer_k: usize,
}

impl BufferPoolOptions {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn with_replacer_k(mut self, replacer_k: usize) -> Self {
        self.replacer_k = replacer_k;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Zero { field: "pool_size" });
        }
        if self.replacer_k == 0 {
            return Err(ConfigError::Zero {
                field: "replacer_k",
            });
        }
        Ok(())
    }
}

impl Default for BufferPoolOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }
}

/// Shape of one extendible hash index. Fixed for the lifetime of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTableOptions {
    /// Number of high hash bits the header uses to pick a directory.
    pub header_max_depth: u32,
    /// Upper bound on a directory's global depth.
    pub directory_max_depth: u32,
    /// Entries a bucket may hold before it has to split.
    pub bucket_max_size: u32,
}

impl HashTableOptions {
    pub fn new(header_max_depth: u32, directory_max_depth: u32, bucket_max_size: u32) -> Self {
        Self {
            header_max_depth,
            directory_max_depth,
            bucket_max_size,
        }
    }

    pub fn with_header_max_depth(mut self, depth: u32) -> Self {
        self.header_max_depth = depth;
        self
    }

    pub fn with_directory_max_depth(mut self, depth: u32) -> Self {
        self.directory_max_depth = depth;
        self
    }

    pub fn with_bucket_max_size(mut self, size: u32) -> Self {
        self.bucket_max_size = size;
        self
    }

    /// Checks the depths against the page layouts. The bucket bound is
    /// checked again by the index against the entry width of its key and value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header_max_depth > HTABLE_HEADER_MAX_DEPTH {
            return Err(ConfigError::TooLarge {
                field: "header_max_depth",
                value: self.header_max_depth,
                limit: HTABLE_HEADER_MAX_DEPTH,
            });
        }
        if self.directory_max_depth > HTABLE_DIRECTORY_MAX_DEPTH {
            return Err(ConfigError::TooLarge {
                field: "directory_max_depth",
                value: self.directory_max_depth,
                limit: HTABLE_DIRECTORY_MAX_DEPTH,
            });
        }
        if self.bucket_max_size == 0 {
            return Err(ConfigError::Zero {
                field: "bucket_max_size",
            });
        }
        Ok(())
    }
}

impl Default for HashTableOptions {
    fn default() -> Self {
        Self {
            header_max_depth: 0,
            directory_max_depth: HTABLE_DIRECTORY_MAX_DEPTH,
            bucket_max_size: 64,
        }
    }
}
