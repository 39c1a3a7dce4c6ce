use thiserror::Error;

/// Failure reported through an `IoFuture` once the disk worker has run the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("disk write failed")]
    WriteFailed,

    #[error("disk read failed")]
    ReadFailed,

    /// The worker went away before completing the request.
    #[error("disk scheduler has shut down")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashTableError {
    #[error("key is already present")]
    DuplicateKey,

    #[error("directory cannot grow past max depth {max_depth}")]
    DirectoryFull { max_depth: u32 },

    #[error("no frame available in the buffer pool")]
    OutOfFrames,

    #[error("key not found")]
    KeyNotFound,

    #[error("invalid hash table configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is {value} but may be at most {limit}")]
    TooLarge {
        field: &'static str,
        value: u32,
        limit: u32,
    },
}
