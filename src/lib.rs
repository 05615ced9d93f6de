// Slabforge - slot allocation engine
// Stable handles over uniformly-sized records

#![warn(rust_2018_idioms)]

pub mod config;
pub mod storage;

// Re-exports for convenience
pub use config::{BufferKind, StorageConfig};
pub use storage::{
    AnyBuffer, ArrayBuffer, BucketBuffer, Buffer, Chunk, ChunkList, ChunkStats, ChunkStorage,
    FixedArrayStorage, HashBuffer, PooledStorage, RawHandle, SegmentedHandle, SegmentedStorage,
    SparseBuffer, SparseSet, Storage, StorageFactory, VersionedChunkStorage, VersionedHandle,
    UNBOUNDED_CAPACITY,
};

/// Slabforge error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Capacity exceeded: storage of capacity {capacity} is full")]
        CapacityExceeded { capacity: usize },

        #[error("Invalid handle: {0}")]
        InvalidHandle(String),

        #[error("Invalid configuration: {0}")]
        InvalidConfiguration(String),

        #[error("Internal invariant violated: {0}")]
        InvariantViolation(String),

        #[error("Index {index} out of range for capacity {capacity}")]
        IndexOutOfRange { index: usize, capacity: usize },

        #[error("Config error: {0}")]
        Config(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CapacityExceeded { capacity: 8 };
        assert_eq!(err.to_string(), "Capacity exceeded: storage of capacity 8 is full");

        let err = Error::IndexOutOfRange {
            index: 10,
            capacity: 4,
        };
        assert!(err.to_string().contains("10"));
    }
}
