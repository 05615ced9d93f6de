//! Storage configuration
//!
//! Describes an allocator stack and builds it. Loaded from TOML:
//!
//! ```toml
//! capacity = 4096
//! buffer = "sparse"
//! page_size = 256
//! pool_size = 64
//! segment_capacity = 1024
//! ```

use crate::error::{Error, Result};
use crate::storage::chunk::MAX_CHUNK_CAPACITY;
use crate::storage::{
    AnyBuffer, ChunkStorage, FixedArrayStorage, PooledStorage, SegmentedStorage, StorageFactory,
    VersionedChunkStorage,
};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// Backing buffer backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    /// Dense array, fastest lookups
    #[default]
    Array,
    /// Paged sparse set, memory proportional to live pages
    Sparse,
    /// Hash map, memory proportional to live records
    Hash,
    /// Fixed-size buckets allocated on first touch
    Bucket,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Array => write!(f, "array"),
            Self::Sparse => write!(f, "sparse"),
            Self::Hash => write!(f, "hash"),
            Self::Bucket => write!(f, "bucket"),
        }
    }
}

impl std::str::FromStr for BufferKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "array" => Ok(Self::Array),
            "sparse" => Ok(Self::Sparse),
            "hash" => Ok(Self::Hash),
            "bucket" => Ok(Self::Bucket),
            other => Err(Error::Config(format!("unknown buffer kind '{}'", other))),
        }
    }
}

/// Allocator stack configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Capacity of a bounded storage
    pub capacity: usize,
    /// Backing buffer backend
    pub buffer: BufferKind,
    /// Page size for sparse buffers, bucket size for bucket buffers
    pub page_size: usize,
    /// Released handles kept for reuse (0 disables pooling)
    pub pool_size: usize,
    /// Capacity of each segment of a segmented storage
    pub segment_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            buffer: BufferKind::Array,
            page_size: 256,
            pool_size: 0,
            segment_capacity: 1024,
        }
    }
}

impl StorageConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading storage config");
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfiguration("capacity must be positive".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfiguration("page_size must be positive".to_string()));
        }
        if self.segment_capacity == 0 || self.segment_capacity > MAX_CHUNK_CAPACITY {
            return Err(Error::InvalidConfiguration(format!(
                "segment_capacity must be in 1..={}, got {}",
                MAX_CHUNK_CAPACITY, self.segment_capacity
            )));
        }
        Ok(())
    }

    fn buffer<T>(&self, capacity: usize) -> AnyBuffer<T> {
        AnyBuffer::new(self.buffer, capacity, self.page_size)
    }

    /// Unversioned chunk storage of `capacity` records
    pub fn chunk_storage<T>(&self) -> Result<ChunkStorage<T, AnyBuffer<T>>> {
        self.validate()?;
        ChunkStorage::new(self.buffer(self.capacity))
    }

    /// Versioned chunk storage of `capacity` records
    pub fn versioned_storage<T>(&self) -> Result<VersionedChunkStorage<T, AnyBuffer<T>>> {
        self.validate()?;
        VersionedChunkStorage::new(self.buffer(self.capacity))
    }

    /// Fixed array storage of `capacity` records
    pub fn fixed_storage<T>(&self) -> Result<FixedArrayStorage<T>> {
        self.validate()?;
        FixedArrayStorage::new(self.capacity)
    }

    /// Chunk storage behind a pool of `pool_size` handles
    pub fn pooled_storage<T: Default>(&self) -> Result<PooledStorage<ChunkStorage<T, AnyBuffer<T>>>> {
        Ok(PooledStorage::new(self.pool_size, self.chunk_storage()?))
    }

    /// Unbounded storage of pooled chunk segments
    pub fn segmented_storage<T: Default>(&self) -> Result<SegmentedStorage<SegmentFactory<T>>> {
        self.validate()?;
        SegmentedStorage::new(SegmentFactory::new(self.clone()))
    }
}

/// Builds one pooled chunk storage per segment
#[derive(Debug, Clone)]
pub struct SegmentFactory<T> {
    config: StorageConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SegmentFactory<T> {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }
}

impl<T: Default> StorageFactory for SegmentFactory<T> {
    type Output = PooledStorage<ChunkStorage<T, AnyBuffer<T>>>;

    fn create(&mut self) -> Result<Self::Output> {
        let buffer = self.config.buffer(self.config.segment_capacity);
        Ok(PooledStorage::new(self.config.pool_size, ChunkStorage::new(buffer)?))
    }
}
