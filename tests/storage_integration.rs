//! Integration tests for the allocator stacks
//!
//! Exercises decorators over real leaf storages through the public API only.

use slabforge::error::{Error, Result};
use slabforge::{
    ArrayBuffer, BufferKind, ChunkStorage, PooledStorage, SegmentedStorage, Storage,
    StorageConfig, VersionedChunkStorage,
};

/// Chunk storage that counts how often it truly allocates and releases
struct CountingStorage {
    inner: ChunkStorage<u32, ArrayBuffer<u32>>,
    allocations: usize,
    releases: usize,
}

impl CountingStorage {
    fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: ChunkStorage::new(ArrayBuffer::new(capacity))?,
            allocations: 0,
            releases: 0,
        })
    }
}

impl Storage for CountingStorage {
    type Item = u32;
    type Handle = usize;

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn handle_bits(&self) -> u32 {
        self.inner.handle_bits()
    }

    fn allocate_with(&mut self, initial: u32) -> Result<usize> {
        self.allocations += 1;
        self.inner.allocate_with(initial)
    }

    fn release(&mut self, handle: usize) -> Result<()> {
        self.releases += 1;
        self.inner.release(handle)
    }

    fn get(&self, handle: usize) -> Result<&u32> {
        self.inner.get(handle)
    }

    fn get_mut(&mut self, handle: usize) -> Result<&mut u32> {
        self.inner.get_mut(handle)
    }

    fn for_each_allocated<F: FnMut(usize)>(&self, visitor: F) {
        self.inner.for_each_allocated(visitor)
    }

    fn dispose(&mut self) {
        self.inner.dispose()
    }
}

#[test]
fn test_pool_serves_released_handles_first() -> Result<()> {
    let mut storage = PooledStorage::new(2, CountingStorage::new(16)?);

    let handles: Vec<_> = (0..3).map(|_| storage.allocate()).collect::<Result<_>>()?;
    storage.release(handles[0])?;
    storage.release(handles[1])?;

    let again: Vec<_> = (0..2).map(|_| storage.allocate()).collect::<Result<_>>()?;

    // Three true allocations; the last two came out of the pool
    assert_eq!(storage.inner().allocations, 3);
    assert_eq!(storage.inner().releases, 0);
    assert_eq!(again, vec![handles[1], handles[0]]);
    assert_eq!(storage.len(), 3);
    Ok(())
}

#[test]
fn test_pool_overflow_truly_releases() -> Result<()> {
    let mut storage = PooledStorage::new(1, CountingStorage::new(16)?);
    let handles: Vec<_> = (0..4).map(|_| storage.allocate()).collect::<Result<_>>()?;
    for h in &handles {
        storage.release(*h)?;
    }

    assert_eq!(storage.pooled(), 1);
    assert_eq!(storage.inner().releases, 3);

    storage.clear()?;
    assert_eq!(storage.inner().releases, 4);
    assert!(storage.inner().is_empty());
    Ok(())
}

#[test]
fn test_segmented_over_pooled_segments() -> Result<()> {
    let mut storage = SegmentedStorage::new(|| -> Result<_> {
        Ok(PooledStorage::new(1, ChunkStorage::new(ArrayBuffer::<u32>::new(4))?))
    })?;

    let handles: Vec<_> = (0..10u32)
        .map(|i| storage.allocate_with(i * 10))
        .collect::<Result<_>>()?;
    assert_eq!(storage.segment_count(), 3);
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(*storage.get(*h)?, i as u32 * 10);
    }

    // Pooled records do not count as live, so segment 2 empties and is disposed
    storage.release(handles[8])?;
    assert_eq!(storage.live_segment_count(), 3);
    storage.release(handles[9])?;
    assert_eq!(storage.live_segment_count(), 2);
    assert!(matches!(storage.get(handles[8]), Err(Error::InvalidHandle(_))));

    *storage.get_mut(handles[0])? = 7;
    assert_eq!(*storage.get(handles[0])?, 7);
    assert_eq!(storage.len(), 8);
    assert_eq!(storage.handles().len(), 8);
    Ok(())
}

#[test]
fn test_versioned_stale_handle_after_reuse() -> Result<()> {
    let mut storage = VersionedChunkStorage::new(ArrayBuffer::<String>::new(2))?;
    let first = storage.allocate_with("first".to_string())?;
    storage.release(first)?;
    let second = storage.allocate_with("second".to_string())?;

    assert_eq!(first.index, second.index);
    assert!(matches!(storage.get(first), Err(Error::InvalidHandle(_))));
    assert_eq!(storage.get(second)?, "second");
    Ok(())
}

#[test]
fn test_every_buffer_kind_behaves_alike() -> Result<()> {
    for buffer in [
        BufferKind::Array,
        BufferKind::Sparse,
        BufferKind::Hash,
        BufferKind::Bucket,
    ] {
        let config = StorageConfig {
            capacity: 100,
            buffer,
            page_size: 8,
            ..StorageConfig::default()
        };
        let mut storage = config.chunk_storage::<u64>()?;

        let handles: Vec<_> = (0..100u64)
            .map(|i| storage.allocate_with(i))
            .collect::<Result<_>>()?;
        assert!(storage.is_full());

        for h in handles.iter().filter(|h| **h % 3 == 0) {
            storage.release(*h)?;
        }
        storage.validate()?;

        let live = storage.handles();
        assert_eq!(live.len(), 66, "buffer {}", buffer);
        for h in live {
            assert_eq!(*storage.get(h)?, h as u64);
        }
    }
    Ok(())
}

#[test]
fn test_config_file_roundtrip() -> Result<()> {
    let path = std::env::temp_dir().join("slabforge_config_roundtrip.toml");
    std::fs::write(
        &path,
        "capacity = 32\nbuffer = \"hash\"\npool_size = 4\nsegment_capacity = 8\n",
    )?;

    let config = StorageConfig::from_file(&path)?;
    std::fs::remove_file(&path)?;

    assert_eq!(config.capacity, 32);
    assert_eq!(config.buffer, BufferKind::Hash);
    assert_eq!(config.page_size, 256);

    let mut segmented = config.segmented_storage::<u8>()?;
    for _ in 0..20 {
        segmented.allocate()?;
    }
    assert_eq!(segmented.segment_count(), 3);
    Ok(())
}

#[test]
fn test_missing_config_file() {
    let result = StorageConfig::from_file("/nonexistent/slabforge.toml");
    assert!(matches!(result, Err(Error::Io(_))));
}
