//! Versioned chunk storage
//!
//! Same chunk bookkeeping as [`super::ChunkStorage`], plus a generation per
//! index so handles to a since-reused slot are rejected instead of aliasing
//! the new record.
//!
//! Generation encoding:
//! - positive: the slot is live with this generation
//! - negative: the slot was released; its last live generation was `-g`
//! - absent:   the index was never handed out

use super::list::{Chunk, ChunkList, ChunkStats};
use crate::error::{Error, Result};
use crate::storage::buffer::Buffer;
use crate::storage::engine::{RawHandle, Storage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// Generational handle: an index plus the generation it was allocated under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionedHandle {
    pub index: u32,
    pub generation: i32,
}

impl VersionedHandle {
    pub fn new(index: u32, generation: i32) -> Self {
        Self { index, generation }
    }

    pub fn slot(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for VersionedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(index={}, gen={})", self.index, self.generation)
    }
}

impl RawHandle for VersionedHandle {
    fn into_raw(self) -> u64 {
        (self.generation as u32 as u64) << 32 | self.index as u64
    }

    fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32 as i32,
        }
    }
}

/// Next live generation for a slot whose stored generation is `stored`
fn next_generation(stored: i32) -> i32 {
    stored
        .checked_neg()
        .and_then(|g| g.checked_add(1))
        .filter(|g| *g > 0)
        .unwrap_or(1)
}

/// Chunk allocator with use-after-release detection
#[derive(Debug)]
pub struct VersionedChunkStorage<T, B> {
    buffer: B,
    chunks: ChunkList,
    generations: Vec<i32>,
    _marker: PhantomData<T>,
}

impl<T, B: Buffer<T>> VersionedChunkStorage<T, B> {
    pub fn new(buffer: B) -> Result<Self> {
        super::check_capacity(buffer.capacity())?;
        let chunks = ChunkList::new(buffer.capacity())?;
        Ok(Self {
            buffer,
            chunks,
            generations: Vec::new(),
            _marker: PhantomData,
        })
    }

    /// Whether `handle` refers to a live slot under its current generation
    pub fn is_valid(&self, handle: VersionedHandle) -> bool {
        handle.generation > 0
            && self.generations.get(handle.slot()).copied() == Some(handle.generation)
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.chunks()
    }

    pub fn stats(&self) -> ChunkStats {
        self.chunks.stats()
    }

    pub fn validate(&self) -> Result<()> {
        self.chunks.validate()
    }

    fn check(&self, handle: VersionedHandle) -> Result<()> {
        if self.is_valid(handle) {
            return Ok(());
        }
        Err(Error::InvalidHandle(format!("{} is stale or was never allocated", handle)))
    }
}

impl<T, B: Buffer<T>> Storage for VersionedChunkStorage<T, B> {
    type Item = T;
    type Handle = VersionedHandle;

    fn capacity(&self) -> usize {
        self.chunks.capacity()
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn handle_bits(&self) -> u32 {
        64
    }

    fn allocate_with(&mut self, initial: T) -> Result<VersionedHandle> {
        let index = self.chunks.allocate()?;
        if let Err(e) = self.buffer.create(index, initial) {
            self.chunks.release(index)?;
            return Err(e);
        }

        let generation = match self.generations.get_mut(index) {
            Some(stored) => {
                *stored = next_generation(*stored);
                *stored
            }
            None => {
                // Indices are handed out left-most first, so a fresh one is always next
                if index != self.generations.len() {
                    return Err(Error::InvariantViolation(format!(
                        "fresh index {} skips past generation table of length {}",
                        index,
                        self.generations.len()
                    )));
                }
                self.generations.push(1);
                1
            }
        };

        let handle = VersionedHandle::new(index as u32, generation);
        trace!(%handle, "Allocated versioned slot");
        Ok(handle)
    }

    fn release(&mut self, handle: VersionedHandle) -> Result<()> {
        self.check(handle)?;
        let index = handle.slot();
        self.chunks.release(index)?;
        self.buffer.release(index);
        self.generations[index] = -handle.generation;
        trace!(%handle, "Released versioned slot");
        Ok(())
    }

    fn get(&self, handle: VersionedHandle) -> Result<&T> {
        self.check(handle)?;
        self.buffer
            .get(handle.slot())
            .ok_or_else(|| Error::InvariantViolation(format!("{} is live but unbuffered", handle)))
    }

    fn get_mut(&mut self, handle: VersionedHandle) -> Result<&mut T> {
        self.check(handle)?;
        self.buffer
            .get_mut(handle.slot())
            .ok_or_else(|| Error::InvariantViolation(format!("{} is live but unbuffered", handle)))
    }

    fn for_each_allocated<F: FnMut(VersionedHandle)>(&self, mut visitor: F) {
        self.chunks.for_each_allocated(|index| {
            visitor(VersionedHandle::new(index as u32, self.generations[index]))
        });
    }

    /// Clears records and chunks; generations survive so old handles stay stale
    fn dispose(&mut self) {
        if self.chunks.is_empty() && self.buffer.is_empty() {
            return;
        }
        debug!(released = self.chunks.len(), "Disposing versioned chunk storage");
        for generation in self.generations.iter_mut().filter(|g| **g > 0) {
            *generation = -*generation;
        }
        self.buffer.clear();
        self.chunks.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::ArrayBuffer;

    fn storage(capacity: usize) -> VersionedChunkStorage<u32, ArrayBuffer<u32>> {
        VersionedChunkStorage::new(ArrayBuffer::new(capacity)).unwrap()
    }

    #[test]
    fn test_first_generation_is_one() -> Result<()> {
        let mut storage = storage(4);
        let handle = storage.allocate()?;
        assert_eq!(handle, VersionedHandle::new(0, 1));
        assert!(storage.is_valid(handle));
        Ok(())
    }

    #[test]
    fn test_stale_handle_rejected() -> Result<()> {
        let mut storage = storage(4);
        let stale = storage.allocate_with(5)?;
        storage.release(stale)?;

        let fresh = storage.allocate_with(6)?;
        assert_eq!(fresh.index, stale.index);
        assert_ne!(fresh.generation, stale.generation);

        assert!(matches!(storage.get(stale), Err(Error::InvalidHandle(_))));
        assert!(matches!(storage.release(stale), Err(Error::InvalidHandle(_))));
        assert_eq!(*storage.get(fresh)?, 6);
        Ok(())
    }

    #[test]
    fn test_generation_increments_on_reuse() -> Result<()> {
        let mut storage = storage(1);
        let mut last = 0;
        for _ in 0..5 {
            let handle = storage.allocate()?;
            assert!(handle.generation > last);
            last = handle.generation;
            storage.release(handle)?;
        }
        assert_eq!(last, 5);
        Ok(())
    }

    #[test]
    fn test_double_release_rejected() -> Result<()> {
        let mut storage = storage(2);
        let handle = storage.allocate()?;
        storage.release(handle)?;
        assert!(matches!(storage.release(handle), Err(Error::InvalidHandle(_))));
        assert!(matches!(
            storage.get(VersionedHandle::new(1, 1)),
            Err(Error::InvalidHandle(_))
        ));
        Ok(())
    }

    #[test]
    fn test_generation_overflow_wraps_to_one() {
        assert_eq!(next_generation(-i32::MAX), 1);
        assert_eq!(next_generation(i32::MIN), 1);
        assert_eq!(next_generation(-3), 4);
    }

    #[test]
    fn test_iterate_reports_current_generation() -> Result<()> {
        let mut storage = storage(4);
        let a = storage.allocate()?;
        let b = storage.allocate()?;
        storage.release(a)?;
        let c = storage.allocate()?;

        assert_eq!(storage.handles(), vec![c, b]);
        assert_eq!(c.generation, 2);
        Ok(())
    }

    #[test]
    fn test_dispose_invalidates_handles() -> Result<()> {
        let mut storage = storage(4);
        let handle = storage.allocate()?;

        storage.dispose();
        assert!(!storage.is_valid(handle));

        let again = storage.allocate()?;
        assert_eq!(again.index, handle.index);
        assert_eq!(again.generation, 2);
        Ok(())
    }

    /// Buffer whose `create` always fails
    struct FullBuffer;

    impl Buffer<u32> for FullBuffer {
        fn capacity(&self) -> usize {
            2
        }

        fn len(&self) -> usize {
            0
        }

        fn create(&mut self, index: usize, _value: u32) -> Result<&mut u32> {
            Err(Error::InvalidHandle(format!("index {} rejected", index)))
        }

        fn get(&self, _index: usize) -> Option<&u32> {
            None
        }

        fn get_mut(&mut self, _index: usize) -> Option<&mut u32> {
            None
        }

        fn release(&mut self, _index: usize) -> Option<u32> {
            None
        }

        fn clear(&mut self) {}
    }

    #[test]
    fn test_failed_buffer_create_leaves_no_generation() -> Result<()> {
        let mut storage = VersionedChunkStorage::new(FullBuffer)?;

        assert!(matches!(storage.allocate(), Err(Error::InvalidHandle(_))));
        assert!(storage.is_empty());
        assert!(!storage.is_valid(VersionedHandle::new(0, 1)));
        storage.validate()?;

        // The index is handed out again, not leaked
        assert!(matches!(storage.allocate(), Err(Error::InvalidHandle(_))));
        assert_eq!(storage.stats().free, 2);
        Ok(())
    }

    #[test]
    fn test_raw_roundtrip() {
        let handle = VersionedHandle::new(u32::MAX, -7);
        assert_eq!(VersionedHandle::from_raw(handle.into_raw()), handle);
    }
}
