//! Unversioned chunk storage

use super::list::{Chunk, ChunkList, ChunkStats};
use crate::error::{Error, Result};
use crate::storage::buffer::Buffer;
use crate::storage::engine::Storage;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// Chunk allocator over a backing buffer
///
/// Handles are raw buffer indices. A handle used after release either fails
/// with `InvalidHandle` or, once the index is reused, aliases the new record;
/// use [`super::VersionedChunkStorage`] when that matters.
#[derive(Debug)]
pub struct ChunkStorage<T, B> {
    buffer: B,
    chunks: ChunkList,
    _marker: PhantomData<T>,
}

impl<T, B: Buffer<T>> ChunkStorage<T, B> {
    /// Create a storage spanning the whole buffer
    pub fn new(buffer: B) -> Result<Self> {
        super::check_capacity(buffer.capacity())?;
        let chunks = ChunkList::new(buffer.capacity())?;
        Ok(Self {
            buffer,
            chunks,
            _marker: PhantomData,
        })
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Ordered snapshot of the chunk partition
    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.chunks()
    }

    pub fn stats(&self) -> ChunkStats {
        self.chunks.stats()
    }

    /// Check the chunk partition invariants
    pub fn validate(&self) -> Result<()> {
        self.chunks.validate()
    }

    fn invalid(index: usize) -> Error {
        Error::InvalidHandle(format!("index {} is not allocated", index))
    }
}

impl<T, B: Buffer<T>> Storage for ChunkStorage<T, B> {
    type Item = T;
    type Handle = usize;

    fn capacity(&self) -> usize {
        self.chunks.capacity()
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn handle_bits(&self) -> u32 {
        32
    }

    fn allocate_with(&mut self, initial: T) -> Result<usize> {
        let index = self.chunks.allocate()?;
        if let Err(e) = self.buffer.create(index, initial) {
            self.chunks.release(index)?;
            return Err(e);
        }
        trace!(index, "Allocated chunk slot");
        Ok(index)
    }

    fn release(&mut self, index: usize) -> Result<()> {
        if !self.buffer.contains(index) {
            return Err(Self::invalid(index));
        }
        self.chunks.release(index)?;
        self.buffer.release(index);
        trace!(index, "Released chunk slot");
        Ok(())
    }

    fn get(&self, index: usize) -> Result<&T> {
        self.buffer.get(index).ok_or_else(|| Self::invalid(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        self.buffer.get_mut(index).ok_or_else(|| Self::invalid(index))
    }

    fn for_each_allocated<F: FnMut(usize)>(&self, visitor: F) {
        self.chunks.for_each_allocated(visitor);
    }

    fn dispose(&mut self) {
        if self.chunks.is_empty() && self.buffer.is_empty() {
            return;
        }
        debug!(
            released = self.chunks.len(),
            capacity = self.chunks.capacity(),
            "Disposing chunk storage"
        );
        self.buffer.clear();
        self.chunks.reset();
    }
}
