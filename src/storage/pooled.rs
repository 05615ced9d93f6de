//! Pooling decorator
//!
//! Keeps up to `pool_size` released handles alive in the inner storage and
//! hands them back out before asking the inner storage for a new slot.
//!
//! ```text
//! allocate ─→ pool non-empty? ─yes─→ pop pooled handle
//!                   └─no──→ inner.allocate
//! release  ─→ pool < pool_size? ─yes─→ reset record, push handle
//!                   └─no──→ inner.release
//! ```

use crate::error::{Error, Result};
use crate::storage::engine::Storage;
use std::collections::HashSet;
use tracing::{debug, trace};

pub struct PooledStorage<S: Storage> {
    inner: S,
    pool_size: usize,
    /// LIFO stack of pooled handles
    pooled: Vec<S::Handle>,
    /// Pool membership, for rejecting pooled handles
    members: HashSet<S::Handle>,
}

impl<S: Storage> PooledStorage<S>
where
    S::Item: Default,
{
    pub fn new(pool_size: usize, inner: S) -> Self {
        Self {
            inner,
            pool_size,
            pooled: Vec::with_capacity(pool_size.min(1024)),
            members: HashSet::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of handles currently pooled
    pub fn pooled(&self) -> usize {
        self.pooled.len()
    }

    /// Change the pool bound, truly releasing any surplus
    pub fn set_pool_size(&mut self, pool_size: usize) -> Result<()> {
        self.pool_size = pool_size;
        while self.pooled.len() > pool_size {
            self.release_pooled()?;
        }
        Ok(())
    }

    /// Truly release every pooled handle
    pub fn clear(&mut self) -> Result<()> {
        if self.pooled.is_empty() {
            return Ok(());
        }
        debug!(count = self.pooled.len(), "Flushing handle pool");
        while !self.pooled.is_empty() {
            self.release_pooled()?;
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<S> {
        self.clear()?;
        Ok(self.inner)
    }

    fn release_pooled(&mut self) -> Result<()> {
        if let Some(handle) = self.pooled.pop() {
            self.members.remove(&handle);
            self.inner.release(handle)?;
        }
        Ok(())
    }

    fn take_pooled(&mut self) -> Option<S::Handle> {
        let handle = self.pooled.pop()?;
        self.members.remove(&handle);
        Some(handle)
    }

    fn check(&self, handle: S::Handle) -> Result<()> {
        if self.members.contains(&handle) {
            return Err(Error::InvalidHandle(format!("{:?} is pooled, not allocated", handle)));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for PooledStorage<S>
where
    S::Item: Default,
{
    type Item = S::Item;
    type Handle = S::Handle;

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn len(&self) -> usize {
        self.inner.len() - self.pooled.len()
    }

    fn handle_bits(&self) -> u32 {
        self.inner.handle_bits()
    }

    fn allocate(&mut self) -> Result<S::Handle> {
        match self.take_pooled() {
            Some(handle) => {
                trace!(?handle, "Reused pooled handle");
                Ok(handle)
            }
            None => self.inner.allocate(),
        }
    }

    fn allocate_with(&mut self, initial: S::Item) -> Result<S::Handle> {
        match self.take_pooled() {
            Some(handle) => {
                *self.inner.get_mut(handle)? = initial;
                trace!(?handle, "Reused pooled handle");
                Ok(handle)
            }
            None => self.inner.allocate_with(initial),
        }
    }

    fn release(&mut self, handle: S::Handle) -> Result<()> {
        self.check(handle)?;
        if self.pooled.len() < self.pool_size {
            *self.inner.get_mut(handle)? = S::Item::default();
            self.pooled.push(handle);
            self.members.insert(handle);
            trace!(?handle, "Pooled released handle");
            Ok(())
        } else {
            self.inner.release(handle)
        }
    }

    fn get(&self, handle: S::Handle) -> Result<&S::Item> {
        self.check(handle)?;
        self.inner.get(handle)
    }

    fn get_mut(&mut self, handle: S::Handle) -> Result<&mut S::Item> {
        self.check(handle)?;
        self.inner.get_mut(handle)
    }

    fn for_each_allocated<F: FnMut(S::Handle)>(&self, mut visitor: F) {
        self.inner.for_each_allocated(|handle| {
            if !self.members.contains(&handle) {
                visitor(handle);
            }
        });
    }

    fn dispose(&mut self) {
        self.pooled.clear();
        self.members.clear();
        self.inner.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::ArrayBuffer;
    use crate::storage::chunk::ChunkStorage;

    fn pooled(pool_size: usize, capacity: usize) -> PooledStorage<ChunkStorage<u32, ArrayBuffer<u32>>> {
        PooledStorage::new(pool_size, ChunkStorage::new(ArrayBuffer::new(capacity)).unwrap())
    }

    #[test]
    fn test_pool_reuses_released() -> Result<()> {
        let mut storage = pooled(2, 8);
        let a = storage.allocate_with(1)?;
        let _b = storage.allocate_with(2)?;

        storage.release(a)?;
        assert_eq!(storage.pooled(), 1);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.inner().len(), 2);

        let c = storage.allocate()?;
        assert_eq!(c, a);
        // Pooled records come back reset
        assert_eq!(*storage.get(c)?, 0);
        Ok(())
    }

    #[test]
    fn test_pool_bound() -> Result<()> {
        let mut storage = pooled(1, 8);
        let a = storage.allocate()?;
        let b = storage.allocate()?;

        storage.release(a)?;
        storage.release(b)?;

        assert_eq!(storage.pooled(), 1);
        assert_eq!(storage.inner().len(), 1);
        Ok(())
    }

    #[test]
    fn test_pooled_handle_is_invalid() -> Result<()> {
        let mut storage = pooled(4, 8);
        let a = storage.allocate()?;
        storage.release(a)?;

        assert!(matches!(storage.get(a), Err(Error::InvalidHandle(_))));
        assert!(matches!(storage.release(a), Err(Error::InvalidHandle(_))));
        assert!(storage.handles().is_empty());
        Ok(())
    }

    #[test]
    fn test_allocate_with_overwrites_pooled() -> Result<()> {
        let mut storage = pooled(4, 8);
        let a = storage.allocate_with(5)?;
        storage.release(a)?;

        let b = storage.allocate_with(9)?;
        assert_eq!(a, b);
        assert_eq!(*storage.get(b)?, 9);
        Ok(())
    }

    #[test]
    fn test_clear_releases_pool() -> Result<()> {
        let mut storage = pooled(4, 8);
        let handles: Vec<_> = (0..3).map(|_| storage.allocate()).collect::<Result<_>>()?;
        for h in handles {
            storage.release(h)?;
        }
        assert_eq!(storage.inner().len(), 3);

        storage.clear()?;
        assert_eq!(storage.pooled(), 0);
        assert!(storage.inner().is_empty());
        Ok(())
    }

    #[test]
    fn test_shrinking_pool_releases_surplus() -> Result<()> {
        let mut storage = pooled(4, 8);
        let handles: Vec<_> = (0..4).map(|_| storage.allocate()).collect::<Result<_>>()?;
        for h in handles {
            storage.release(h)?;
        }

        storage.set_pool_size(1)?;
        assert_eq!(storage.pooled(), 1);
        assert_eq!(storage.inner().len(), 1);

        let inner = storage.into_inner()?;
        assert!(inner.is_empty());
        Ok(())
    }
}
