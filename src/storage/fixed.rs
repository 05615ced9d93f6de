//! Fixed array storage
//!
//! The cheapest bounded storage: fresh indices are handed out in ascending
//! order and released indices are reused LIFO. No chunk bookkeeping, so
//! iteration scans the whole array.

use crate::error::{Error, Result};
use crate::storage::engine::Storage;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct FixedArrayStorage<T> {
    slots: Vec<Option<T>>,
    /// Released indices, reused before fresh ones
    released: Vec<usize>,
    /// Next never-used index
    next_fresh: usize,
    len: usize,
}

impl<T> FixedArrayStorage<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        crate::storage::chunk::check_capacity(capacity)?;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            released: Vec::new(),
            next_fresh: 0,
            len: 0,
        })
    }

    fn invalid(index: usize) -> Error {
        Error::InvalidHandle(format!("index {} is not allocated", index))
    }
}

impl<T> Storage for FixedArrayStorage<T> {
    type Item = T;
    type Handle = usize;

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn handle_bits(&self) -> u32 {
        32
    }

    fn allocate_with(&mut self, initial: T) -> Result<usize> {
        let index = match self.released.pop() {
            Some(index) => index,
            None if self.next_fresh < self.slots.len() => {
                self.next_fresh += 1;
                self.next_fresh - 1
            }
            None => {
                return Err(Error::CapacityExceeded {
                    capacity: self.slots.len(),
                })
            }
        };
        self.slots[index] = Some(initial);
        self.len += 1;
        trace!(index, "Allocated fixed slot");
        Ok(index)
    }

    fn release(&mut self, index: usize) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or_else(|| Self::invalid(index))?;
        if slot.take().is_none() {
            return Err(Self::invalid(index));
        }
        self.released.push(index);
        self.len -= 1;
        Ok(())
    }

    fn get(&self, index: usize) -> Result<&T> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| Self::invalid(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| Self::invalid(index))
    }

    fn for_each_allocated<F: FnMut(usize)>(&self, mut visitor: F) {
        self.slots[..self.next_fresh]
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .for_each(|(index, _)| visitor(index));
    }

    fn dispose(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.released.clear();
        self.next_fresh = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_reuses_released_lifo() -> Result<()> {
        let mut storage = FixedArrayStorage::<u8>::new(4)?;
        let a = storage.allocate()?;
        let b = storage.allocate()?;
        let c = storage.allocate()?;
        assert_eq!((a, b, c), (0, 1, 2));

        storage.release(a)?;
        storage.release(c)?;
        assert_eq!(storage.allocate()?, c);
        assert_eq!(storage.allocate()?, a);
        assert_eq!(storage.allocate()?, 3);
        assert!(matches!(
            storage.allocate(),
            Err(Error::CapacityExceeded { capacity: 4 })
        ));
        Ok(())
    }

    #[test]
    fn test_fixed_invalid_handles() -> Result<()> {
        let mut storage = FixedArrayStorage::<u8>::new(2)?;
        let a = storage.allocate_with(9)?;
        storage.release(a)?;

        assert!(matches!(storage.release(a), Err(Error::InvalidHandle(_))));
        assert!(matches!(storage.get(5), Err(Error::InvalidHandle(_))));
        Ok(())
    }

    #[test]
    fn test_fixed_iterate_and_dispose() -> Result<()> {
        let mut storage = FixedArrayStorage::<u8>::new(5)?;
        for _ in 0..4 {
            storage.allocate()?;
        }
        storage.release(2)?;
        assert_eq!(storage.handles(), vec![0, 1, 3]);

        storage.dispose();
        storage.dispose();
        assert!(storage.is_empty());
        assert_eq!(storage.allocate()?, 0);
        Ok(())
    }
}
