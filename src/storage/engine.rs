//! Storage contract shared by every allocator

use crate::error::Result;
use std::fmt::Debug;
use std::hash::Hash;

/// Capacity reported by storages that grow without bound
pub const UNBOUNDED_CAPACITY: usize = usize::MAX;

/// A handle that can be flattened to a raw `u64` and rebuilt from it
///
/// Wrapping storages use this to carry an inner handle without knowing its
/// concrete type.
pub trait RawHandle: Copy + Eq + Hash + Debug {
    fn into_raw(self) -> u64;
    fn from_raw(raw: u64) -> Self;
}

impl RawHandle for usize {
    #[inline]
    fn into_raw(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_raw(raw: u64) -> Self {
        raw as usize
    }
}

/// Slot allocator over uniformly-sized records
///
/// A handle is valid between the `allocate` call that produced it and the
/// matching `release`. Storages are not synchronized; callers confine
/// mutation to a single writer.
pub trait Storage {
    /// Record type stored in each slot
    type Item;
    /// Opaque handle identifying one allocated record
    type Handle: RawHandle;

    /// Maximum number of live records ([`UNBOUNDED_CAPACITY`] for growable storages)
    fn capacity(&self) -> usize;

    /// Number of live records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Number of significant bits in this storage's raw handles
    fn handle_bits(&self) -> u32;

    /// Allocate a slot holding `Item::default()`
    fn allocate(&mut self) -> Result<Self::Handle>
    where
        Self::Item: Default,
    {
        self.allocate_with(Self::Item::default())
    }

    /// Allocate a slot pre-populated with `initial`
    fn allocate_with(&mut self, initial: Self::Item) -> Result<Self::Handle>;

    /// Release a live slot
    fn release(&mut self, handle: Self::Handle) -> Result<()>;

    fn get(&self, handle: Self::Handle) -> Result<&Self::Item>;

    fn get_mut(&mut self, handle: Self::Handle) -> Result<&mut Self::Item>;

    /// Visit every live handle exactly once
    fn for_each_allocated<F>(&self, visitor: F)
    where
        F: FnMut(Self::Handle);

    /// Collect every live handle
    fn handles(&self) -> Vec<Self::Handle> {
        let mut handles = Vec::with_capacity(self.len());
        self.for_each_allocated(|handle| handles.push(handle));
        handles
    }

    /// Drop every record and all bookkeeping
    ///
    /// Idempotent. The storage is empty and usable afterwards.
    fn dispose(&mut self);
}

/// Produces fresh bounded storages on demand
pub trait StorageFactory {
    type Output: Storage;

    fn create(&mut self) -> Result<Self::Output>;
}

impl<S, F> StorageFactory for F
where
    S: Storage,
    F: FnMut() -> Result<S>,
{
    type Output = S;

    fn create(&mut self) -> Result<S> {
        self()
    }
}
