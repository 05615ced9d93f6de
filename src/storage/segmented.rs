//! Segmented (growable) storage
//!
//! Composes bounded storages, created lazily by a factory, into one
//! unbounded storage.
//!
//! ```text
//! SegmentedStorage
//!   ├─→ Segment 0 (primary, never disposed)  [full]
//!   ├─→ Segment 1 (disposed, slot reusable)
//!   └─→ Segment 2                             [available]
//!
//! available stack: [1, 2]   (top = next allocation target)
//! ```
//!
//! A handle packs the segment index and the inner handle into one `u64`:
//! low 32 bits = segment, high 32 bits = inner handle.

use crate::error::{Error, Result};
use crate::storage::engine::{RawHandle, Storage, StorageFactory, UNBOUNDED_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Bits reserved for the inner handle inside a packed handle
pub const INNER_HANDLE_BITS: u32 = 32;

/// Handle into a segmented storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentedHandle {
    pub segment: u32,
    pub inner: u32,
}

impl SegmentedHandle {
    pub fn new(segment: u32, inner: u32) -> Self {
        Self { segment, inner }
    }

    /// `inner << 32 | segment`
    pub fn pack(self) -> u64 {
        (self.inner as u64) << INNER_HANDLE_BITS | self.segment as u64
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            segment: packed as u32,
            inner: (packed >> INNER_HANDLE_BITS) as u32,
        }
    }
}

impl fmt::Display for SegmentedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(segment={}, inner={})", self.segment, self.inner)
    }
}

impl RawHandle for SegmentedHandle {
    fn into_raw(self) -> u64 {
        self.pack()
    }

    fn from_raw(raw: u64) -> Self {
        Self::unpack(raw)
    }
}

struct Segment<S> {
    /// `None` once disposed; recreated on next use
    storage: Option<S>,
    /// Whether this index is on the available stack
    available: bool,
}

/// Unbounded storage built from lazily created bounded segments
pub struct SegmentedStorage<F: StorageFactory> {
    factory: F,
    segments: Vec<Segment<F::Output>>,
    available: Vec<u32>,
    len: usize,
}

impl<F: StorageFactory> SegmentedStorage<F> {
    /// Create the storage and its primary segment
    pub fn new(factory: F) -> Result<Self> {
        let mut storage = Self {
            factory,
            segments: Vec::new(),
            available: Vec::new(),
            len: 0,
        };
        storage.push_segment()?;
        Ok(storage)
    }

    /// Number of segment slots, disposed ones included
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of segments currently holding a storage
    pub fn live_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.storage.is_some()).count()
    }

    /// The storage behind segment `index`, if live
    pub fn segment(&self, index: usize) -> Option<&F::Output> {
        self.segments.get(index)?.storage.as_ref()
    }

    fn create_segment(&mut self) -> Result<F::Output> {
        let storage = self.factory.create()?;
        let bits = storage.handle_bits();
        if bits > INNER_HANDLE_BITS {
            return Err(Error::InvalidConfiguration(format!(
                "inner storage handles use {} bits, segmented storage packs at most {}",
                bits, INNER_HANDLE_BITS
            )));
        }
        Ok(storage)
    }

    fn push_segment(&mut self) -> Result<u32> {
        let index = u32::try_from(self.segments.len()).map_err(|_| {
            Error::InvalidConfiguration("segment index space exhausted".to_string())
        })?;
        let storage = self.create_segment()?;
        self.segments.push(Segment {
            storage: Some(storage),
            available: true,
        });
        self.available.push(index);
        debug!(segment = index, "Created segment");
        Ok(index)
    }

    /// Segment to allocate from, creating or recreating one as needed
    fn acquire(&mut self) -> Result<u32> {
        let index = match self.available.last() {
            Some(&index) => index,
            None => return self.push_segment(),
        };
        if self.segments[index as usize].storage.is_none() {
            let storage = self.create_segment()?;
            self.segments[index as usize].storage = Some(storage);
            debug!(segment = index, "Recreated segment");
        }
        Ok(index)
    }

    fn live(&self, handle: SegmentedHandle) -> Result<&F::Output> {
        self.segments
            .get(handle.segment as usize)
            .and_then(|s| s.storage.as_ref())
            .ok_or_else(|| Error::InvalidHandle(format!("{} points at no live segment", handle)))
    }

    fn live_mut(&mut self, handle: SegmentedHandle) -> Result<&mut F::Output> {
        self.segments
            .get_mut(handle.segment as usize)
            .and_then(|s| s.storage.as_mut())
            .ok_or_else(|| Error::InvalidHandle(format!("{} points at no live segment", handle)))
    }

    fn inner_handle(handle: SegmentedHandle) -> <F::Output as Storage>::Handle {
        RawHandle::from_raw(handle.inner as u64)
    }

    fn allocate_in<A>(&mut self, allocate: A) -> Result<SegmentedHandle>
    where
        A: FnOnce(&mut F::Output) -> Result<<F::Output as Storage>::Handle>,
    {
        let index = self.acquire()?;
        let segment = &mut self.segments[index as usize];
        let storage = segment.storage.as_mut().ok_or_else(|| {
            Error::InvariantViolation(format!("segment {} vanished after acquire", index))
        })?;

        let inner = allocate(storage)?;
        let raw = inner.into_raw();
        let inner = match u32::try_from(raw) {
            Ok(inner) => inner,
            Err(_) => {
                storage.release(inner)?;
                return Err(Error::InvalidConfiguration(format!(
                    "inner handle {:#x} does not fit in {} bits",
                    raw, INNER_HANDLE_BITS
                )));
            }
        };

        if storage.is_full() {
            self.available.pop();
            segment.available = false;
        }
        self.len += 1;

        let handle = SegmentedHandle::new(index, inner);
        trace!(%handle, "Allocated segmented slot");
        Ok(handle)
    }
}

impl<F: StorageFactory> Storage for SegmentedStorage<F> {
    type Item = <F::Output as Storage>::Item;
    type Handle = SegmentedHandle;

    fn capacity(&self) -> usize {
        UNBOUNDED_CAPACITY
    }

    fn len(&self) -> usize {
        self.len
    }

    fn handle_bits(&self) -> u32 {
        64
    }

    fn allocate(&mut self) -> Result<SegmentedHandle>
    where
        Self::Item: Default,
    {
        self.allocate_in(|storage| storage.allocate())
    }

    fn allocate_with(&mut self, initial: Self::Item) -> Result<SegmentedHandle> {
        self.allocate_in(|storage| storage.allocate_with(initial))
    }

    fn release(&mut self, handle: SegmentedHandle) -> Result<()> {
        let storage = self.live_mut(handle)?;
        storage.release(Self::inner_handle(handle))?;
        let emptied = storage.is_empty();
        self.len -= 1;

        let index = handle.segment;
        let segment = &mut self.segments[index as usize];
        if emptied && index != 0 {
            if let Some(mut storage) = segment.storage.take() {
                storage.dispose();
            }
            debug!(segment = index, "Disposed empty segment");
        }
        if !segment.available {
            segment.available = true;
            self.available.push(index);
        }

        trace!(%handle, "Released segmented slot");
        Ok(())
    }

    fn get(&self, handle: SegmentedHandle) -> Result<&Self::Item> {
        self.live(handle)?.get(Self::inner_handle(handle))
    }

    fn get_mut(&mut self, handle: SegmentedHandle) -> Result<&mut Self::Item> {
        self.live_mut(handle)?.get_mut(Self::inner_handle(handle))
    }

    fn for_each_allocated<V: FnMut(SegmentedHandle)>(&self, mut visitor: V) {
        for (index, segment) in self.segments.iter().enumerate() {
            if let Some(storage) = &segment.storage {
                storage.for_each_allocated(|inner| {
                    visitor(SegmentedHandle::new(index as u32, inner.into_raw() as u32))
                });
            }
        }
    }

    fn dispose(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        debug!(segments = self.segments.len(), "Disposing segmented storage");
        for segment in &mut self.segments {
            if let Some(storage) = segment.storage.as_mut() {
                storage.dispose();
            }
        }
        self.segments.clear();
        self.available.clear();
        self.len = 0;
    }
}
