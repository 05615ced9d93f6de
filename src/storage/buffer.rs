//! Backing buffers
//!
//! A buffer is an index-addressable container. Allocators decide *which*
//! index to use; buffers only store the record living there.

use super::sparse_set::SparseSet;
use crate::config::BufferKind;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::trace;

const DEFAULT_SPARSE_PAGE_SIZE: usize = 256;
const DEFAULT_BUCKET_SIZE: usize = 256;

/// Index-addressable record container
pub trait Buffer<T> {
    /// Number of addressable indices
    fn capacity(&self) -> usize;

    /// Number of occupied indices
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupy `index` with `value`
    fn create(&mut self, index: usize, value: T) -> Result<&mut T>;

    fn get(&self, index: usize) -> Option<&T>;

    fn get_mut(&mut self, index: usize) -> Option<&mut T>;

    /// Vacate `index`, returning its record
    fn release(&mut self, index: usize) -> Option<T>;

    fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Vacate every index
    fn clear(&mut self);
}

fn check_index(index: usize, capacity: usize) -> Result<()> {
    if index >= capacity {
        return Err(Error::IndexOutOfRange { index, capacity });
    }
    Ok(())
}

fn occupied(index: usize) -> Error {
    Error::InvalidHandle(format!("buffer index {} is already occupied", index))
}

/// Dense fixed-capacity buffer
#[derive(Debug, Clone)]
pub struct ArrayBuffer<T> {
    values: Vec<Option<T>>,
    len: usize,
}

impl<T> ArrayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let mut values = Vec::with_capacity(capacity);
        values.resize_with(capacity, || None);
        Self { values, len: 0 }
    }
}

impl<T> Buffer<T> for ArrayBuffer<T> {
    fn capacity(&self) -> usize {
        self.values.len()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn create(&mut self, index: usize, value: T) -> Result<&mut T> {
        check_index(index, self.values.len())?;
        let slot = &mut self.values[index];
        if slot.is_some() {
            return Err(occupied(index));
        }
        self.len += 1;
        Ok(slot.insert(value))
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)?.as_ref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.values.get_mut(index)?.as_mut()
    }

    fn release(&mut self, index: usize) -> Option<T> {
        let value = self.values.get_mut(index)?.take()?;
        self.len -= 1;
        Some(value)
    }

    fn clear(&mut self) {
        self.values.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
    }
}

/// Buffer backed by a [`SparseSet`]; memory follows occupancy page by page
#[derive(Debug, Clone)]
pub struct SparseBuffer<T> {
    set: SparseSet<T>,
    capacity: usize,
}

impl<T> SparseBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_page_size(capacity, DEFAULT_SPARSE_PAGE_SIZE)
    }

    pub fn with_page_size(capacity: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let set = if capacity <= page_size {
            SparseSet::new(1, capacity)
        } else {
            SparseSet::new(capacity.div_ceil(page_size), page_size)
        };
        Self { set, capacity }
    }

    pub fn live_pages(&self) -> usize {
        self.set.live_pages()
    }
}

impl<T> Buffer<T> for SparseBuffer<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    fn create(&mut self, index: usize, value: T) -> Result<&mut T> {
        check_index(index, self.capacity)?;
        if !self.set.insert(index, value)? {
            return Err(occupied(index));
        }
        self.set
            .get_mut(index)
            .ok_or_else(|| Error::InvariantViolation(format!("sparse index {} vanished", index)))
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.set.get(index)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.set.get_mut(index)
    }

    fn release(&mut self, index: usize) -> Option<T> {
        // Page bookkeeping cannot underflow for a key we just found
        self.set.take(index).ok().flatten()
    }

    fn clear(&mut self) {
        self.set.clear();
    }
}

/// Hash-map buffer with a logical capacity
#[derive(Debug, Clone)]
pub struct HashBuffer<T> {
    values: HashMap<usize, T>,
    capacity: usize,
}

impl<T> HashBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: HashMap::new(),
            capacity,
        }
    }
}

impl<T> Buffer<T> for HashBuffer<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn create(&mut self, index: usize, value: T) -> Result<&mut T> {
        check_index(index, self.capacity)?;
        match self.values.entry(index) {
            std::collections::hash_map::Entry::Occupied(_) => Err(occupied(index)),
            std::collections::hash_map::Entry::Vacant(slot) => Ok(slot.insert(value)),
        }
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.values.get(&index)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.values.get_mut(&index)
    }

    fn release(&mut self, index: usize) -> Option<T> {
        self.values.remove(&index)
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

/// Buffer that grows in fixed-size buckets, each allocated on first touch
#[derive(Debug, Clone)]
pub struct BucketBuffer<T> {
    buckets: Vec<Option<Box<[Option<T>]>>>,
    bucket_size: usize,
    capacity: usize,
    len: usize,
}

impl<T> BucketBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_bucket_size(capacity, DEFAULT_BUCKET_SIZE)
    }

    pub fn with_bucket_size(capacity: usize, bucket_size: usize) -> Self {
        Self {
            buckets: Vec::new(),
            bucket_size: bucket_size.max(1),
            capacity,
            len: 0,
        }
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Number of buckets materialized so far
    pub fn allocated_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }

    fn slot(&self, index: usize) -> Option<&Option<T>> {
        let bucket = self.buckets.get(index / self.bucket_size)?.as_ref()?;
        bucket.get(index % self.bucket_size)
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Option<T>> {
        let bucket = self.buckets.get_mut(index / self.bucket_size)?.as_mut()?;
        bucket.get_mut(index % self.bucket_size)
    }
}

impl<T> Buffer<T> for BucketBuffer<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.len
    }

    fn create(&mut self, index: usize, value: T) -> Result<&mut T> {
        check_index(index, self.capacity)?;
        let bucket_index = index / self.bucket_size;
        if bucket_index >= self.buckets.len() {
            self.buckets.resize_with(bucket_index + 1, || None);
        }

        let bucket_size = self.bucket_size;
        let bucket = self.buckets[bucket_index].get_or_insert_with(|| {
            trace!(bucket = bucket_index, "Allocated buffer bucket");
            std::iter::repeat_with(|| None).take(bucket_size).collect()
        });
        let slot = &mut bucket[index % bucket_size];
        if slot.is_some() {
            return Err(occupied(index));
        }
        self.len += 1;
        Ok(slot.insert(value))
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.slot(index)?.as_ref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slot_mut(index)?.as_mut()
    }

    fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slot_mut(index)?.take()?;
        self.len -= 1;
        Some(value)
    }

    /// Drops every bucket
    fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

/// Buffer whose backend is picked at runtime
#[derive(Debug, Clone)]
pub enum AnyBuffer<T> {
    Array(ArrayBuffer<T>),
    Sparse(SparseBuffer<T>),
    Hash(HashBuffer<T>),
    Bucket(BucketBuffer<T>),
}

impl<T> AnyBuffer<T> {
    /// `page_size` sets the sparse page size and the bucket size
    pub fn new(kind: BufferKind, capacity: usize, page_size: usize) -> Self {
        match kind {
            BufferKind::Array => Self::Array(ArrayBuffer::new(capacity)),
            BufferKind::Sparse => Self::Sparse(SparseBuffer::with_page_size(capacity, page_size)),
            BufferKind::Hash => Self::Hash(HashBuffer::new(capacity)),
            BufferKind::Bucket => Self::Bucket(BucketBuffer::with_bucket_size(capacity, page_size)),
        }
    }

    pub fn kind(&self) -> BufferKind {
        match self {
            Self::Array(_) => BufferKind::Array,
            Self::Sparse(_) => BufferKind::Sparse,
            Self::Hash(_) => BufferKind::Hash,
            Self::Bucket(_) => BufferKind::Bucket,
        }
    }
}

macro_rules! delegate {
    ($self:ident, $buffer:ident => $body:expr) => {
        match $self {
            AnyBuffer::Array($buffer) => $body,
            AnyBuffer::Sparse($buffer) => $body,
            AnyBuffer::Hash($buffer) => $body,
            AnyBuffer::Bucket($buffer) => $body,
        }
    };
}

impl<T> Buffer<T> for AnyBuffer<T> {
    fn capacity(&self) -> usize {
        delegate!(self, b => b.capacity())
    }

    fn len(&self) -> usize {
        delegate!(self, b => b.len())
    }

    fn create(&mut self, index: usize, value: T) -> Result<&mut T> {
        delegate!(self, b => b.create(index, value))
    }

    fn get(&self, index: usize) -> Option<&T> {
        delegate!(self, b => b.get(index))
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        delegate!(self, b => b.get_mut(index))
    }

    fn release(&mut self, index: usize) -> Option<T> {
        delegate!(self, b => b.release(index))
    }

    fn clear(&mut self) {
        delegate!(self, b => b.clear())
    }
}
