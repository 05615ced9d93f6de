//! Paged sparse set
//!
//! Maps non-negative integer keys to densely packed values.
//!
//! ```text
//! pages:   [ page 0 ] [  None  ] [ page 2 ]     (lazily allocated, ref-counted)
//!              │                     │
//! dense:   [ v(3), v(130), v(9) ]               (values, packed)
//! reverse: [   3,    130,    9  ]               (dense position → key)
//! ```
//!
//! Removal swaps the last dense entry into the hole, so every operation is O(1).

use crate::error::{Error, Result};
use std::ops::Index;
use tracing::trace;

/// Page slot marker for "no entry"
const EMPTY: usize = usize::MAX;

const DEFAULT_PAGE_COUNT: usize = 1024;
const DEFAULT_PAGE_SIZE: usize = 1024;

#[derive(Debug, Clone, Default)]
struct Page {
    /// Dense positions, `EMPTY` where the key is absent
    slots: Option<Box<[usize]>>,
    /// Number of live entries in this page
    live: usize,
}

/// Sparse set with paged key index
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    page_count: usize,
    page_size: usize,
    pages: Vec<Page>,
    dense: Vec<T>,
    reverse: Vec<usize>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_COUNT, DEFAULT_PAGE_SIZE)
    }
}

impl<T> SparseSet<T> {
    /// Create a sparse set covering keys `[0, page_count * page_size)`
    pub fn new(page_count: usize, page_size: usize) -> Self {
        Self {
            page_count,
            page_size,
            pages: vec![Page::default(); page_count],
            dense: Vec::new(),
            reverse: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.page_count.saturating_mul(self.page_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Number of pages currently materialized
    pub fn live_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.slots.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    fn locate(&self, key: usize) -> Option<(usize, usize)> {
        if key >= self.capacity() {
            return None;
        }
        Some((key / self.page_size, key % self.page_size))
    }

    fn dense_index(&self, key: usize) -> Option<usize> {
        let (page, entry) = self.locate(key)?;
        let slots = self.pages[page].slots.as_ref()?;
        match slots[entry] {
            EMPTY => None,
            index => Some(index),
        }
    }

    pub fn contains(&self, key: usize) -> bool {
        self.dense_index(key).is_some()
    }

    /// Whether `key` is present and maps to `value`
    pub fn contains_entry(&self, key: usize, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.get(key).is_some_and(|v| v == value)
    }

    pub fn get(&self, key: usize) -> Option<&T> {
        self.dense_index(key).map(|i| &self.dense[i])
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut T> {
        match self.dense_index(key) {
            Some(index) => Some(&mut self.dense[index]),
            None => None,
        }
    }

    /// Insert `value` under `key`
    ///
    /// Returns `false` and leaves the set untouched if `key` is already present.
    pub fn insert(&mut self, key: usize, value: T) -> Result<bool> {
        let (page_index, entry) = self.locate(key).ok_or(Error::IndexOutOfRange {
            index: key,
            capacity: self.capacity(),
        })?;

        let page_size = self.page_size;
        let dense_len = self.dense.len();
        let page = &mut self.pages[page_index];
        let slots = page
            .slots
            .get_or_insert_with(|| vec![EMPTY; page_size].into_boxed_slice());

        if slots[entry] != EMPTY {
            return Ok(false);
        }

        slots[entry] = dense_len;
        page.live += 1;
        self.dense.push(value);
        self.reverse.push(key);

        trace!(key, page = page_index, "Inserted sparse entry");
        Ok(true)
    }

    /// Get the value under `key`, inserting `make()` first if absent
    pub fn get_or_insert_with<F>(&mut self, key: usize, make: F) -> Result<&mut T>
    where
        F: FnOnce() -> T,
    {
        let index = match self.dense_index(key) {
            Some(index) => index,
            None => {
                self.insert(key, make())?;
                self.dense.len() - 1
            }
        };
        Ok(&mut self.dense[index])
    }

    pub fn get_or_insert_default(&mut self, key: usize) -> Result<&mut T>
    where
        T: Default,
    {
        self.get_or_insert_with(key, T::default)
    }

    /// Store `value` under `key`, returning the previous value if any
    pub fn set(&mut self, key: usize, value: T) -> Result<Option<T>> {
        if let Some(slot) = self.get_mut(key) {
            return Ok(Some(std::mem::replace(slot, value)));
        }
        self.insert(key, value)?;
        Ok(None)
    }

    /// Remove `key`, returning its value
    pub fn take(&mut self, key: usize) -> Result<Option<T>> {
        let Some((page_index, entry)) = self.locate(key) else {
            return Ok(None);
        };
        let Some(slots) = self.pages[page_index].slots.as_mut() else {
            return Ok(None);
        };
        let dense_index = slots[entry];
        if dense_index == EMPTY {
            return Ok(None);
        }
        slots[entry] = EMPTY;

        let value = self.dense.swap_remove(dense_index);
        self.reverse.swap_remove(dense_index);

        // The former last entry now lives at `dense_index`
        if let Some(&moved_key) = self.reverse.get(dense_index) {
            let (moved_page, moved_entry) = (moved_key / self.page_size, moved_key % self.page_size);
            match self.pages[moved_page].slots.as_mut() {
                Some(slots) => slots[moved_entry] = dense_index,
                None => {
                    return Err(Error::InvariantViolation(format!(
                        "key {} is live but page {} is not allocated",
                        moved_key, moved_page
                    )))
                }
            }
        }

        self.release_page_ref(page_index)?;
        trace!(key, page = page_index, "Removed sparse entry");
        Ok(Some(value))
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&mut self, key: usize) -> Result<bool> {
        Ok(self.take(key)?.is_some())
    }

    fn release_page_ref(&mut self, page_index: usize) -> Result<()> {
        let page = &mut self.pages[page_index];
        if page.live == 0 {
            return Err(Error::InvariantViolation(format!(
                "live count of page {} dropped below zero",
                page_index
            )));
        }
        page.live -= 1;
        if page.live == 0 {
            page.slots = None;
        }
        Ok(())
    }

    /// Keys in dense order
    pub fn keys(&self) -> &[usize] {
        &self.reverse
    }

    /// Values in dense order
    pub fn values(&self) -> &[T] {
        &self.dense
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.dense
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.reverse.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> + '_ {
        self.reverse.iter().copied().zip(self.dense.iter_mut())
    }

    /// Remove every entry and free every page
    pub fn clear(&mut self) {
        if self.dense.is_empty() {
            return;
        }
        self.dense.clear();
        self.reverse.clear();
        for page in &mut self.pages {
            *page = Page::default();
        }
    }
}

/// # Panics
///
/// Panics if `key` is not present. Use [`SparseSet::get`] for a fallible lookup.
impl<T> Index<usize> for SparseSet<T> {
    type Output = T;

    fn index(&self, key: usize) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key {} not present in sparse set", key),
        }
    }
}
