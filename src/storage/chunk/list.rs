//! Chunk list: first-fit partition of an index domain
//!
//! `[0, capacity)` is split into maximal runs of equal allocation state,
//! kept as a doubly-linked list whose nodes live in an arena:
//!
//! ```text
//!  head                      free cursor
//!   │                            │
//!   ▼                            ▼
//! [0..3 A] ⇄ [3..4 F] ⇄ [4..6 A] ⇄ [6..8 F]
//! ```
//!
//! Invariants, checked by [`ChunkList::validate`]:
//! - chunks are contiguous and ordered, sizes sum to the capacity;
//! - no two neighbours share the same state;
//! - the free cursor is the left-most free chunk, or absent when full.

use crate::error::{Error, Result};
use serde::Serialize;
use tracing::trace;

type NodeId = usize;

#[derive(Debug, Clone)]
struct ChunkNode {
    index: usize,
    size: usize,
    allocated: bool,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Snapshot of one run of indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub size: usize,
    pub is_allocated: bool,
}

/// Chunk list statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub capacity: usize,
    pub allocated: usize,
    pub free: usize,
    pub chunk_count: usize,
    pub spare_nodes: usize,
}

/// Arena-backed chunk list
#[derive(Debug, Clone)]
pub struct ChunkList {
    capacity: usize,
    allocated: usize,
    nodes: Vec<ChunkNode>,
    /// Arena slots ready for reuse
    spare: Vec<NodeId>,
    head: NodeId,
    free_cursor: Option<NodeId>,
}

impl ChunkList {
    /// Create a list with one free chunk spanning `[0, capacity)`
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk list capacity must be positive".to_string(),
            ));
        }
        let mut list = Self {
            capacity,
            allocated: 0,
            nodes: Vec::new(),
            spare: Vec::new(),
            head: 0,
            free_cursor: None,
        };
        list.reset();
        Ok(list)
    }

    /// Return to a single free chunk and drop the spare node pool
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.spare.clear();
        self.nodes.push(ChunkNode {
            index: 0,
            size: self.capacity,
            allocated: false,
            prev: None,
            next: None,
        });
        self.head = 0;
        self.free_cursor = Some(0);
        self.allocated = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of allocated indices
    pub fn len(&self) -> usize {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_cursor.is_none()
    }

    /// Claim the left-most free index
    pub fn allocate(&mut self) -> Result<usize> {
        let cursor = self.free_cursor.ok_or(Error::CapacityExceeded {
            capacity: self.capacity,
        })?;
        let index = self.nodes[cursor].index;

        let placed = self.allocate_from_free(cursor)?;
        // Neighbours never share state, so whatever follows is free (or nothing is)
        self.free_cursor = self.nodes[placed].next;
        self.allocated += 1;

        trace!(index, "Chunk index allocated");
        self.check()?;
        Ok(index)
    }

    /// Return `index` to the free space
    pub fn release(&mut self, index: usize) -> Result<()> {
        if index >= self.capacity {
            return Err(Error::InvalidHandle(format!(
                "index {} outside capacity {}",
                index, self.capacity
            )));
        }

        let id = self.find(index);
        let ChunkNode {
            index: start,
            size,
            allocated,
            ..
        } = self.nodes[id];
        if !allocated {
            return Err(Error::InvalidHandle(format!("index {} is not allocated", index)));
        }

        let offset = index - start;
        let freed = if offset == 0 {
            self.free_first(id)?
        } else if offset == size - 1 {
            self.free_last(id)?
        } else {
            self.split(id, offset);
            self.nodes[id].allocated = false;
            id
        };

        let moved_left = match self.free_cursor {
            Some(cursor) => self.nodes[freed].index < self.nodes[cursor].index,
            None => true,
        };
        if moved_left {
            self.free_cursor = Some(freed);
        }
        self.allocated -= 1;

        trace!(index, "Chunk index released");
        self.check()
    }

    /// Whether `index` lies in an allocated chunk
    pub fn is_allocated(&self, index: usize) -> bool {
        index < self.capacity && self.nodes[self.find(index)].allocated
    }

    /// Ordered snapshot of every chunk
    pub fn chunks(&self) -> Vec<Chunk> {
        self.iter()
            .map(|node| Chunk {
                index: node.index,
                size: node.size,
                is_allocated: node.allocated,
            })
            .collect()
    }

    /// Allocated runs as `start..end` ranges, ascending
    pub fn allocated_runs(&self) -> Vec<std::ops::Range<usize>> {
        self.iter()
            .filter(|node| node.allocated)
            .map(|node| node.index..node.index + node.size)
            .collect()
    }

    /// Visit every allocated index in ascending order
    pub fn for_each_allocated<F: FnMut(usize)>(&self, mut visitor: F) {
        for node in self.iter().filter(|node| node.allocated) {
            (node.index..node.index + node.size).for_each(&mut visitor);
        }
    }

    pub fn stats(&self) -> ChunkStats {
        ChunkStats {
            capacity: self.capacity,
            allocated: self.allocated,
            free: self.capacity - self.allocated,
            chunk_count: self.iter().count(),
            spare_nodes: self.spare.len(),
        }
    }

    /// Verify every structural invariant of the list
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| -> Result<()> { Err(Error::InvariantViolation(msg)) };

        if self.nodes[self.head].prev.is_some() {
            return violation("head chunk has a predecessor".to_string());
        }

        let mut expected_index = 0;
        let mut allocated = 0;
        let mut leftmost_free = None;
        let mut prev: Option<NodeId> = None;
        let mut current = Some(self.head);

        while let Some(id) = current {
            let node = &self.nodes[id];
            if node.prev != prev {
                return violation(format!("chunk at {} has a broken back link", node.index));
            }
            if node.size == 0 {
                return violation(format!("chunk at {} is empty", node.index));
            }
            if node.index != expected_index {
                return violation(format!(
                    "chunk starts at {} but previous run ends at {}",
                    node.index, expected_index
                ));
            }
            if let Some(p) = prev {
                if self.nodes[p].allocated == node.allocated {
                    return violation(format!(
                        "chunks at {} and {} share state and were not merged",
                        self.nodes[p].index, node.index
                    ));
                }
            }
            if node.allocated {
                allocated += node.size;
            } else if leftmost_free.is_none() {
                leftmost_free = Some(id);
            }
            expected_index += node.size;
            prev = Some(id);
            current = node.next;
        }

        if expected_index != self.capacity {
            return violation(format!(
                "chunk sizes sum to {} instead of {}",
                expected_index, self.capacity
            ));
        }
        if allocated != self.allocated {
            return violation(format!(
                "{} indices in allocated chunks but count is {}",
                allocated, self.allocated
            ));
        }
        if leftmost_free != self.free_cursor {
            return violation("free cursor is not the left-most free chunk".to_string());
        }
        Ok(())
    }

    #[inline]
    fn check(&self) -> Result<()> {
        if cfg!(debug_assertions) {
            self.validate()
        } else {
            Ok(())
        }
    }

    fn iter(&self) -> impl Iterator<Item = &ChunkNode> + '_ {
        let mut current = Some(self.head);
        std::iter::from_fn(move || {
            let node = &self.nodes[current?];
            current = node.next;
            Some(node)
        })
    }

    /// Chunk containing `index`; linear scan from the head
    fn find(&self, index: usize) -> NodeId {
        let mut id = self.head;
        while let Some(next) = self.nodes[id].next {
            if self.nodes[next].index > index {
                break;
            }
            id = next;
        }
        id
    }

    fn create_node(&mut self, index: usize, size: usize, allocated: bool) -> NodeId {
        let node = ChunkNode {
            index,
            size,
            allocated,
            prev: None,
            next: None,
        };
        match self.spare.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let ChunkNode { prev, next, .. } = self.nodes[id];
        match prev {
            None => {
                let next = next.ok_or_else(|| {
                    Error::InvariantViolation("cannot remove the only chunk".to_string())
                })?;
                self.head = next;
                self.nodes[next].prev = None;
            }
            Some(p) => {
                self.nodes[p].next = next;
                if let Some(n) = next {
                    self.nodes[n].prev = Some(p);
                }
            }
        }

        if self.free_cursor == Some(id) {
            self.free_cursor = None;
        }

        self.nodes[id].prev = None;
        self.nodes[id].next = None;
        self.spare.push(id);
        Ok(())
    }

    fn link_before(&mut self, id: NodeId, new: NodeId) {
        let prev = self.nodes[id].prev;
        self.nodes[new].next = Some(id);
        self.nodes[new].prev = prev;
        self.nodes[id].prev = Some(new);
        match prev {
            Some(p) => self.nodes[p].next = Some(new),
            None => self.head = new,
        }
    }

    fn link_after(&mut self, id: NodeId, new: NodeId) {
        let next = self.nodes[id].next;
        self.nodes[new].prev = Some(id);
        self.nodes[new].next = next;
        self.nodes[id].next = Some(new);
        if let Some(n) = next {
            self.nodes[n].prev = Some(new);
        }
    }

    /// Fold `id` into its predecessor if both share state
    fn merge_with_prev(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let Some(prev) = self.nodes[id].prev else {
            return Ok(None);
        };
        if self.nodes[prev].allocated != self.nodes[id].allocated {
            return Ok(None);
        }
        self.nodes[prev].size += self.nodes[id].size;
        self.remove_node(id)?;
        Ok(Some(prev))
    }

    /// Fold `id` into its successor if both share state
    fn merge_with_next(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let Some(next) = self.nodes[id].next else {
            return Ok(None);
        };
        if self.nodes[next].allocated != self.nodes[id].allocated {
            return Ok(None);
        }
        self.nodes[next].index = self.nodes[id].index;
        self.nodes[next].size += self.nodes[id].size;
        self.remove_node(id)?;
        Ok(Some(next))
    }

    /// Take the first index of free chunk `id`; returns the allocated chunk now holding it
    fn allocate_from_free(&mut self, id: NodeId) -> Result<NodeId> {
        if self.nodes[id].size == 1 {
            self.nodes[id].allocated = true;
            let merged = self.merge_with_prev(id)?.unwrap_or(id);
            return Ok(self.merge_with_next(merged)?.unwrap_or(merged));
        }

        if let Some(prev) = self.nodes[id].prev {
            if self.nodes[prev].allocated {
                self.nodes[prev].size += 1;
                self.nodes[id].index += 1;
                self.nodes[id].size -= 1;
                return Ok(prev);
            }
        }

        let index = self.nodes[id].index;
        self.nodes[id].index += 1;
        self.nodes[id].size -= 1;

        let new = self.create_node(index, 1, true);
        self.link_before(id, new);
        Ok(new)
    }

    /// Free the first index of allocated chunk `id`; returns the free chunk now holding it
    fn free_first(&mut self, id: NodeId) -> Result<NodeId> {
        match self.nodes[id].prev {
            Some(prev) if !self.nodes[prev].allocated => {
                self.nodes[prev].size += 1;
                if self.nodes[id].size == 1 {
                    self.remove_node(id)?;
                    Ok(self.merge_with_next(prev)?.unwrap_or(prev))
                } else {
                    self.nodes[id].index += 1;
                    self.nodes[id].size -= 1;
                    Ok(prev)
                }
            }
            _ => {
                if self.nodes[id].size == 1 {
                    self.nodes[id].allocated = false;
                    Ok(self.merge_with_next(id)?.unwrap_or(id))
                } else {
                    let index = self.nodes[id].index;
                    let new = self.create_node(index, 1, false);
                    self.link_before(id, new);
                    self.nodes[id].index += 1;
                    self.nodes[id].size -= 1;
                    Ok(new)
                }
            }
        }
    }

    /// Free the last index of allocated chunk `id`; returns the free chunk now holding it
    fn free_last(&mut self, id: NodeId) -> Result<NodeId> {
        match self.nodes[id].next {
            Some(next) if !self.nodes[next].allocated => {
                self.nodes[next].index -= 1;
                self.nodes[next].size += 1;
                if self.nodes[id].size == 1 {
                    self.remove_node(id)?;
                    Ok(self.merge_with_prev(next)?.unwrap_or(next))
                } else {
                    self.nodes[id].size -= 1;
                    Ok(next)
                }
            }
            _ => {
                if self.nodes[id].size == 1 {
                    self.nodes[id].allocated = false;
                    Ok(self.merge_with_prev(id)?.unwrap_or(id))
                } else {
                    let last = self.nodes[id].index + self.nodes[id].size - 1;
                    let new = self.create_node(last, 1, false);
                    self.link_after(id, new);
                    self.nodes[id].size -= 1;
                    Ok(new)
                }
            }
        }
    }

    /// Cut `id` into `[..position]`, `[position]`, `[position + 1..]`, keeping `id` as the middle
    fn split(&mut self, id: NodeId, position: usize) {
        let ChunkNode {
            index,
            size,
            allocated,
            ..
        } = self.nodes[id];

        let left = self.create_node(index, position, allocated);
        self.link_before(id, left);

        let right = self.create_node(index + position + 1, size - position - 1, allocated);
        self.link_after(id, right);

        self.nodes[id].index = index + position;
        self.nodes[id].size = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, size: usize, is_allocated: bool) -> Chunk {
        Chunk {
            index,
            size,
            is_allocated,
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ChunkList::new(0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_allocate_until_full() -> Result<()> {
        let mut list = ChunkList::new(4)?;
        for expected in 0..4 {
            assert_eq!(list.allocate()?, expected);
        }
        assert!(list.is_full());
        assert_eq!(list.chunks(), vec![chunk(0, 4, true)]);
        assert!(matches!(
            list.allocate(),
            Err(Error::CapacityExceeded { capacity: 4 })
        ));
        Ok(())
    }

    #[test]
    fn test_release_interior_splits() -> Result<()> {
        let mut list = ChunkList::new(5)?;
        for _ in 0..5 {
            list.allocate()?;
        }

        list.release(2)?;
        assert_eq!(
            list.chunks(),
            vec![chunk(0, 2, true), chunk(2, 1, false), chunk(3, 2, true)]
        );

        // Cursor points at the hole
        assert_eq!(list.allocate()?, 2);
        assert_eq!(list.chunks(), vec![chunk(0, 5, true)]);
        Ok(())
    }

    #[test]
    fn test_merge_collapses_to_single_free_chunk() -> Result<()> {
        let mut list = ChunkList::new(8)?;
        for _ in 0..8 {
            list.allocate()?;
        }
        for index in [1, 3, 5, 7] {
            list.release(index)?;
        }
        assert_eq!(list.chunks().len(), 8);

        for index in [0, 2, 4, 6] {
            list.release(index)?;
        }
        assert_eq!(list.chunks(), vec![chunk(0, 8, false)]);
        assert!(list.is_empty());
        Ok(())
    }

    #[test]
    fn test_head_release_then_reallocate_merges_right() -> Result<()> {
        let mut list = ChunkList::new(3)?;
        for _ in 0..3 {
            list.allocate()?;
        }
        list.release(0)?;
        assert_eq!(list.chunks(), vec![chunk(0, 1, false), chunk(1, 2, true)]);

        assert_eq!(list.allocate()?, 0);
        assert_eq!(list.chunks(), vec![chunk(0, 3, true)]);
        assert!(list.is_full());
        Ok(())
    }

    #[test]
    fn test_double_release_rejected() -> Result<()> {
        let mut list = ChunkList::new(4)?;
        let index = list.allocate()?;
        list.release(index)?;

        assert!(matches!(list.release(index), Err(Error::InvalidHandle(_))));
        assert!(matches!(list.release(9), Err(Error::InvalidHandle(_))));
        Ok(())
    }

    #[test]
    fn test_cursor_moves_left_on_release() -> Result<()> {
        let mut list = ChunkList::new(6)?;
        for _ in 0..4 {
            list.allocate()?;
        }
        list.release(1)?;
        assert_eq!(list.allocate()?, 1);
        assert_eq!(list.allocate()?, 4);
        Ok(())
    }

    #[test]
    fn test_spare_nodes_reused() -> Result<()> {
        let mut list = ChunkList::new(8)?;
        for _ in 0..8 {
            list.allocate()?;
        }
        list.release(3)?;
        list.allocate()?;
        let spare = list.stats().spare_nodes;
        assert!(spare > 0);

        list.release(5)?;
        assert!(list.stats().spare_nodes < spare);
        list.validate()
    }

    #[test]
    fn test_for_each_allocated_ascending() -> Result<()> {
        let mut list = ChunkList::new(6)?;
        for _ in 0..6 {
            list.allocate()?;
        }
        list.release(1)?;
        list.release(4)?;

        let mut seen = Vec::new();
        list.for_each_allocated(|index| seen.push(index));
        assert_eq!(seen, vec![0, 2, 3, 5]);
        assert_eq!(list.allocated_runs(), vec![0..1, 2..4, 5..6]);
        assert!(list.is_allocated(2));
        assert!(!list.is_allocated(4));
        Ok(())
    }

    #[test]
    fn test_stats_and_reset() -> Result<()> {
        let mut list = ChunkList::new(10)?;
        list.allocate()?;
        list.allocate()?;

        let stats = list.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.free, 8);
        assert_eq!(stats.chunk_count, 2);

        list.reset();
        assert_eq!(list.chunks(), vec![chunk(0, 10, false)]);
        assert_eq!(list.stats().spare_nodes, 0);
        Ok(())
    }
}
