//! Storage layer
//!
//! # Architecture
//!
//! Every allocator implements the [`Storage`] contract. Leaves own a backing
//! [`Buffer`]; decorators wrap another storage.
//!
//! ```text
//! SegmentedStorage (unbounded)
//!   └─→ Segment N: PooledStorage
//!        └─→ ChunkStorage / VersionedChunkStorage / FixedArrayStorage
//!             ├─→ ChunkList  (first-fit, merge-on-free, split-on-allocate)
//!             └─→ Buffer     (Array | Sparse | Hash | Bucket)
//!                   └─→ SparseSet (paged, swap-remove)
//! ```
//!
//! ## Handles
//!
//! - `usize` index for [`ChunkStorage`] and [`FixedArrayStorage`]
//! - `(index, generation)` for [`VersionedChunkStorage`]
//! - `(segment, inner)` packed into `u64` for [`SegmentedStorage`]
//!
//! None of the storages are synchronized. A storage instance has a single
//! writer at a time.

pub mod buffer;
pub mod chunk;
pub mod engine;
pub mod fixed;
pub mod pooled;
pub mod segmented;
pub mod sparse_set;

pub use buffer::{AnyBuffer, ArrayBuffer, BucketBuffer, Buffer, HashBuffer, SparseBuffer};
pub use chunk::{Chunk, ChunkList, ChunkStats, ChunkStorage, VersionedChunkStorage, VersionedHandle};
pub use engine::{RawHandle, Storage, StorageFactory, UNBOUNDED_CAPACITY};
pub use fixed::FixedArrayStorage;
pub use pooled::PooledStorage;
pub use segmented::{SegmentedHandle, SegmentedStorage};
pub use sparse_set::SparseSet;
