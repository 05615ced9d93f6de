//! Chunk allocators
//!
//! Both storages share one [`ChunkList`] algorithm and differ only in the
//! handle they hand out:
//!
//! ```text
//! ChunkStorage           → handle = index
//! VersionedChunkStorage  → handle = (index, generation)
//!   └─→ ChunkList (first-fit, merge-on-free, split-on-allocate)
//!   └─→ Buffer    (array / sparse / hash)
//! ```

pub mod list;
pub mod storage;
pub mod versioned;

pub use list::{Chunk, ChunkList, ChunkStats};
pub use storage::ChunkStorage;
pub use versioned::{VersionedChunkStorage, VersionedHandle};

use crate::error::{Error, Result};

/// Largest capacity whose indices fit a 32-bit handle
pub(crate) const MAX_CHUNK_CAPACITY: usize = u32::MAX as usize + 1;

pub(crate) fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidConfiguration(
            "storage capacity must be positive".to_string(),
        ));
    }
    if capacity > MAX_CHUNK_CAPACITY {
        return Err(Error::InvalidConfiguration(format!(
            "storage capacity {} exceeds 32-bit index space",
            capacity
        )));
    }
    Ok(())
}
