//! Checkpoint storage.
//!
//! Checkpoints are immutable once saved: a second `save` with the same id is
//! rejected rather than overwriting. Listings are ordered oldest first.

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use crate::checkpoint::{Checkpoint, CheckpointSummary};
use crate::error::StoreError;

/// Persistence backend for checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Store a new checkpoint. Fails with [`StoreError::Duplicate`] when the
    /// id is taken.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Fetch a checkpoint by id.
    fn get(&self, id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Summaries for one instance, ordered by creation time then id.
    fn list(&self, instance: &str) -> Result<Vec<CheckpointSummary>, StoreError>;

    /// Most recent checkpoint for an instance.
    fn latest(&self, instance: &str) -> Result<Option<CheckpointSummary>, StoreError> {
        Ok(self.list(instance)?.pop())
    }

    /// Remove a checkpoint. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
