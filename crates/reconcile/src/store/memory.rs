use super::CheckpointStore;
use crate::checkpoint::{Checkpoint, CheckpointSummary};
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// In-process store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints across all instances.
    pub fn len(&self) -> usize {
        self.checkpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut map = self
            .checkpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&checkpoint.id) {
            return Err(StoreError::Duplicate(checkpoint.id.clone()));
        }
        map.insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let map = self
            .checkpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(id).cloned())
    }

    fn list(&self, instance: &str) -> Result<Vec<CheckpointSummary>, StoreError> {
        let map = self
            .checkpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<_> = map
            .values()
            .filter(|c| c.instance_name == instance)
            .map(Checkpoint::summary)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut map = self
            .checkpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(id).is_some())
    }
}
