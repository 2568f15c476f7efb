//! In-memory checkpoint storage for tests and short-lived workflows.
//!
//! Grounded directly on the reference stack's `InMemoryCheckpointSaver`:
//! a `HashMap` guarded by a single reader-writer lock, plus a `clear()`
//! helper for test isolation. Data does not survive process restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::record::CheckpointRecord;
use crate::traits::CheckpointSaver;

pub struct InMemoryCheckpointSaver<S> {
    records: Arc<RwLock<HashMap<String, Vec<CheckpointRecord<S>>>>>,
}

impl<S> Default for InMemoryCheckpointSaver<S> {
    fn default() -> Self {
        Self { records: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl<S: Clone> InMemoryCheckpointSaver<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all stored records. Intended for test isolation between
    /// cases sharing a saver instance.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl<S> CheckpointSaver<S> for InMemoryCheckpointSaver<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn append(&self, record: CheckpointRecord<S>) -> Result<()> {
        self.records
            .write()
            .entry(record.workflow_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest(&self, workflow_id: &str) -> Result<Option<CheckpointRecord<S>>> {
        Ok(self
            .records
            .read()
            .get(workflow_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<CheckpointRecord<S>>> {
        Ok(self
            .records
            .read()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_is_none_for_unknown_workflow() {
        let saver: InMemoryCheckpointSaver<String> = InMemoryCheckpointSaver::new();
        assert!(saver.latest("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_then_latest_round_trips() {
        let saver: InMemoryCheckpointSaver<String> = InMemoryCheckpointSaver::new();
        saver
            .append(CheckpointRecord::new("wf-1", "analyze", "snap-1".to_string()))
            .await
            .unwrap();
        saver
            .append(CheckpointRecord::new("wf-1", "design", "snap-2".to_string()))
            .await
            .unwrap();

        let latest = saver.latest("wf-1").await.unwrap().unwrap();
        assert_eq!(latest.step_name, "design");
        assert_eq!(saver.history("wf-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clear_resets_storage() {
        let saver: InMemoryCheckpointSaver<String> = InMemoryCheckpointSaver::new();
        saver
            .append(CheckpointRecord::new("wf-1", "analyze", "snap-1".to_string()))
            .await
            .unwrap();
        saver.clear();
        assert!(saver.history("wf-1").await.unwrap().is_empty());
    }
}
