//! `CheckpointSaver`: the storage abstraction every backend implements.
//!
//! Modeled on the reference stack's `langgraph-checkpoint` crate, narrowed
//! to three operations: ordered append, latest-read, and full history.
//! Durability and single-writer-per-workflow serialization are the
//! caller's (the Scheduler's) responsibility — the Scheduler is
//! single-writer per workflow by construction, so backends need not
//! implement their own cross-writer locking.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::record::CheckpointRecord;

#[async_trait]
pub trait CheckpointSaver<S>: Send + Sync
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Durably append a record. Must complete before the caller proceeds to
    /// the next scheduling tick.
    async fn append(&self, record: CheckpointRecord<S>) -> Result<()>;

    /// The most recently appended record for `workflow_id`, if any.
    async fn latest(&self, workflow_id: &str) -> Result<Option<CheckpointRecord<S>>>;

    /// All records for `workflow_id`, ordered by `created_at`.
    async fn history(&self, workflow_id: &str) -> Result<Vec<CheckpointRecord<S>>>;
}
