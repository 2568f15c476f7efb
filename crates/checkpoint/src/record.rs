//! The checkpoint data model.
//!
//! Generic over the snapshot type `S` so this crate has no dependency on
//! `orchestrator::WorkflowState` — the checkpoint layer only needs to be
//! able to serialize and order snapshots, not interpret them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord<S> {
    pub workflow_id: String,
    pub step_name: String,
    pub created_at: DateTime<Utc>,
    pub state_snapshot: S,
    pub parent_step: Option<String>,
}

impl<S> CheckpointRecord<S> {
    pub fn new(workflow_id: impl Into<String>, step_name: impl Into<String>, state_snapshot: S) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_name: step_name.into(),
            created_at: Utc::now(),
            state_snapshot,
            parent_step: None,
        }
    }

    pub fn with_parent_step(mut self, parent_step: impl Into<String>) -> Self {
        self.parent_step = Some(parent_step.into());
        self
    }
}
