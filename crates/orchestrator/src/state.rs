//! `WorkflowState`: the shared, append-only record of one workflow's
//! progress. Owned exclusively by the Scheduler and snapshotted into the
//! Checkpoint Store after each task completes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Role, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub step: String,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleOutput {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub workflow_type: String,
    pub requirement: String,
    pub context: HashMap<String, String>,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub per_role_outputs: HashMap<Role, Vec<RoleOutput>>,
    pub files_created: Vec<String>,
    pub errors: Vec<WorkflowError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        requirement: impl Into<String>,
        context: HashMap<String, String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            requirement: requirement.into(),
            context,
            status: WorkflowStatus::Running,
            current_step: None,
            completed_steps: Vec::new(),
            per_role_outputs: HashMap::new(),
            files_created: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Record task `id`'s result. Idempotent with respect to duplicate
    /// resume replay: a task id already present in `completed_steps` is not
    /// appended a second time, and its `per_role_outputs` entry is not
    /// duplicated either, so replaying a resumed workflow cannot produce
    /// more than one recorded outcome per task id.
    pub fn record_task_result(&mut self, task_id: &str, role: Role, outcome: TaskOutcome) {
        if !self.completed_steps.contains(&task_id.to_string()) {
            self.completed_steps.push(task_id.to_string());
        }
        let entries = self.per_role_outputs.entry(role).or_default();
        if !entries.iter().any(|e| e.task_id == task_id) {
            entries.push(RoleOutput { task_id: task_id.to_string(), outcome });
        }
        self.current_step = Some(task_id.to_string());
    }

    pub fn record_files(&mut self, paths: impl IntoIterator<Item = String>) {
        let mut seen: HashSet<String> = self.files_created.iter().cloned().collect();
        for p in paths {
            if seen.insert(p.clone()) {
                self.files_created.push(p);
            }
        }
    }

    pub fn record_error(&mut self, step: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) {
        self.errors.push(WorkflowError {
            step: step.into(),
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn finish(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}
