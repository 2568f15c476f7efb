//! The Task data model: one node in a workflow's dependency graph.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::extractor::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Developer,
    Tester,
    Operator,
    Writer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Analyst => "analyst",
            Role::Developer => "developer",
            Role::Tester => "tester",
            Role::Operator => "operator",
            Role::Writer => "writer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Analyze,
    Design,
    Implement,
    Test,
    Infra,
    Document,
    Fix,
    RegressTest,
    ReleaseNotes,
    Gather,
    Draft,
    Review,
    Technical,
    Operational,
    Summarize,
    Operate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Pending, Cancelled)
                | (Ready, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuccess {
    pub summary: String,
    pub artifacts: Vec<Artifact>,
    pub files_written: Vec<String>,
    pub raw_text: String,
    pub metrics: TaskMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub attempts: u32,
    pub retry_count: u32,
    pub context_shrink: u32,
    pub total_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub error_kind: String,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success(TaskSuccess),
    Failure(TaskFailure),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub role: Role,
    pub operation: Operation,
    pub prompt: String,
    pub depends_on: BTreeSet<String>,
    pub status: TaskStatus,
    pub result: Option<TaskOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Edges into this task that are allowed to end as `Skipped` or `Failed`
    /// rather than `Completed` for fan-in purposes (optional-skip policy).
    pub optional_depends_on: BTreeSet<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, role: Role, operation: Operation, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            operation,
            prompt: prompt.into(),
            depends_on: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            ended_at: None,
            optional_depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn optional_skip(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.depends_on.insert(id.clone());
        self.optional_depends_on.insert(id);
        self
    }

    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidStateTransition { from: self.status, to: next });
        }
        if next == TaskStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if matches!(next, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
            self.ended_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_succeed() {
        let mut task = Task::new("t1", Role::Analyst, Operation::Analyze, "do it");
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut task = Task::new("t1", Role::Analyst, Operation::Analyze, "do it");
        let err = task.transition_to(TaskStatus::Completed).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[test]
    fn ready_can_skip_directly() {
        let mut task = Task::new("t1", Role::Tester, Operation::Test, "do it");
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Skipped).unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);
    }
}
