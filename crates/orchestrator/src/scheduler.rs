//! Scheduler: drives a `TaskGraph` to completion against a fixed pool of
//! workers, one role each, honoring a concurrency cap and the one
//! conditional-routing edge a template may register.
//!
//! Single serialization point: every task completion is merged into
//! `WorkflowState` and checkpointed from the same `select!` arm, so there is
//! never more than one writer touching `WorkflowState` or the checkpoint
//! store at a time — no locking is needed around either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use checkpoint::{CheckpointRecord, CheckpointSaver};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::graph::TaskGraph;
use crate::state::{WorkflowState, WorkflowStatus};
use crate::task::{Role, TaskFailure, TaskOutcome};
use crate::workflow::ConditionalEdge;
use crate::worker::Worker;

pub struct Scheduler<S>
where
    S: CheckpointSaver<WorkflowState>,
{
    workers: HashMap<Role, Arc<dyn Worker>>,
    checkpoint: Arc<S>,
    concurrency: usize,
    conditional_edge: Option<&'static ConditionalEdge>,
    task_timeout: Duration,
}

impl<S> Scheduler<S>
where
    S: CheckpointSaver<WorkflowState>,
{
    pub fn new(
        workers: HashMap<Role, Arc<dyn Worker>>,
        checkpoint: Arc<S>,
        concurrency: usize,
        conditional_edge: Option<&'static ConditionalEdge>,
        task_timeout: Duration,
    ) -> Self {
        Self { workers, checkpoint, concurrency, conditional_edge, task_timeout }
    }

    pub async fn run(
        &self,
        mut graph: TaskGraph,
        mut state: WorkflowState,
        cancel: CancellationToken,
    ) -> WorkflowState {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut in_flight = FuturesUnordered::new();

        self.spawn_ready(&mut graph, &state, &semaphore, &cancel, &mut in_flight);

        while let Some((task_id, outcome)) = in_flight.next().await {
            if cancel.is_cancelled() {
                let _ = graph.mark_cancelled(&task_id);
                state.record_error(&task_id, "CANCELLED", "workflow cancelled before task completion");
                continue;
            }

            let role = graph.get(&task_id).map(|t| t.role);
            match &outcome {
                TaskOutcome::Success(success) => {
                    info!(task_id = %task_id, "task completed");
                    let _ = graph.mark_completed(&task_id, outcome.clone());
                    state.record_files(success.files_written.clone());
                }
                TaskOutcome::Failure(failure) => {
                    warn!(task_id = %task_id, error = %failure.message, "task failed");
                    let _ = graph.mark_failed(&task_id, outcome.clone());
                    state.record_error(&task_id, &failure.error_kind, &failure.message);
                }
            }
            if let Some(role) = role {
                state.record_task_result(&task_id, role, outcome);
            }

            self.apply_conditional_edge(&task_id, &mut graph);

            if let Err(e) = self
                .checkpoint
                .append(CheckpointRecord::new(state.workflow_id.clone(), task_id.clone(), state.clone()))
                .await
            {
                warn!(error = %e, "failed to append checkpoint, continuing without durable record");
            }

            if cancel.is_cancelled() {
                continue;
            }
            self.spawn_ready(&mut graph, &state, &semaphore, &cancel, &mut in_flight);
        }

        let status = if cancel.is_cancelled() {
            WorkflowStatus::Cancelled
        } else if graph.all_terminal() && state.errors.is_empty() {
            WorkflowStatus::Completed
        } else if graph.all_terminal() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Failed
        };
        state.finish(status);

        if let Err(e) = self
            .checkpoint
            .append(CheckpointRecord::new(state.workflow_id.clone(), "workflow_final", state.clone()))
            .await
        {
            warn!(error = %e, "failed to append final checkpoint");
        }

        state
    }

    fn apply_conditional_edge(&self, completed_task_id: &str, graph: &mut TaskGraph) {
        let Some(edge) = self.conditional_edge else { return };
        if edge.after != completed_task_id {
            return;
        }
        let Some(task) = graph.get(completed_task_id) else { return };
        if (edge.skip_if)(task) {
            for target in edge.targets {
                if let Some(t) = graph.get(target) {
                    if t.status == crate::task::TaskStatus::Pending {
                        let _ = graph.mark_ready(target);
                        let _ = graph.mark_skipped(target);
                        info!(task_id = %target, "skipped by conditional routing");
                    }
                }
            }
        }
    }

    fn spawn_ready(
        &self,
        graph: &mut TaskGraph,
        state: &WorkflowState,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
        in_flight: &mut FuturesUnordered<std::pin::Pin<Box<dyn std::future::Future<Output = (String, TaskOutcome)> + Send>>>,
    ) {
        for task_id in graph.ready_tasks() {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else { break };

            let task = graph.get(&task_id).expect("ready task exists").clone();
            let predecessors: Vec<_> = graph.predecessors(&task_id).into_iter().cloned().collect();
            let Some(worker) = self.workers.get(&task.role).cloned() else {
                continue;
            };

            let _ = graph.mark_ready(&task_id);
            let _ = graph.mark_started(&task_id);

            let requirement = state.requirement.clone();
            let context = state.context.clone();
            let cancel = cancel.clone();
            let task_timeout = self.task_timeout;

            let fut = Box::pin(async move {
                let _permit = permit;
                let predecessor_refs: Vec<&crate::task::Task> = predecessors.iter().collect();
                let run_id = task_id.clone();
                let outcome = match tokio::time::timeout(
                    task_timeout,
                    worker.run(&task, &predecessor_refs, &requirement, &context, cancel),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => TaskOutcome::Failure(TaskFailure {
                        error_kind: "TIMEOUT".to_string(),
                        message: format!("task {run_id} exceeded the configured task timeout"),
                        attempts: 0,
                    }),
                };
                (task_id, outcome)
            });
            in_flight.push(fut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use checkpoint::InMemoryCheckpointSaver;
    use std::collections::HashMap as Map;

    struct EchoWorker(Role);

    #[async_trait]
    impl Worker for EchoWorker {
        fn role(&self) -> Role {
            self.0
        }

        async fn run(
            &self,
            task: &crate::task::Task,
            _predecessors: &[&crate::task::Task],
            _requirement: &str,
            _context: &Map<String, String>,
            _cancel: CancellationToken,
        ) -> TaskOutcome {
            TaskOutcome::Success(crate::task::TaskSuccess {
                summary: format!("{} done", task.id),
                artifacts: Vec::new(),
                files_written: Vec::new(),
                raw_text: "ok".to_string(),
                metrics: crate::task::TaskMetrics::default(),
            })
        }
    }

    #[tokio::test]
    async fn runs_linear_graph_to_completion() {
        let mut graph = TaskGraph::new();
        graph
            .add_task(crate::task::Task::new("analyze", Role::Analyst, crate::task::Operation::Analyze, "go"))
            .unwrap();
        let fix = crate::task::Task::new("fix", Role::Developer, crate::task::Operation::Fix, "go").depends_on("analyze");
        graph.add_task(fix).unwrap();

        let mut workers: HashMap<Role, Arc<dyn Worker>> = HashMap::new();
        workers.insert(Role::Analyst, Arc::new(EchoWorker(Role::Analyst)));
        workers.insert(Role::Developer, Arc::new(EchoWorker(Role::Developer)));

        let checkpoint: Arc<InMemoryCheckpointSaver<WorkflowState>> = Arc::new(InMemoryCheckpointSaver::new());
        let scheduler = Scheduler::new(workers, checkpoint, 2, None, Duration::from_secs(30));

        let state = WorkflowState::new("wf-1", "bug_fix", "fix it", Map::new(), "corr-1");
        let final_state = scheduler.run(graph, state, CancellationToken::new()).await;

        assert!(final_state.is_success());
        assert_eq!(final_state.completed_steps, vec!["analyze".to_string(), "fix".to_string()]);
    }
}
