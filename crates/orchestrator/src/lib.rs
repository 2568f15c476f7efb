//! Multi-agent workflow orchestration: a DAG of role-specific LLM calls
//! driven to completion with retries, a circuit breaker per role, durable
//! checkpointing, and deterministic extraction of the files an LLM's
//! response describes.

pub mod config;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod metrics;
pub mod resilience;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod worker;
pub mod workflow;
pub mod workspace;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use state::{WorkflowState, WorkflowStatus};
pub use task::{Role, Task, TaskOutcome};
pub use workflow::Context;

use checkpoint::CheckpointSaver;
use metrics::{CorrelationId, Metrics};
use resilience::{ResilienceConfig, ResilienceWrapper};
use worker::{LlmWorker, Worker};

/// Drive `workflow_type` to completion (or resume one already in progress,
/// when `context["workflow_id"]` names a known workflow).
pub async fn execute<C>(
    workflow_type: &str,
    requirement: String,
    context: Context,
    options: OrchestratorConfig,
    checkpoint: Arc<C>,
    cancel: CancellationToken,
) -> Result<WorkflowState>
where
    C: CheckpointSaver<WorkflowState> + 'static,
{
    let enabled_roles = options.role_enabled_map();
    let correlation_id = CorrelationId::new();
    let metrics = Arc::new(Metrics::new(correlation_id.clone()));

    let (graph, state) = match context.get("workflow_id").cloned() {
        Some(existing_id) => {
            let mut graph = workflow::instantiate(workflow_type, &requirement, &context, &enabled_roles)?;
            match checkpoint.latest(&existing_id).await? {
                Some(record) => {
                    info!(workflow_id = %existing_id, "resuming workflow from checkpoint");
                    replay_completed(&mut graph, &record.state_snapshot);
                    (graph, record.state_snapshot)
                }
                None => {
                    let state = WorkflowState::new(existing_id, workflow_type, requirement.clone(), context.clone(), correlation_id.to_string());
                    (graph, state)
                }
            }
        }
        None => {
            let graph = workflow::instantiate(workflow_type, &requirement, &context, &enabled_roles)?;
            let workflow_id = mint_workflow_id();
            let state = WorkflowState::new(workflow_id, workflow_type, requirement.clone(), context.clone(), correlation_id.to_string());
            (graph, state)
        }
    };

    let pool = Arc::new(llm::ClientPool::new(
        llm::PoolConfig {
            max_age: std::time::Duration::from_secs(options.pool.max_age_secs),
            failure_threshold: options.pool.failure_threshold,
        },
        options.api_key.clone(),
    ));
    let resilience_config = ResilienceConfig {
        retry: options.retry,
        breaker: options.breaker,
        llm_timeout: options.llm_timeout(),
        context_budget_chars: options.context_budget_chars,
    };
    let resilience =
        Arc::new(ResilienceWrapper::new(pool, options.api_base.clone(), resilience_config).with_metrics(metrics.clone()));
    let workspace = Arc::new(workspace::Workspace::new(&options.workspace_dir)?);

    let mut workers: HashMap<Role, Arc<dyn Worker>> = HashMap::new();
    for role in [Role::Analyst, Role::Developer, Role::Tester, Role::Operator, Role::Writer] {
        let prompt = options.system_prompt_for(role, default_system_prompt(role));
        let worker = LlmWorker::new(role, options.model.clone(), prompt, resilience.clone(), workspace.clone())
            .with_metrics(metrics.clone())
            .with_summary_max_chars(options.summary_max_chars)
            .with_context_lines(options.predecessor_context_lines)
            .with_generation(options.temperature, options.max_tokens);
        workers.insert(role, Arc::new(worker));
    }

    let conditional_edge = workflow::conditional_edge_for(workflow_type);
    let scheduler =
        scheduler::Scheduler::new(workers, checkpoint, options.concurrency, conditional_edge, options.task_timeout());

    let final_state = scheduler.run(graph, state, cancel).await;
    write_output(&options.output_dir, &final_state)?;

    Ok(final_state)
}

fn replay_completed(graph: &mut graph::TaskGraph, state: &WorkflowState) {
    let mut outcomes: HashMap<String, TaskOutcome> = HashMap::new();
    for entries in state.per_role_outputs.values() {
        for entry in entries {
            outcomes.insert(entry.task_id.clone(), entry.outcome.clone());
        }
    }

    for task_id in &state.completed_steps {
        let Some(outcome) = outcomes.get(task_id).cloned() else { continue };
        if graph.get(task_id).is_none() {
            continue;
        }
        let _ = graph.mark_ready(task_id);
        let _ = graph.mark_started(task_id);
        match &outcome {
            TaskOutcome::Success(_) => {
                let _ = graph.mark_completed(task_id, outcome);
            }
            TaskOutcome::Failure(_) => {
                let _ = graph.mark_failed(task_id, outcome);
            }
        }
    }
}

fn mint_workflow_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{timestamp}-{suffix}")
}

fn write_output(output_dir: &str, state: &WorkflowState) -> Result<()> {
    let path = std::path::Path::new(output_dir).join(format!("{}.json", state.workflow_id));
    let json = serde_json::to_string_pretty(state).map_err(|e| OrchestratorError::Io(e.to_string()))?;
    std::fs::write(&path, json).map_err(|e| OrchestratorError::Io(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

fn default_system_prompt(role: Role) -> &'static str {
    match role {
        Role::Analyst => "You are an analyst. Investigate the requirement and produce a clear, factual analysis.",
        Role::Developer => "You are a developer. Produce correct, idiomatic code for the requested change, each file in its own fenced code block with an explicit file path.",
        Role::Tester => "You are a tester. Write and describe tests that verify the requested change, each file in its own fenced code block with an explicit file path.",
        Role::Operator => "You are an operator. Validate the change operates correctly in a realistic environment and report any issues found.",
        Role::Writer => "You are a technical writer. Summarize the work done in clear prose suitable for a changelog or documentation.",
    }
}
