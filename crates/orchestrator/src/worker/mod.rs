//! Worker runtime: the interface every role executes through, plus the one
//! concrete implementation (`LlmWorker`) all five roles share.

pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::extractor::{self, PathPolicy};
use crate::metrics::Metrics;
use crate::resilience::ResilienceWrapper;
use crate::task::{Role, Task, TaskFailure, TaskOutcome, TaskSuccess};
use crate::workspace::Workspace;

const DEFAULT_SUMMARY_MAX_CHARS: usize = 500;

#[async_trait]
pub trait Worker: Send + Sync {
    fn role(&self) -> Role;

    /// Execute `task`. Returns normally even on failure — a worker never
    /// surfaces an `Err`; failures are represented as `TaskOutcome::Failure`
    /// so the Scheduler has one uniform completion shape to merge.
    async fn run(
        &self,
        task: &Task,
        predecessors: &[&Task],
        requirement: &str,
        context: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> TaskOutcome;
}

pub struct LlmWorker {
    role: Role,
    model: String,
    system_prompt: String,
    resilience: Arc<ResilienceWrapper>,
    workspace: Arc<Workspace>,
    path_policy: PathPolicy,
    metrics: Option<Arc<Metrics>>,
    context_lines: usize,
    summary_max_chars: usize,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl LlmWorker {
    pub fn new(
        role: Role,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        resilience: Arc<ResilienceWrapper>,
        workspace: Arc<Workspace>,
    ) -> Self {
        Self {
            role,
            model: model.into(),
            system_prompt: system_prompt.into(),
            resilience,
            workspace,
            path_policy: PathPolicy::default(),
            metrics: None,
            context_lines: prompt::default_context_lines(),
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_summary_max_chars(mut self, max_chars: usize) -> Self {
        self.summary_max_chars = max_chars;
        self
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: Option<usize>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn summarize(&self, raw_text: &str) -> String {
        let paragraph = raw_text
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or(raw_text.trim());

        if paragraph.chars().count() <= self.summary_max_chars {
            paragraph.to_string()
        } else {
            let truncated: String = paragraph.chars().take(self.summary_max_chars).collect();
            format!("{truncated}…")
        }
    }
}

#[async_trait]
impl Worker for LlmWorker {
    fn role(&self) -> Role {
        self.role
    }

    async fn run(
        &self,
        task: &Task,
        predecessors: &[&Task],
        requirement: &str,
        context: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let request = prompt::compose(
            &self.model,
            &self.system_prompt,
            requirement,
            context,
            task,
            predecessors,
            self.context_lines,
            self.temperature,
            self.max_tokens,
        );

        let outcome = self.resilience.call(self.role, request, cancel).await;

        match outcome.response {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_tokens(usage.prompt_tokens, usage.completion_tokens);
                    }
                }

                let raw_text = response.message.content;
                let extraction = extractor::extract(&raw_text, &self.path_policy);
                for warning in &extraction.warnings {
                    info!(task_id = %task.id, ?warning, "artifact extraction warning");
                }

                let files_written = match self.workspace.write_all(&extraction.artifacts) {
                    Ok(written) => {
                        for (path, collided) in &written {
                            if *collided {
                                if let Some(metrics) = &self.metrics {
                                    metrics.record_collision(path);
                                }
                            }
                        }
                        written.into_iter().map(|(path, _)| path).collect()
                    }
                    Err(e) => {
                        error!(task_id = %task.id, error = %e, "failed to write artifacts to workspace");
                        return TaskOutcome::Failure(TaskFailure {
                            error_kind: "IO".to_string(),
                            message: e.to_string(),
                            attempts: outcome.metrics.attempts,
                        });
                    }
                };

                if let Some(metrics) = &self.metrics {
                    metrics.record_artifacts(self.role, extraction.artifacts.len());
                    metrics.record_task(self.role, true, outcome.metrics.total_latency_ms);
                }

                TaskOutcome::Success(TaskSuccess {
                    summary: self.summarize(&raw_text),
                    artifacts: extraction.artifacts,
                    files_written,
                    raw_text,
                    metrics: outcome.metrics,
                })
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_task(self.role, false, outcome.metrics.total_latency_ms);
                }
                TaskOutcome::Failure(TaskFailure {
                    error_kind: err.kind_name().to_string(),
                    message: err.to_string(),
                    attempts: outcome.metrics.attempts,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_picks_first_nonempty_paragraph() {
        let worker = make_worker();
        let text = "\n\nFirst real paragraph.\n\nSecond paragraph.";
        assert_eq!(worker.summarize(text), "First real paragraph.");
    }

    #[test]
    fn summarize_truncates_long_paragraphs() {
        let worker = make_worker();
        let text = "a".repeat(600);
        let summary = worker.summarize(&text);
        assert!(summary.chars().count() <= DEFAULT_SUMMARY_MAX_CHARS + 1);
        assert!(summary.ends_with('…'));
    }

    fn make_worker() -> LlmWorker {
        let pool = Arc::new(llm::ClientPool::new(llm::PoolConfig::default(), None));
        let resilience =
            Arc::new(ResilienceWrapper::new(pool, "http://127.0.0.1:1", crate::resilience::ResilienceConfig::default()));
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(Workspace::new(dir.path()).unwrap());
        LlmWorker::new(Role::Developer, "gpt", "you are a developer", resilience, workspace)
    }
}
