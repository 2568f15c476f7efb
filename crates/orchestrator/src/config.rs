//! `OrchestratorConfig`: the typed option surface `execute()` accepts.
//!
//! One field per row of the option table this core exposes. Every field
//! implements `serde(default)` so a config partially populated by an
//! external loader (out of scope here) still deserializes; unknown keys are
//! silently ignored, matching `serde`'s default (no `deny_unknown_fields`).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{BreakerConfig, RetryPolicy};
use crate::task::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub enabled: bool,
    pub system_prompt: Option<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self { enabled: true, system_prompt: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    pub max_age_secs: u64,
    pub failure_threshold: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self { max_age_secs: 3600, failure_threshold: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub concurrency: usize,
    /// Directory the checkpoint-driven workflow state and intermediate
    /// bookkeeping live under.
    pub workspace_dir: String,
    /// Directory extracted artifacts and the final `{workflow_id}.json`
    /// summary are written to.
    pub output_dir: String,
    pub llm_timeout_secs: u64,
    /// Wall-clock ceiling on one task's worker run, covering every retry
    /// attempt within it.
    pub task_timeout_secs: u64,
    pub context_budget_chars: usize,
    pub summary_max_chars: usize,
    pub predecessor_context_lines: usize,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub pool: PoolOptions,
    pub roles: HashMap<Role, RoleConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".to_string(),
            api_key: None,
            model: "default".to_string(),
            concurrency: 4,
            workspace_dir: "./workflow-workspace".to_string(),
            output_dir: "./workflow-output".to_string(),
            llm_timeout_secs: 300,
            task_timeout_secs: 600,
            context_budget_chars: 24_000,
            summary_max_chars: 500,
            predecessor_context_lines: 40,
            temperature: 0.7,
            max_tokens: None,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            pool: PoolOptions::default(),
            roles: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn role_enabled_map(&self) -> HashMap<Role, bool> {
        self.roles.iter().map(|(role, cfg)| (*role, cfg.enabled)).collect()
    }

    pub fn system_prompt_for(&self, role: Role, default_prompt: &str) -> String {
        self.roles
            .get(&role)
            .and_then(|cfg| cfg.system_prompt.clone())
            .unwrap_or_else(|| default_prompt.to_string())
    }
}
