//! Metrics & Correlation: counters, a small hand-rolled histogram, and a
//! per-workflow correlation id threaded through every task and LLM call.
//!
//! Backed by `dashmap` rather than pulling in `prometheus`/`metrics`
//! wholesale for this core — those are reserved for an out-of-scope
//! aggregation surface. Pull interface is [`Metrics::snapshot`]; push hook
//! is [`Metrics::subscribe`], a `tokio::sync::broadcast` receiver so an
//! external aggregator can tap every measurement live.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::resilience::breaker::BreakerState;
use crate::task::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum MetricEvent {
    TaskCompleted { role: Role, success: bool, duration_ms: u64 },
    RetryAttempted { role: Role },
    BreakerTransitioned { role: Role, state: BreakerState },
    PoolBorrow { endpoint: String },
    PoolRelease { endpoint: String, success: bool },
    TokensUsed { prompt: usize, completion: usize },
    ArtifactsProduced { role: Role, count: usize },
    CollisionDetected { path: String },
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RoleCounters {
    pub task_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub duration_samples_ms: Vec<u64>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub per_role: std::collections::HashMap<Role, RoleCounters>,
    pub retry_count: u64,
    pub breaker_transitions: u64,
    pub pool_borrows: u64,
    pub pool_releases: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub artifacts_histogram: Vec<usize>,
    pub collisions: u64,
    pub workflow_started_at: DateTime<Utc>,
    pub workflow_duration_ms: Option<u64>,
}

pub struct Metrics {
    correlation_id: CorrelationId,
    per_role: DashMap<Role, RoleCounters>,
    retry_count: std::sync::atomic::AtomicU64,
    breaker_transitions: std::sync::atomic::AtomicU64,
    pool_borrows: std::sync::atomic::AtomicU64,
    pool_releases: std::sync::atomic::AtomicU64,
    tokens_in: std::sync::atomic::AtomicU64,
    tokens_out: std::sync::atomic::AtomicU64,
    artifacts_histogram: parking_lot::Mutex<Vec<usize>>,
    collisions: std::sync::atomic::AtomicU64,
    started_at: DateTime<Utc>,
    sender: broadcast::Sender<MetricEvent>,
}

impl Metrics {
    pub fn new(correlation_id: CorrelationId) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            correlation_id,
            per_role: DashMap::new(),
            retry_count: Default::default(),
            breaker_transitions: Default::default(),
            pool_borrows: Default::default(),
            pool_releases: Default::default(),
            tokens_in: Default::default(),
            tokens_out: Default::default(),
            artifacts_histogram: parking_lot::Mutex::new(Vec::new()),
            collisions: Default::default(),
            started_at: Utc::now(),
            sender,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.sender.subscribe()
    }

    fn emit(&self, event: MetricEvent) {
        let _ = self.sender.send(event);
    }

    pub fn record_task(&self, role: Role, success: bool, duration_ms: u64) {
        let mut entry = self.per_role.entry(role).or_default();
        entry.task_count += 1;
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }
        entry.duration_samples_ms.push(duration_ms);
        drop(entry);
        self.emit(MetricEvent::TaskCompleted { role, success, duration_ms });
    }

    pub fn record_retry(&self, role: Role) {
        self.retry_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::RetryAttempted { role });
    }

    pub fn record_breaker_transition(&self, role: Role, state: BreakerState) {
        self.breaker_transitions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::BreakerTransitioned { role, state });
    }

    pub fn record_pool_borrow(&self, endpoint: &str) {
        self.pool_borrows.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::PoolBorrow { endpoint: endpoint.to_string() });
    }

    pub fn record_pool_release(&self, endpoint: &str, success: bool) {
        self.pool_releases.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::PoolRelease { endpoint: endpoint.to_string(), success });
    }

    pub fn record_tokens(&self, prompt: usize, completion: usize) {
        self.tokens_in.fetch_add(prompt as u64, std::sync::atomic::Ordering::Relaxed);
        self.tokens_out.fetch_add(completion as u64, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::TokensUsed { prompt, completion });
    }

    pub fn record_artifacts(&self, role: Role, count: usize) {
        self.artifacts_histogram.lock().push(count);
        self.emit(MetricEvent::ArtifactsProduced { role, count });
    }

    pub fn record_collision(&self, path: &str) {
        self.collisions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.emit(MetricEvent::CollisionDetected { path: path.to_string() });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        MetricsSnapshot {
            per_role: self.per_role.iter().map(|e| (*e.key(), e.value().clone())).collect(),
            retry_count: self.retry_count.load(Relaxed),
            breaker_transitions: self.breaker_transitions.load(Relaxed),
            pool_borrows: self.pool_borrows.load(Relaxed),
            pool_releases: self.pool_releases.load(Relaxed),
            tokens_in: self.tokens_in.load(Relaxed),
            tokens_out: self.tokens_out.load(Relaxed),
            artifacts_histogram: self.artifacts_histogram.lock().clone(),
            collisions: self.collisions.load(Relaxed),
            workflow_started_at: self.started_at,
            workflow_duration_ms: Some((Utc::now() - self.started_at).num_milliseconds().max(0) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_aggregates_per_role_counters() {
        let metrics = Metrics::new(CorrelationId::new());
        metrics.record_task(Role::Developer, true, 120);
        metrics.record_task(Role::Developer, false, 80);

        let snapshot = metrics.snapshot();
        let counters = &snapshot.per_role[&Role::Developer];
        assert_eq!(counters.task_count, 2);
        assert_eq!(counters.success_count, 1);
        assert_eq!(counters.failure_count, 1);
    }

    #[tokio::test]
    async fn subscribers_observe_every_measurement() {
        let metrics = Metrics::new(CorrelationId::new());
        let mut rx = metrics.subscribe();
        metrics.record_retry(Role::Tester);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, MetricEvent::RetryAttempted { role: Role::Tester }));
    }
}
