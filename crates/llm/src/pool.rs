//! A process-wide, per-endpoint pool of transport clients that tracks
//! health and recycles unhealthy or stale entries.
//!
//! The pool never blocks and never queues a caller — a miss simply
//! constructs a fresh client. Concurrency is handled by `dashmap::DashMap`
//! rather than a single mutex around the whole table, matching the
//! reference stack's preference for `dashmap` wherever a shared map sees
//! concurrent access from many tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::debug;

use crate::transport::OpenAiCompatibleClient;

const OUTCOME_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_age: Duration,
    pub failure_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_age: Duration::from_secs(3600), failure_threshold: 5 }
    }
}

/// One pooled endpoint client plus its health bookkeeping.
pub struct PooledClient {
    pub client: OpenAiCompatibleClient,
    created_at: Instant,
    total_requests: AtomicU64,
    consecutive_failures: AtomicU32,
    recent_outcomes: Mutex<VecDeque<Outcome>>,
}

impl PooledClient {
    fn new(endpoint: &str, api_key: Option<String>) -> Self {
        let http = Client::builder()
            .pool_max_idle_per_host(32)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client: OpenAiCompatibleClient::with_http_client(endpoint, api_key, http),
            created_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            recent_outcomes: Mutex::new(VecDeque::with_capacity(OUTCOME_WINDOW)),
        }
    }

    fn record(&self, outcome: Outcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Success => self.consecutive_failures.store(0, Ordering::Relaxed),
            Outcome::Failure => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut recent = self.recent_outcomes.lock();
        if recent.len() == OUTCOME_WINDOW {
            recent.pop_front();
        }
        recent.push_back(outcome);
    }

    fn success_rate(&self) -> Option<f64> {
        let recent = self.recent_outcomes.lock();
        if recent.is_empty() {
            return None;
        }
        let successes = recent.iter().filter(|o| **o == Outcome::Success).count();
        Some(successes as f64 / recent.len() as f64)
    }

    fn should_recycle(&self, config: &PoolConfig) -> bool {
        if self.created_at.elapsed() >= config.max_age {
            return true;
        }
        if self.consecutive_failures.load(Ordering::Relaxed) >= config.failure_threshold {
            return true;
        }
        if let Some(rate) = self.success_rate() {
            if self.recent_outcomes.lock().len() == OUTCOME_WINDOW && rate < 0.5 {
                return true;
            }
        }
        false
    }
}

/// One pool per process per endpoint, created lazily on first borrow.
pub struct ClientPool {
    config: PoolConfig,
    api_key: Option<String>,
    entries: DashMap<String, Arc<PooledClient>>,
}

impl ClientPool {
    pub fn new(config: PoolConfig, api_key: Option<String>) -> Self {
        Self { config, api_key, entries: DashMap::new() }
    }

    /// Return a healthy client for `endpoint`, creating or recycling as
    /// needed. Never blocks.
    pub fn borrow(&self, endpoint: &str) -> Arc<PooledClient> {
        if let Some(existing) = self.entries.get(endpoint) {
            if !existing.should_recycle(&self.config) {
                return existing.clone();
            }
            debug!(endpoint, "recycling pooled client");
        }

        let fresh = Arc::new(PooledClient::new(endpoint, self.api_key.clone()));
        self.entries.insert(endpoint.to_string(), fresh.clone());
        fresh
    }

    /// Record the outcome of a call made with a previously borrowed client.
    pub fn release(&self, client: &Arc<PooledClient>, outcome: Outcome) {
        client.record(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_creates_then_reuses_same_client() {
        let pool = ClientPool::new(PoolConfig::default(), None);
        let a = pool.borrow("http://localhost:8080");
        let b = pool.borrow("http://localhost:8080");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_endpoints_get_distinct_clients() {
        let pool = ClientPool::new(PoolConfig::default(), None);
        let a = pool.borrow("http://localhost:8080");
        let b = pool.borrow("http://localhost:9090");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn recycles_after_consecutive_failure_threshold() {
        let pool = ClientPool::new(
            PoolConfig { max_age: Duration::from_secs(3600), failure_threshold: 3 },
            None,
        );
        let first = pool.borrow("http://localhost:8080");
        for _ in 0..3 {
            pool.release(&first, Outcome::Failure);
        }
        let second = pool.borrow("http://localhost:8080");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn recycles_when_success_rate_drops_below_half() {
        let pool = ClientPool::new(
            PoolConfig { max_age: Duration::from_secs(3600), failure_threshold: 100 },
            None,
        );
        let first = pool.borrow("http://localhost:8080");
        for i in 0..OUTCOME_WINDOW {
            let outcome = if i % 4 == 0 { Outcome::Success } else { Outcome::Failure };
            pool.release(&first, outcome);
        }
        let second = pool.borrow("http://localhost:8080");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn healthy_client_is_not_recycled() {
        let pool = ClientPool::new(PoolConfig::default(), None);
        let first = pool.borrow("http://localhost:8080");
        for _ in 0..10 {
            pool.release(&first, Outcome::Success);
        }
        let second = pool.borrow("http://localhost:8080");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
