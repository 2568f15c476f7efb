//! Retry policy: exponential backoff with jitter over a classified error
//! set, plus the single-shot context-overflow shrink path.
//!
//! Grounded on the reference stack's `executor::retry` module, with the
//! backoff formula pinned to the exact closed form this core requires
//! rather than the reference's `multiplier.powi` approximation:
//! `delay_n = min(T_cap, T_init * 2^(n-1)) * (1 + U(0, J))`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OrchestratorError;
use llm::Message;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before attempt `n` (1-indexed: the sleep before the
    /// second attempt is `backoff_delay(1)`).
    pub fn backoff_delay(&self, n: u32) -> Duration {
        let base_secs = self.initial_delay.as_secs_f64() * 2f64.powi((n as i32) - 1);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(capped_secs * jitter_factor)
    }

    pub fn is_retriable(&self, err: &OrchestratorError) -> bool {
        err.is_retriable()
    }
}

/// Drop oldest non-system messages until the total content length is under
/// `budget` characters; if every non-system message is gone and it is still
/// over budget, truncate each remaining message's content to its last
/// `budget / n` characters. Single-shot: callers must not recurse.
pub fn shrink(messages: &[Message], budget: usize) -> Vec<Message> {
    let total: usize = messages.iter().map(|m| m.content.len()).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let (system, rest): (Vec<_>, Vec<_>) =
        messages.iter().cloned().partition(|m| m.role == llm::Role::System);

    let mut shrunk = system;
    let mut remaining = rest;
    let mut running_total: usize = shrunk.iter().map(|m| m.content.len()).sum();
    running_total += remaining.iter().map(|m| m.content.len()).sum::<usize>();

    while running_total > budget && remaining.len() > 1 {
        let dropped = remaining.remove(0);
        running_total = running_total.saturating_sub(dropped.content.len());
        warn!(dropped_len = dropped.content.len(), "dropped oldest message during context shrink");
    }

    shrunk.extend(remaining);

    let still_over = shrunk.iter().map(|m| m.content.len()).sum::<usize>() > budget;
    if still_over && !shrunk.is_empty() {
        let per_message = (budget / shrunk.len()).max(1);
        for m in shrunk.iter_mut() {
            if m.content.len() > per_message {
                let start = m.content.len() - per_message;
                let boundary = (start..m.content.len())
                    .find(|&i| m.content.is_char_boundary(i))
                    .unwrap_or(start);
                m.content = m.content[boundary..].to_string();
            }
        }
    }

    shrunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_respects_exponential_growth_and_cap() {
        let policy = RetryPolicy { jitter: 0.0, ..RetryPolicy::default() };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        // attempt large enough to exceed max_delay
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn jitter_only_adds_time_never_subtracts() {
        let policy = RetryPolicy::default();
        for n in 1..=5 {
            let base = policy.initial_delay.as_secs_f64() * 2f64.powi(n - 1);
            let capped = base.min(policy.max_delay.as_secs_f64());
            let delay = policy.backoff_delay(n as u32);
            assert!(delay.as_secs_f64() >= capped - 1e-9);
            assert!(delay.as_secs_f64() <= capped * (1.0 + policy.jitter) + 1e-9);
        }
    }

    #[test]
    fn shrink_drops_oldest_nonsystem_messages_first() {
        let messages = vec![
            Message::system("you are an agent"),
            Message::user(&"a".repeat(100)),
            Message::user(&"b".repeat(100)),
        ];
        let shrunk = shrink(&messages, 150);
        let total_after: usize = shrunk.iter().map(|m| m.content.len()).sum();
        assert!(total_after < 200);
        assert!(shrunk.iter().any(|m| m.role == llm::Role::System));
    }

    #[test]
    fn shrink_is_noop_when_already_under_budget() {
        let messages = vec![Message::user("short")];
        let shrunk = shrink(&messages, 1000);
        assert_eq!(shrunk.len(), 1);
        assert_eq!(shrunk[0].content, "short");
    }
}
