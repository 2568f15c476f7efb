//! Ties client pool, circuit breaker, and retry policy into one call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use llm::{ChatModel, ChatRequest, ChatResponse, ClientPool, Message, Outcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::metrics::Metrics;
use crate::resilience::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::resilience::retry::{shrink, RetryPolicy};
use crate::task::{Role, TaskMetrics};

#[derive(Clone)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub llm_timeout: Duration,
    pub context_budget_chars: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            llm_timeout: Duration::from_secs(300),
            context_budget_chars: 24_000,
        }
    }
}

pub struct ResilienceWrapper {
    pool: Arc<ClientPool>,
    endpoint: String,
    breakers: dashmap::DashMap<Role, Arc<CircuitBreaker>>,
    config: ResilienceConfig,
    metrics: Option<Arc<Metrics>>,
}

pub struct CallOutcome {
    pub response: Result<ChatResponse, OrchestratorError>,
    pub metrics: TaskMetrics,
}

impl ResilienceWrapper {
    pub fn new(pool: Arc<ClientPool>, endpoint: impl Into<String>, config: ResilienceConfig) -> Self {
        Self { pool, endpoint: endpoint.into(), breakers: dashmap::DashMap::new(), config, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn breaker_for(&self, role: Role) -> Arc<CircuitBreaker> {
        match self.breakers.entry(role) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let breaker = Arc::new(CircuitBreaker::new(role.as_str(), self.config.breaker));
                e.insert(breaker.clone());
                breaker
            }
        }
    }

    /// One logical call: breaker admission checked once, then up to
    /// `retry.max_attempts` attempts, each borrowing its own pooled client
    /// and releasing it with that attempt's own outcome, with a single
    /// non-recursive context-shrink retry on `ContextOverflow`.
    pub async fn call(&self, role: Role, request: ChatRequest, cancel: CancellationToken) -> CallOutcome {
        let breaker = self.breaker_for(role);
        let pool = self.pool.clone();
        let endpoint = self.endpoint.clone();
        let metrics = self.metrics.clone();

        let call_once = move |req: ChatRequest, cancel: CancellationToken, timeout: Duration| {
            let pool = pool.clone();
            let endpoint = endpoint.clone();
            let metrics = metrics.clone();
            async move {
                let pooled = pool.borrow(&endpoint);
                if let Some(metrics) = &metrics {
                    metrics.record_pool_borrow(&endpoint);
                }

                let result = stream_chat(&pooled.client, req, cancel, timeout).await;

                let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
                pool.release(&pooled, outcome);
                if let Some(metrics) = &metrics {
                    metrics.record_pool_release(&endpoint, result.is_ok());
                }

                result
            }
        };

        run_with_retry(call_once, &self.config, &breaker, role, self.metrics.as_deref(), request, cancel).await
    }

    pub fn breaker_states(&self) -> HashMap<Role, BreakerState> {
        self.breakers.iter().map(|e| (*e.key(), e.value().state())).collect()
    }
}

/// Consume `model`'s streamed response, folding every chunk's delta into one
/// accumulated message. The wire format this core speaks carries no usage
/// totals in its stream frames, so a streamed `ChatResponse` always reports
/// `usage: None`.
async fn stream_chat<M>(model: &M, request: ChatRequest, cancel: CancellationToken, timeout: Duration) -> llm::Result<ChatResponse>
where
    M: ChatModel + ?Sized,
{
    let mut chunks = model.stream(request, cancel, timeout).await?;
    let mut raw_text = String::new();
    while let Some(chunk) = chunks.next().await {
        raw_text.push_str(&chunk?.delta);
    }
    Ok(ChatResponse { message: Message::assistant(raw_text), usage: None })
}

fn note_breaker_transition(breaker: &CircuitBreaker, role: Role, prior: BreakerState, metrics: Option<&Metrics>) {
    let current = breaker.state();
    if current != prior {
        if let Some(metrics) = metrics {
            metrics.record_breaker_transition(role, current);
        }
    }
}

/// The retry/breaker/shrink core, generic over a per-attempt `call_once`
/// closure so it can be driven by a lightweight in-process stub in tests
/// without a real endpoint or the client pool. `call_once` is responsible
/// for borrowing and releasing whatever resource backs one attempt.
pub async fn run_with_retry<Call, Fut>(
    mut call_once: Call,
    config: &ResilienceConfig,
    breaker: &CircuitBreaker,
    role: Role,
    metrics: Option<&Metrics>,
    mut request: ChatRequest,
    cancel: CancellationToken,
) -> CallOutcome
where
    Call: FnMut(ChatRequest, CancellationToken, Duration) -> Fut,
    Fut: std::future::Future<Output = llm::Result<ChatResponse>>,
{
    let mut metrics_out = TaskMetrics::default();
    let start = Instant::now();

    let prior_state = breaker.state();
    if let Err(e) = breaker.try_acquire() {
        note_breaker_transition(breaker, role, prior_state, metrics);
        metrics_out.total_latency_ms = start.elapsed().as_millis() as u64;
        return CallOutcome { response: Err(e), metrics: metrics_out };
    }
    note_breaker_transition(breaker, role, prior_state, metrics);

    let mut shrunk_once = false;
    let mut last_err = None;

    for attempt in 1..=config.retry.max_attempts {
        metrics_out.attempts = attempt;

        let result = call_once(request.clone(), cancel.clone(), config.llm_timeout).await;

        match result {
            Ok(response) => {
                let prior_state = breaker.state();
                breaker.on_success();
                note_breaker_transition(breaker, role, prior_state, metrics);
                metrics_out.total_latency_ms = start.elapsed().as_millis() as u64;
                return CallOutcome { response: Ok(response), metrics: metrics_out };
            }
            Err(llm_err) => {
                let err: OrchestratorError = llm_err.into();

                if matches!(err, OrchestratorError::ContextOverflow) && !shrunk_once {
                    shrunk_once = true;
                    metrics_out.context_shrink += 1;
                    metrics_out.retry_count += 1;
                    if let Some(metrics) = metrics {
                        metrics.record_retry(role);
                    }
                    request.messages = shrink(&request.messages, config.context_budget_chars);
                    debug!("retrying once with shrunk context after overflow");
                    last_err = Some(err);
                    continue;
                }

                if !err.is_retriable() || attempt == config.retry.max_attempts {
                    let prior_state = breaker.state();
                    breaker.on_failure();
                    note_breaker_transition(breaker, role, prior_state, metrics);
                    metrics_out.total_latency_ms = start.elapsed().as_millis() as u64;
                    return CallOutcome { response: Err(err), metrics: metrics_out };
                }

                metrics_out.retry_count += 1;
                if let Some(metrics) = metrics {
                    metrics.record_retry(role);
                }
                let delay = config.retry.backoff_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient LLM failure");
                last_err = Some(err);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        let prior_state = breaker.state();
                        breaker.on_failure();
                        note_breaker_transition(breaker, role, prior_state, metrics);
                        metrics_out.total_latency_ms = start.elapsed().as_millis() as u64;
                        return CallOutcome { response: Err(OrchestratorError::Cancelled), metrics: metrics_out };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let prior_state = breaker.state();
    breaker.on_failure();
    note_breaker_transition(breaker, role, prior_state, metrics);
    metrics_out.total_latency_ms = start.elapsed().as_millis() as u64;
    CallOutcome {
        response: Err(last_err.unwrap_or(OrchestratorError::Fatal("retry loop exited without result".into()))),
        metrics: metrics_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use llm::{ChatChunk, ChatStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        responses: Vec<Result<&'static str, llm::LlmError>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<&'static str, llm::LlmError>>) -> Self {
            Self { responses, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, _r: ChatRequest, _c: CancellationToken, _t: Duration) -> llm::Result<ChatResponse> {
            unimplemented!("production code only calls stream()")
        }

        async fn stream(&self, _r: ChatRequest, _c: CancellationToken, _t: Duration) -> llm::Result<ChatStream> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[idx.min(self.responses.len() - 1)] {
                Ok(text) => {
                    let text = text.to_string();
                    Ok(Box::pin(stream::once(async move { Ok(ChatChunk { delta: text }) })))
                }
                Err(e) => {
                    let e = clone_err(e);
                    Ok(Box::pin(stream::once(async move { Err(e) })))
                }
            }
        }
    }

    fn clone_err(e: &llm::LlmError) -> llm::LlmError {
        match e {
            llm::LlmError::Network(s) => llm::LlmError::Network(s.clone()),
            llm::LlmError::Timeout => llm::LlmError::Timeout,
            llm::LlmError::Http5xx { status, body } => llm::LlmError::Http5xx { status: *status, body: body.clone() },
            llm::LlmError::Http4xx { status, body } => llm::LlmError::Http4xx { status: *status, body: body.clone() },
            llm::LlmError::ContextOverflow(s) => llm::LlmError::ContextOverflow(s.clone()),
            llm::LlmError::Parse(s) => llm::LlmError::Parse(s.clone()),
            llm::LlmError::Cancelled => llm::LlmError::Cancelled,
        }
    }

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: 0.0,
            },
            ..Default::default()
        }
    }

    fn scripted_call(
        model: Arc<ScriptedModel>,
    ) -> impl FnMut(ChatRequest, CancellationToken, Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = llm::Result<ChatResponse>> + Send>>
    {
        move |req, cancel, timeout| {
            let model = model.clone();
            Box::pin(async move { stream_chat(model.as_ref(), req, cancel, timeout).await })
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(llm::LlmError::Http5xx { status: 500, body: "boom".into() }),
            Err(llm::LlmError::Http5xx { status: 500, body: "boom".into() }),
            Ok("done"),
        ]));
        let breaker = CircuitBreaker::new("developer", BreakerConfig::default());
        let request = ChatRequest::new("m", vec![Message::user("hi")]);

        let outcome = run_with_retry(
            scripted_call(model),
            &fast_config(),
            &breaker,
            Role::Developer,
            None,
            request,
            CancellationToken::new(),
        )
        .await;

        assert!(outcome.response.is_ok());
        assert_eq!(outcome.metrics.retry_count, 2);
    }

    #[tokio::test]
    async fn context_overflow_triggers_single_shrink_then_succeeds() {
        let model = Arc::new(ScriptedModel::new(vec![Err(llm::LlmError::ContextOverflow("too many tokens".into())), Ok("done")]));
        let breaker = CircuitBreaker::new("developer", BreakerConfig::default());
        let request = ChatRequest::new("m", vec![Message::user(&"x".repeat(1000))]);

        let outcome = run_with_retry(
            scripted_call(model),
            &fast_config(),
            &breaker,
            Role::Developer,
            None,
            request,
            CancellationToken::new(),
        )
        .await;

        assert!(outcome.response.is_ok());
        assert_eq!(outcome.metrics.context_shrink, 1);
    }

    #[tokio::test]
    async fn non_retriable_4xx_fails_immediately_without_backoff() {
        let model = Arc::new(ScriptedModel::new(vec![Err(llm::LlmError::Http4xx { status: 400, body: "bad".into() })]));
        let breaker = CircuitBreaker::new("developer", BreakerConfig::default());
        let request = ChatRequest::new("m", vec![Message::user("hi")]);

        let outcome = run_with_retry(
            scripted_call(model),
            &fast_config(),
            &breaker,
            Role::Developer,
            None,
            request,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome.response, Err(OrchestratorError::Http4xx { status: 400 })));
        assert_eq!(outcome.metrics.attempts, 1);
    }

    #[tokio::test]
    async fn open_breaker_rejects_before_any_call() {
        let model = Arc::new(ScriptedModel::new(vec![Err(llm::LlmError::Network("down".into()))]));
        let breaker = CircuitBreaker::new("developer", BreakerConfig { failure_threshold: 1, ..Default::default() });

        let request = ChatRequest::new("m", vec![Message::user("hi")]);
        let outcome = run_with_retry(
            scripted_call(model.clone()),
            &fast_config(),
            &breaker,
            Role::Developer,
            None,
            request,
            CancellationToken::new(),
        )
        .await;
        assert!(outcome.response.is_err());

        let request2 = ChatRequest::new("m", vec![Message::user("hi")]);
        let outcome2 = run_with_retry(
            scripted_call(model),
            &fast_config(),
            &breaker,
            Role::Developer,
            None,
            request2,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(outcome2.response, Err(OrchestratorError::OpenCircuit { .. })));
    }

    #[tokio::test]
    async fn retry_and_breaker_transitions_are_recorded_in_metrics() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(llm::LlmError::Network("down".into())),
            Err(llm::LlmError::Network("down".into())),
        ]));
        let breaker = CircuitBreaker::new("developer", BreakerConfig { failure_threshold: 1, ..Default::default() });
        let metrics = Metrics::new(crate::metrics::CorrelationId::new());
        let request = ChatRequest::new("m", vec![Message::user("hi")]);
        let config = ResilienceConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: 0.0,
            },
            ..Default::default()
        };

        let outcome = run_with_retry(
            scripted_call(model),
            &config,
            &breaker,
            Role::Developer,
            Some(&metrics),
            request,
            CancellationToken::new(),
        )
        .await;

        assert!(outcome.response.is_err());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.breaker_transitions, 1);
    }

    #[test]
    fn breaker_for_is_stable_per_role() {
        let pool = Arc::new(ClientPool::new(llm::PoolConfig::default(), None));
        let wrapper = ResilienceWrapper::new(pool, "http://127.0.0.1:1", ResilienceConfig::default());
        let a = wrapper.breaker_for(Role::Developer);
        let b = wrapper.breaker_for(Role::Developer);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
