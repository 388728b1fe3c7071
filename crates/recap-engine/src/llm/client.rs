use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use recap_core::config::{LlmConfig, ModelRate};
use recap_core::{RecapError, Result};

use crate::llm::provider::{Completion, CompletionProvider, CompletionRequest, ProviderError};

/// A completed LLM call with accounting attached.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

/// Aggregated token/cost counters, exported through /health.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LlmMetricsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Default)]
struct Metrics {
    calls: AtomicU64,
    failures: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    /// Micro-dollars, so the counter stays integral.
    cost_micro_usd: AtomicU64,
}

/// Dispatch wrapper around a [`CompletionProvider`].
///
/// Caps in-flight requests with a process-wide semaphore, spaces dispatches,
/// retries transient failures with exponential backoff plus jitter, and
/// honors provider-supplied retry-after on rate limits. Non-retryable
/// failures surface immediately.
pub struct LlmClient {
    provider: Box<dyn CompletionProvider>,
    semaphore: Semaphore,
    last_dispatch: Mutex<Option<Instant>>,
    min_spacing: Duration,
    max_retries: u32,
    backoff_base: Duration,
    attempt_timeout: Duration,
    total_timeout: Duration,
    default_model: String,
    aliases: HashMap<String, String>,
    cost_rates: HashMap<String, ModelRate>,
    metrics: Metrics,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("default_model", &self.default_model)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Build a client from config. Fails on a bad alias table: empty targets
    /// and alias chains are flagged here rather than silently rewritten at
    /// request time.
    pub fn new(provider: Box<dyn CompletionProvider>, cfg: &LlmConfig) -> Result<Self> {
        for (alias, target) in &cfg.model_aliases {
            if target.is_empty() {
                return Err(RecapError::Config(format!(
                    "model alias '{alias}' maps to an empty model id"
                )));
            }
            if cfg.model_aliases.contains_key(target) {
                return Err(RecapError::Config(format!(
                    "model alias '{alias}' points at alias '{target}'; chains are not allowed"
                )));
            }
        }

        let default_model = cfg
            .model_aliases
            .get(&cfg.model)
            .cloned()
            .unwrap_or_else(|| cfg.model.clone());
        info!(provider = provider.name(), model = %default_model, "LLM client ready");

        Ok(Self {
            provider,
            semaphore: Semaphore::new(cfg.max_concurrent.max(1)),
            last_dispatch: Mutex::new(None),
            min_spacing: Duration::from_millis(cfg.min_dispatch_interval_ms),
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms.max(1)),
            attempt_timeout: Duration::from_secs(cfg.attempt_timeout_secs),
            total_timeout: Duration::from_secs(cfg.total_timeout_secs),
            default_model,
            aliases: cfg.model_aliases.clone(),
            cost_rates: cfg.cost_rates.clone(),
            metrics: Metrics::default(),
        })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Resolve a request's model name through the alias table.
    pub fn resolve_model(&self, name: Option<&str>) -> String {
        match name {
            Some(n) => self.aliases.get(n).cloned().unwrap_or_else(|| n.to_string()),
            None => self.default_model.clone(),
        }
    }

    pub fn estimate_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        match self.cost_rates.get(model) {
            Some(rate) => {
                (prompt_tokens as f64 / 1_000.0) * rate.prompt_per_1k
                    + (completion_tokens as f64 / 1_000.0) * rate.completion_per_1k
            }
            None => 0.0,
        }
    }

    pub fn metrics(&self) -> LlmMetricsSnapshot {
        LlmMetricsSnapshot {
            calls: self.metrics.calls.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            prompt_tokens: self.metrics.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.metrics.completion_tokens.load(Ordering::Relaxed),
            cost_usd: self.metrics.cost_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }

    /// Dispatch one completion under the semaphore, with retry.
    pub async fn complete(
        &self,
        req: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionOutcome> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RecapError::Internal("LLM semaphore closed".to_string()))?;
        self.pace().await;

        let started = Instant::now();
        let deadline = started + self.total_timeout;
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RecapError::Aborted),
                r = tokio::time::timeout(self.attempt_timeout, self.provider.complete(&req)) => r,
            };

            let error = match result {
                Ok(Ok(completion)) => {
                    return Ok(self.record_success(&req, completion, started));
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Api {
                    status: 504,
                    message: format!("attempt timed out after {:?}", self.attempt_timeout),
                },
            };

            // Rate limits wait the provider-indicated duration before the
            // normal backoff schedule resumes.
            let delay = match &error {
                ProviderError::RateLimited { retry_after_ms } => {
                    Duration::from_millis(*retry_after_ms)
                }
                e if e.is_transient() => {
                    let base = self.backoff_base.as_millis() as u64;
                    let jitter = rand::thread_rng().gen_range(0..base.max(1));
                    Duration::from_millis(base.saturating_mul(1u64 << attempt.min(16)) + jitter)
                }
                _ => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(map_terminal(error));
                }
            };

            if attempt >= self.max_retries || Instant::now() + delay >= deadline {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    provider = self.provider.name(),
                    attempts = attempt + 1,
                    error = %error,
                    "LLM call failed after retries"
                );
                return Err(map_exhausted(error));
            }

            debug!(
                provider = self.provider.name(),
                attempt, delay_ms = delay.as_millis() as u64,
                "transient LLM failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(RecapError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Enforce minimum spacing between dispatches.
    async fn pace(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn record_success(
        &self,
        req: &CompletionRequest,
        completion: Completion,
        started: Instant,
    ) -> CompletionOutcome {
        let latency_ms = started.elapsed().as_millis() as u64;
        let cost_usd = self.estimate_cost(
            &req.model,
            completion.prompt_tokens,
            completion.completion_tokens,
        );

        self.metrics.calls.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .prompt_tokens
            .fetch_add(completion.prompt_tokens as u64, Ordering::Relaxed);
        self.metrics
            .completion_tokens
            .fetch_add(completion.completion_tokens as u64, Ordering::Relaxed);
        self.metrics
            .cost_micro_usd
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);

        CompletionOutcome {
            text: completion.text,
            model: completion.model,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            latency_ms,
            cost_usd,
        }
    }
}

/// Map a non-retryable provider error to the public taxonomy.
fn map_terminal(error: ProviderError) -> RecapError {
    match error {
        ProviderError::Api { status, message } => {
            if status == 401 || status == 403 {
                RecapError::LlmRefused(format!("authentication rejected ({status})"))
            } else if message.contains("content_filter") || message.contains("content policy") {
                RecapError::LlmRefused(message)
            } else {
                RecapError::LlmInvalid(format!("provider rejected request ({status}): {message}"))
            }
        }
        ProviderError::Parse(msg) => RecapError::LlmInvalid(format!("unparseable response: {msg}")),
        other => RecapError::LlmTransient(other.to_string()),
    }
}

/// Map a transient error whose retries ran out.
fn map_exhausted(error: ProviderError) -> RecapError {
    RecapError::LlmTransient(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;
    use std::sync::Arc;

    fn fast_config() -> LlmConfig {
        LlmConfig {
            max_concurrent: 4,
            min_dispatch_interval_ms: 0,
            max_retries: 3,
            backoff_base_ms: 1,
            attempt_timeout_secs: 5,
            total_timeout_secs: 10,
            ..Default::default()
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            system: "s".into(),
            user: "u".into(),
            temperature: 0.3,
            max_tokens: 256,
        }
    }

    fn client_over(mock: MockProvider, cfg: LlmConfig) -> (LlmClient, Arc<MockProvider>) {
        let mock = Arc::new(mock);
        let client = LlmClient::new(Box::new(Arc::clone(&mock)), &cfg).unwrap();
        (client, mock)
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let mock = MockProvider::new();
        mock.fail_with(500, "upstream hiccup");
        let (client, mock) = client_over(mock, fast_config());

        let out = client
            .complete(request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.text.is_empty());
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let mock = MockProvider::new();
        mock.fail_with(401, "bad key");
        let (client, mock) = client_over(mock, fast_config());

        let err = client
            .complete(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecapError::LlmRefused(_)));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_waits_then_retries() {
        let mock = MockProvider::new();
        mock.rate_limit_with(5);
        let (client, mock) = client_over(mock, fast_config());

        let out = client
            .complete(request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.text.is_empty());
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn retries_exhaust_to_transient() {
        let mock = MockProvider::new();
        for _ in 0..4 {
            mock.fail_with(503, "down");
        }
        let (client, mock) = client_over(mock, fast_config());

        let err = client
            .complete(request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecapError::LlmTransient(_)));
        assert_eq!(mock.calls(), 4); // initial + 3 retries
    }

    #[tokio::test]
    async fn semaphore_serializes_past_the_width() {
        let mock = MockProvider::new();
        mock.set_latency(Duration::from_millis(50));
        let mut cfg = fast_config();
        cfg.max_concurrent = 1;
        let (client, _mock) = client_over(mock, cfg);
        let client = Arc::new(client);

        let started = Instant::now();
        let a = {
            let c = Arc::clone(&client);
            tokio::spawn(async move { c.complete(request(), &CancellationToken::new()).await })
        };
        let b = {
            let c = Arc::clone(&client);
            tokio::spawn(async move { c.complete(request(), &CancellationToken::new()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // With width 1 the second call queues behind the first.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_work() {
        let mock = MockProvider::new();
        mock.set_latency(Duration::from_secs(5));
        let (client, _mock) = client_over(mock, fast_config());

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });

        let err = client.complete(request(), &cancel).await.unwrap_err();
        assert!(matches!(err, RecapError::Aborted));
    }

    #[test]
    fn alias_chains_are_rejected() {
        let mut cfg = fast_config();
        cfg.model_aliases
            .insert("fast".to_string(), "mini".to_string());
        cfg.model_aliases
            .insert("mini".to_string(), "gpt-4o-mini".to_string());
        let err = LlmClient::new(Box::new(MockProvider::new()), &cfg).unwrap_err();
        assert!(matches!(err, RecapError::Config(_)));
    }

    #[test]
    fn aliases_resolve_and_cost_is_rated() {
        let mut cfg = fast_config();
        cfg.model_aliases
            .insert("fast".to_string(), "gpt-4o-mini".to_string());
        cfg.cost_rates.insert(
            "gpt-4o-mini".to_string(),
            ModelRate {
                prompt_per_1k: 0.15,
                completion_per_1k: 0.6,
            },
        );
        let client = LlmClient::new(Box::new(MockProvider::new()), &cfg).unwrap();
        assert_eq!(client.resolve_model(Some("fast")), "gpt-4o-mini");
        assert_eq!(client.resolve_model(Some("claude-3-haiku")), "claude-3-haiku");

        let cost = client.estimate_cost("gpt-4o-mini", 2_000, 1_000);
        assert!((cost - (2.0 * 0.15 + 1.0 * 0.6)).abs() < 1e-9);
        assert_eq!(client.estimate_cost("unknown-model", 1_000, 1_000), 0.0);
    }
}
