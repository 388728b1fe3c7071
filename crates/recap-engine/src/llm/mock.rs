use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::provider::{Completion, CompletionProvider, CompletionRequest, ProviderError};

/// Scripted step for the mock provider.
enum Step {
    Respond(String),
    Fail(u16, String),
    RateLimit(u64),
}

/// In-memory provider for the test suites.
///
/// Responds with scripted steps in order, falling back to a default response
/// once the script runs dry. Counts every call so single-flight and cache
/// tests can assert on traffic.
pub struct MockProvider {
    script: Mutex<VecDeque<Step>>,
    default_response: Mutex<String>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(
                r#"{"summary": "A quiet discussion.", "key_points": [], "action_items": [], "technical_terms": [], "participants": []}"#
                    .to_string(),
            ),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn respond_with(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step::Respond(text.to_string()));
    }

    pub fn set_default_response(&self, text: &str) {
        *self.default_response.lock().unwrap() = text.to_string();
    }

    /// Queue an API failure with the given status code.
    pub fn fail_with(&self, status: u16, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step::Fail(status, message.to_string()));
    }

    pub fn rate_limit_with(&self, retry_after_ms: u64) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step::RateLimit(retry_after_ms));
    }

    /// Artificial per-call latency, for concurrency assertions.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

// Tests hold an Arc to script and observe the mock while the client owns
// the boxed provider.
#[async_trait]
impl CompletionProvider for std::sync::Arc<MockProvider> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.as_ref().complete(req).await
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let step = self.script.lock().unwrap().pop_front();
        let text = match step {
            Some(Step::Respond(text)) => text,
            Some(Step::Fail(status, message)) => {
                return Err(ProviderError::Api { status, message });
            }
            Some(Step::RateLimit(retry_after_ms)) => {
                return Err(ProviderError::RateLimited { retry_after_ms });
            }
            None => self.default_response.lock().unwrap().clone(),
        };

        Ok(Completion {
            prompt_tokens: ((req.system.len() + req.user.len()) / 4) as u32,
            completion_tokens: (text.len() / 4) as u32,
            text,
            model: req.model.clone(),
        })
    }
}
