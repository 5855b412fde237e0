//! Deterministic offline provider.
//!
//! Used when `ai.provider = "mock"` and throughout the test suites. It echoes
//! the requested section title into a short markdown body and can be told to
//! fail, either for the first `n` calls or whenever the prompt contains a
//! marker string.

use crate::{AiError, Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Prompt line prefix the generator uses to name the section being written.
const SECTION_PREFIX: &str = "Section: ";

#[derive(Debug, Default)]
pub struct MockProvider {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    fail_when_contains: Option<String>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `n` calls with a retryable 503.
    pub fn fail_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Fails every call whose user prompt contains `marker`.
    pub fn fail_when_contains(mut self, marker: impl Into<String>) -> Self {
        self.fail_when_contains = Some(marker.into());
        self
    }

    /// Sleeps before answering, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn section_title(prompt: &str) -> &str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(SECTION_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Response")
}

fn approx_tokens(text: &str) -> u32 {
    u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref marker) = self.fail_when_contains {
            if request.user.contains(marker.as_str()) {
                return Err(AiError::Api {
                    status: 500,
                    body: format!("injected failure for marker {}", marker),
                });
            }
        }
        if self.take_failure() {
            return Err(AiError::Api {
                status: 503,
                body: "injected transient failure".to_string(),
            });
        }

        let title = section_title(&request.user);
        let text = format!(
            "## {title}\n\nThis section turns the founder's own words into a clear position. \
             It names who is served, what changes for them, and the next concrete step.\n\n\
             - Clarify the promise behind {title}.\n\
             - Test it with three real conversations this week.\n\
             - Refine the wording based on what resonates."
        );

        Ok(Completion {
            prompt_tokens: approx_tokens(&request.system) + approx_tokens(&request.user),
            completion_tokens: approx_tokens(&text),
            text,
        })
    }
}
