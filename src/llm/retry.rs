use crate::llm::client::LLMError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Substrings of raw failure text that mark a transient fault
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "enotfound",
    "network",
    "connection",
    "socket hang up",
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "temporarily unavailable",
];

/// HTTP status codes that mark a transient fault, matched as whole tokens
const RETRYABLE_STATUS_CODES: &[&str] = &["429", "500", "502", "503", "504", "529"];

pub fn is_retryable_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| RETRYABLE_STATUS_CODES.contains(&token))
}

/// Bookkeeping for one call's retry loop
#[derive(Debug, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<LLMError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// jittered by up to 25% either way and capped at `max_delay`
    ///
    /// Doubling outpaces the jitter band, so successive delays never shrink.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
        let capped = (exponential * jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or has
    /// been attempted `max_retries + 1` times
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LLMError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut state = RetryState::default();
        while state.attempt <= self.max_retries {
            if let Some(last) = &state.last_error {
                let delay = self.delay_for(state.attempt - 1);
                tracing::warn!(
                    attempt = state.attempt,
                    max_attempts = self.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %last,
                    "retrying backend call"
                );
                tokio::time::sleep(delay).await;
            }

            match op(state.attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => state.last_error = Some(err),
            }
            state.attempt += 1;
        }

        Err(state.into_exhausted())
    }
}

impl RetryState {
    /// Error reported once every attempt has failed
    fn into_exhausted(self) -> LLMError {
        let last = self.last_error.unwrap_or_else(|| LLMError::Backend {
            detail: "no attempt was made".to_string(),
        });
        LLMError::RetriesExhausted {
            attempts: self.attempt,
            last: Box::new(last),
        }
    }
}
