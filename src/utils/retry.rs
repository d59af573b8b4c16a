//! Retry utilities with exponential backoff for resilient API calls.

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use crate::sources::SourceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Wall-clock ceiling for the whole operation, delays included
    pub max_total_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the attempt following `attempt` (1-based)
    fn backoff(&self, attempt: u32) -> Duration {
        let exp_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt.saturating_sub(1) as f64);
        Duration::from_secs_f64(exp_delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded (with optional retry-after seconds)
    RateLimit(Option<u64>),
    /// Server error (5xx)
    ServerError,
    /// Service unavailable (503)
    ServiceUnavailable,
    /// Request timeout
    Timeout,
}

impl TransientError {
    /// Check if a SourceError represents a transient error
    pub fn from_source_error(err: &SourceError) -> Option<Self> {
        match err {
            SourceError::RateLimit(retry_after) => Some(TransientError::RateLimit(*retry_after)),
            SourceError::Network(_) => Some(TransientError::Network),
            SourceError::Server(503) => Some(TransientError::ServiceUnavailable),
            SourceError::Server(_) => Some(TransientError::ServerError),
            SourceError::Api(msg) => {
                let msg_lower = msg.to_lowercase();
                if msg_lower.contains("timeout") || msg_lower.contains("timed out") {
                    Some(TransientError::Timeout)
                } else if msg_lower.contains("service unavailable")
                    || msg_lower.contains("temporarily unavailable")
                {
                    Some(TransientError::ServiceUnavailable)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Get the recommended delay for this error
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit(Some(seconds)) => Duration::from_secs(*seconds + 1),
            TransientError::RateLimit(None) => Duration::from_secs(61),
            TransientError::ServiceUnavailable => Duration::from_secs(10),
            TransientError::Timeout => Duration::from_secs(2),
            TransientError::Network => Duration::from_secs(2),
            TransientError::ServerError => Duration::from_secs(2),
        }
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded
    Success(T),
    /// Operation failed with a transient error after all retries
    TransientFailure(SourceError, TransientError, u32),
    /// Operation failed with a permanent error
    PermanentFailure(SourceError),
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, SourceError> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::TransientFailure(error, _, _) | RetryResult::PermanentFailure(error) => {
                Err(error)
            }
        }
    }
}

/// Execute an async operation with retry logic
///
/// Transient errors are retried with exponential backoff; the error-specific
/// recommended delay is honored but never exceeds `max_delay`. Gives up after
/// `max_attempts` or once `max_total_time` would be exceeded.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, operation: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    with_retry_detailed(config, operation).await.into_result()
}

/// Execute an async operation with retry logic that returns RetryResult
///
/// This provides more detailed information about failures for callers that need it
pub async fn with_retry_detailed<T, F, Fut>(config: RetryConfig, operation: F) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    let mut operation = operation;

    loop {
        attempts += 1;
        let remaining = config.max_total_time.saturating_sub(started.elapsed());

        let (error, transient) = match timeout(remaining, operation()).await {
            Ok(Ok(result)) => {
                if attempts > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return RetryResult::Success(result);
            }
            Ok(Err(error)) => match TransientError::from_source_error(&error) {
                Some(transient) => (error, transient),
                None => return RetryResult::PermanentFailure(error),
            },
            Err(_) => (
                SourceError::Network("Operation timed out".to_string()),
                TransientError::Timeout,
            ),
        };

        let delay = std::cmp::max(config.backoff(attempts), transient.recommended_delay())
            .min(config.max_delay);

        if attempts >= config.max_attempts || started.elapsed() + delay >= config.max_total_time {
            tracing::warn!(
                "Operation failed after {} attempts (elapsed: {:?}): {}",
                attempts,
                started.elapsed(),
                error
            );
            return RetryResult::TransientFailure(error, transient, attempts);
        }

        tracing::debug!(
            "Transient error on attempt {}: {:?}, retrying in {:?}",
            attempts,
            transient,
            delay
        );
        sleep(delay).await;
    }
}

/// Create a default retry configuration optimized for external APIs
pub fn api_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(120),
        backoff_multiplier: 2.0,
        max_total_time: Duration::from_secs(300),
    }
}
