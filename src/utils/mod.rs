//! Utility modules shared by the source clients and the full-text fetcher.
//!
//! - [`HttpClient`]: shared `reqwest` client identifying the crate and its operator
//! - [`RetryConfig`], [`with_retry`], [`with_retry_detailed`]: bounded retries with exponential backoff
//! - [`Throttle`]: per-client rate limit and daily quota
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use compendium_tracker::sources::SourceError;
//! use compendium_tracker::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let data = with_retry(RetryConfig::default(), || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Throttling
//!
//! ```rust,no_run
//! use compendium_tracker::utils::Throttle;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let throttle = Throttle::per_second(3)?.with_daily_quota(100_000);
//! throttle.acquire().await?;
//! # Ok(())
//! # }
//! ```

mod http;
mod retry;
mod throttle;

pub use http::{retry_after_secs, user_agent, HttpClient};
pub use retry::{
    api_retry_config, with_retry, with_retry_detailed, RetryConfig, RetryResult, TransientError,
};
pub use throttle::{InvalidThrottle, Throttle, ThrottleClock, ThrottleError};
