//! Per-source request throttling.
//!
//! A [`Throttle`] is owned by exactly one source client. It combines:
//!
//! - an evenly spaced rate limit (`cap` calls per `period`, burst 1), built on a
//!   `governor` direct limiter, which blocks the caller until the next slot;
//! - an optional fixed daily quota, which refuses further calls once spent.
//!
//! Spacing is `ceil(period / cap)`, so no half-open window of length `period`
//! ever contains more than `cap` permitted calls. The clock is generic so tests
//! can drive the throttle with `governor`'s `FakeRelativeClock`.

use futures_util::future::BoxFuture;
use governor::clock::{Clock, DefaultClock, FakeRelativeClock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A clock the throttle can both read and wait on
pub trait ThrottleClock: Clock + Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

impl ThrottleClock for DefaultClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Waiting on the fake clock advances it instead of sleeping
impl ThrottleClock for FakeRelativeClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Why a throttle refused a call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    #[error("daily quota of {limit} requests exhausted")]
    QuotaExhausted { limit: u32 },
}

/// Invalid throttle parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid throttle: {0}")]
pub struct InvalidThrottle(String);

struct QuotaWindow<I> {
    started: I,
    used: u32,
}

struct DailyQuota<I> {
    limit: u32,
    window: Mutex<QuotaWindow<I>>,
}

impl<I: Reference> DailyQuota<I> {
    fn charge(&self, now: I) -> Result<u32, ThrottleError> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = Duration::from(now.duration_since(window.started));
        if elapsed >= DAY {
            window.started = now;
            window.used = 0;
        }
        if window.used >= self.limit {
            return Err(ThrottleError::QuotaExhausted { limit: self.limit });
        }
        window.used += 1;
        Ok(self.limit - window.used)
    }
}

/// Request throttle owned by one source client
pub struct Throttle<C: ThrottleClock = DefaultClock> {
    limiter: RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
    clock: C,
    interval: Duration,
    daily: Option<DailyQuota<C::Instant>>,
}

impl Throttle<DefaultClock> {
    /// At most `cap` calls per second
    pub fn per_second(cap: u32) -> Result<Self, InvalidThrottle> {
        Self::per_period(cap, Duration::from_secs(1), DefaultClock::default())
    }

    /// At least `interval` between consecutive calls
    pub fn min_interval(interval: Duration) -> Result<Self, InvalidThrottle> {
        Self::per_period(1, interval, DefaultClock::default())
    }
}

impl<C: ThrottleClock> Throttle<C> {
    /// At most `cap` calls in any window of `period`, measured on `clock`
    pub fn per_period(cap: u32, period: Duration, clock: C) -> Result<Self, InvalidThrottle> {
        let cap = NonZeroU32::new(cap)
            .ok_or_else(|| InvalidThrottle("cap must be at least 1".to_string()))?;
        let interval = spacing(cap, period);
        let quota = Quota::with_period(interval)
            .ok_or_else(|| InvalidThrottle("period must be non-zero".to_string()))?;

        Ok(Self {
            limiter: RateLimiter::direct_with_clock(quota, &clock),
            clock,
            interval,
            daily: None,
        })
    }

    /// Additionally refuse calls beyond `limit` per rolling day
    pub fn with_daily_quota(mut self, limit: u32) -> Self {
        self.daily = Some(DailyQuota {
            limit,
            window: Mutex::new(QuotaWindow {
                started: self.clock.now(),
                used: 0,
            }),
        });
        self
    }

    /// Minimum spacing between permitted calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next permitted slot, or fail when the daily quota is spent
    pub async fn acquire(&self) -> Result<(), ThrottleError> {
        if let Some(daily) = &self.daily {
            let remaining = daily.charge(self.clock.now())?;
            if remaining == 0 {
                tracing::warn!(limit = daily.limit, "daily request quota now exhausted");
            }
        }

        loop {
            let wait = match self.limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };
            tracing::trace!(?wait, "throttled");
            self.clock.sleep(wait).await;
        }
    }
}

impl<C: ThrottleClock> std::fmt::Debug for Throttle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("interval", &self.interval)
            .field("daily_limit", &self.daily.as_ref().map(|d| d.limit))
            .finish()
    }
}

/// `ceil(period / cap)` so that `cap` spacings always cover the full period
fn spacing(cap: NonZeroU32, period: Duration) -> Duration {
    let nanos = period.as_nanos().div_ceil(u128::from(cap.get()));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
