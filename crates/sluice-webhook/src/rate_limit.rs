//! Token-bucket admission control.
//!
//! The bucket is a [`Semaphore`] holding up to `burst` permits and starting
//! full. A background task adds one permit every `1 / rate` seconds unless
//! the bucket is already full. [`RateLimiter::allow`] never waits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RateLimitConfig;
use crate::shutdown::ShutdownSignal;

/// Token-bucket rate limiter shared by every request of one server run.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
    burst: usize,
    period: Duration,
    stop: ShutdownSignal,
}

impl RateLimiter {
    /// Builds a limiter and starts its refill task.
    ///
    /// Returns `None` when the configuration disables limiting. Must be
    /// called from within a Tokio runtime.
    pub fn new(config: &RateLimitConfig) -> Option<Self> {
        let (rate, burst) = config.effective()?;
        let burst = burst.min(Semaphore::MAX_PERMITS);
        let period = refill_period(rate);

        let limiter = Self {
            tokens: Arc::new(Semaphore::new(burst)),
            burst,
            period,
            stop: ShutdownSignal::new(),
        };
        limiter.spawn_refill();

        tracing::debug!(rate, burst, period = ?period, "rate limiter started");
        Some(limiter)
    }

    /// Takes one token. Returns `false` when the bucket is empty.
    pub fn allow(&self) -> bool {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Tokens currently in the bucket.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Bucket capacity.
    #[must_use]
    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Interval between refills.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops the refill task. Calling it again does nothing.
    pub fn stop(&self) {
        if self.stop.trigger() {
            tracing::debug!("rate limiter stopped");
        }
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_shutdown()
    }

    fn spawn_refill(&self) {
        let tokens = Arc::clone(&self.tokens);
        let burst = self.burst;
        let period = self.period;
        let stopped = self.stop.recv();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tokio::pin!(stopped);

            loop {
                tokio::select! {
                    () = &mut stopped => break,
                    _ = ticker.tick() => {
                        if tokens.available_permits() < burst {
                            tokens.add_permits(1);
                        }
                    }
                }
            }
        });
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

/// `1 / rate` seconds, never shorter than one nanosecond.
fn refill_period(rate: u32) -> Duration {
    (Duration::from_secs(1) / rate.max(1)).max(Duration::from_nanos(1))
}

/// Optional limiter: an absent limiter admits everything.
pub(crate) fn allow(limiter: Option<&RateLimiter>) -> bool {
    limiter.map_or(true, RateLimiter::allow)
}
