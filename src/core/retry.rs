//! Bounded exponential backoff shared by oracle fetches and row-store writes

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

/// (base delay, multiplier, cap, max retries). `max_times` counts retries,
/// so an operation runs at most `max_times + 1` times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f32,
    pub max_delay: Duration,
    pub max_times: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            factor: 2.0,
            max_delay: Duration::from_secs(900),
            max_times: 4,
        }
    }
}

impl RetryPolicy {
    /// A single retry after `delay`
    pub fn once(delay: Duration) -> Self {
        Self {
            base: delay,
            factor: 1.0,
            max_delay: delay,
            max_times: 1,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_factor(self.factor)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
    }

    /// Upper bound on total time spent sleeping between attempts
    pub fn total_delay(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.base;
        for _ in 0..self.max_times {
            total += delay.min(self.max_delay);
            delay = delay.mul_f32(self.factor);
        }
        total
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the
    /// retry budget is spent. `on_retry` sees each retried error and the
    /// upcoming delay.
    pub async fn run<T, E, Fut, Op, When, Notify>(
        &self,
        op: Op,
        should_retry: When,
        on_retry: Notify,
    ) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        When: FnMut(&E) -> bool,
        Notify: FnMut(&E, Duration),
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(should_retry)
            .notify(on_retry)
            .await
    }
}
