use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use hive_config::RetryConfig;
use hive_domain::{
    HiveResult, JobDescriptor, SequenceToken, StatusMessage, Transport,
};
use rand::Rng;
use tracing::{debug, warn};

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_interval: Duration,
    max_interval: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_interval: Duration::from_millis(config.base_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (first retry is attempt 1).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut millis = (self.base_interval.as_millis() as f64 * exp)
            .min(self.max_interval.as_millis() as f64);
        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(-self.jitter_factor..=self.jitter_factor);
            millis *= 1.0 + jitter;
        }
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Transport decorator that absorbs transient provider errors with
/// bounded backoff, invisible to callers. Permanent errors surface
/// unchanged on the first occurrence.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    async fn with_retry<R, Fut>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Fut,
    ) -> HiveResult<R>
    where
        Fut: Future<Output = HiveResult<R>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient transport error, backing off: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(
                            operation,
                            attempts = attempt + 1,
                            "giving up after exhausting retries: {err}"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for Retrying<T> {
    async fn enqueue(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        self.with_retry("enqueue", || self.inner.enqueue(queue, descriptor))
            .await
    }

    async fn receive(&self, queue: &str, wait: Duration) -> HiveResult<Option<JobDescriptor>> {
        self.with_retry("receive", || self.inner.receive(queue, wait))
            .await
    }

    async fn acknowledge(&self, queue: &str, descriptor: &JobDescriptor) -> HiveResult<()> {
        self.with_retry("acknowledge", || self.inner.acknowledge(queue, descriptor))
            .await
    }

    async fn queue_depth(&self, queue: &str) -> HiveResult<u32> {
        self.with_retry("queue_depth", || self.inner.queue_depth(queue))
            .await
    }

    async fn publish(&self, channel: &str, message: &StatusMessage) -> HiveResult<()> {
        self.with_retry("publish", || self.inner.publish(channel, message))
            .await
    }

    async fn append(&self, stream: &str, message: &StatusMessage) -> HiveResult<SequenceToken> {
        self.with_retry("append", || self.inner.append(stream, message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_domain::HiveError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` receive calls, transiently or
    /// permanently, then succeeds with `None`.
    struct FlakyTransport {
        failures: u32,
        transient: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn enqueue(&self, _: &str, _: &JobDescriptor) -> HiveResult<()> {
            Ok(())
        }
        async fn receive(&self, _: &str, _: Duration) -> HiveResult<Option<JobDescriptor>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.transient {
                    Err(HiveError::transport_transient("throttled"))
                } else {
                    Err(HiveError::transport_permanent("queue does not exist"))
                }
            } else {
                Ok(None)
            }
        }
        async fn acknowledge(&self, _: &str, _: &JobDescriptor) -> HiveResult<()> {
            Ok(())
        }
        async fn queue_depth(&self, _: &str) -> HiveResult<u32> {
            Ok(0)
        }
        async fn publish(&self, _: &str, _: &StatusMessage) -> HiveResult<()> {
            Ok(())
        }
        async fn append(&self, _: &str, _: &StatusMessage) -> HiveResult<SequenceToken> {
            Ok(SequenceToken(0))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            base_interval_ms: 1,
            max_interval_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        })
    }

    #[tokio::test]
    async fn transient_errors_are_absorbed() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = Retrying::new(
            FlakyTransport {
                failures: 2,
                transient: true,
                calls: Arc::clone(&calls),
            },
            fast_policy(5),
        );

        let result = transport.receive("jobs", Duration::ZERO).await;
        assert!(matches!(result, Ok(None)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_errors_surface_after_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = Retrying::new(
            FlakyTransport {
                failures: 10,
                transient: true,
                calls: Arc::clone(&calls),
            },
            fast_policy(3),
        );

        let result = transport.receive("jobs", Duration::ZERO).await;
        assert!(matches!(
            result,
            Err(HiveError::Transport { transient: true, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = Retrying::new(
            FlakyTransport {
                failures: 10,
                transient: false,
                calls: Arc::clone(&calls),
            },
            fast_policy(5),
        );

        let result = transport.receive("jobs", Duration::ZERO).await;
        assert!(matches!(
            result,
            Err(HiveError::Transport {
                transient: false,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = fast_policy(10);
        assert!(policy.delay_for(1) <= policy.delay_for(2));
        assert!(policy.delay_for(9) <= Duration::from_millis(5));
    }
}
