//! Per-origin throttling with bounded retry.
//!
//! Each origin owns its own lock; callers for different origins never wait on
//! each other. The lock is held across the spacing sleep so no caller can slip
//! in between.

use crate::config::RateLimitSettings;
use crate::utils::error::{GraderError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 包含第一次呼叫的總次數
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    /// Wait after the `failed_attempt`-th failure: base, 2×base, 4×base, ... capped.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct OriginState {
    last_call: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
}

pub struct RateLimiter {
    origins: DashMap<String, Arc<OriginState>>,
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
    max_wait: Duration,
    policy: RetryPolicy,
}

fn interval_from_rps(requests_per_second: f64) -> Duration {
    if requests_per_second.is_finite() && requests_per_second > 0.0 {
        Duration::from_secs_f64(1.0 / requests_per_second)
    } else {
        Duration::ZERO
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration, max_wait: Duration, policy: RetryPolicy) -> Self {
        Self {
            origins: DashMap::new(),
            default_interval: min_interval,
            intervals: HashMap::new(),
            max_wait,
            policy,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let policy = RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
        };
        let mut limiter = Self::new(
            interval_from_rps(settings.requests_per_second),
            Duration::from_secs(settings.max_wait_seconds),
            policy,
        );
        for (origin, rps) in &settings.per_origin {
            limiter = limiter.with_origin_rate(origin, *rps);
        }
        limiter
    }

    pub fn with_origin_rate(mut self, origin: &str, requests_per_second: f64) -> Self {
        self.intervals
            .insert(origin.to_string(), interval_from_rps(requests_per_second));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn interval_for(&self, origin: &str) -> Duration {
        self.intervals
            .get(origin)
            .copied()
            .unwrap_or(self.default_interval)
    }

    fn state(&self, origin: &str) -> Arc<OriginState> {
        self.origins
            .entry(origin.to_string())
            .or_default()
            .clone()
    }

    pub fn consecutive_failures(&self, origin: &str) -> u32 {
        self.origins
            .get(origin)
            .map(|s| s.consecutive_failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// 等到此 origin 可以再次呼叫；超過 max_wait 回傳 RateLimitTimeout
    pub async fn acquire(&self, origin: &str) -> Result<()> {
        let state = self.state(origin);
        let interval = self.interval_for(origin);
        let started = Instant::now();

        let wait = async {
            let mut last_call = state.last_call.lock().await;
            if let Some(last) = *last_call {
                let ready_at = last + interval;
                if ready_at > Instant::now() {
                    tokio::time::sleep_until(ready_at).await;
                }
            }
            *last_call = Some(Instant::now());
        };

        tokio::time::timeout(self.max_wait, wait)
            .await
            .map_err(|_| {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!("⏳ {}: no call slot after {}ms", origin, waited_ms);
                GraderError::RateLimitTimeout {
                    origin: origin.to_string(),
                    waited_ms,
                }
            })
    }

    /// Runs `op` under the origin's spacing, with a hard timeout per attempt.
    ///
    /// Retryable failures back off and try again until `max_attempts` is spent,
    /// then surface as `AdapterExhausted`. Other failures return immediately.
    pub async fn call<T, F, Fut>(&self, origin: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let state = self.state(origin);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.acquire(origin).await?;

            let outcome = match tokio::time::timeout(self.policy.request_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(GraderError::Timeout {
                    origin: origin.to_string(),
                }),
            };

            match outcome {
                Ok(value) => {
                    state.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) => {
                    state.consecutive_failures.fetch_add(1, Ordering::Relaxed);

                    if !e.is_retryable() {
                        tracing::debug!("📡 {}: not retrying: {}", origin, e);
                        return Err(e);
                    }
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!("📡 {}: giving up after {} attempts: {}", origin, attempt, e);
                        return Err(GraderError::AdapterExhausted {
                            origin: origin.to_string(),
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        "📡 {}: attempt {}/{} failed ({}), retrying in {:?}",
                        origin,
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn limiter(interval_ms: u64) -> RateLimiter {
        RateLimiter::new(
            Duration::from_millis(interval_ms),
            Duration::from_secs(30),
            RetryPolicy::default(),
        )
    }

    fn upstream(status: u16) -> GraderError {
        GraderError::UpstreamStatus {
            origin: "test".to_string(),
            status,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_are_spaced() {
        let limiter = limiter(1000);

        let mut starts = futures::future::join_all((0..4).map(|_| async {
            limiter.acquire("pagespeed").await.unwrap();
            Instant::now()
        }))
        .await;

        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_origins_do_not_block_each_other() {
        let limiter = limiter(1000);
        let started = Instant::now();

        limiter.acquire("serpapi").await.unwrap();
        limiter.acquire("moz").await.unwrap();
        limiter.acquire("whoisxml").await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_origin_rate_override() {
        let limiter = limiter(1000).with_origin_rate("rdap", 0.5);
        assert_eq!(limiter.interval_for("rdap"), Duration::from_secs(2));
        assert_eq!(limiter.interval_for("moz"), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_past_ceiling_times_out() {
        let limiter = RateLimiter::new(
            Duration::from_secs(10),
            Duration::from_secs(2),
            RetryPolicy::default(),
        );
        limiter.acquire("gcs").await.unwrap();

        let err = limiter.acquire("gcs").await.unwrap_err();
        assert!(matches!(err, GraderError::RateLimitTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_with_backoff() {
        let limiter = limiter(0);
        let attempts = AtomicUsize::new(0);
        let started = Instant::now();

        let result = limiter
            .call("pagespeed", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(upstream(503))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        // 1s + 2s 的退避
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(limiter.consecutive_failures("pagespeed"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let limiter = limiter(0);
        let attempts = AtomicUsize::new(0);
        let started = Instant::now();

        let err = limiter
            .call("serpapi", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(upstream(500))
            })
            .await
            .unwrap_err();

        // 三次重試，等待 1s + 2s + 4s
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(7));
        match err {
            GraderError::AdapterExhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(limiter.consecutive_failures("serpapi"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_fail_immediately() {
        let limiter = limiter(0);
        let attempts = AtomicUsize::new(0);

        let err = limiter
            .call("moz", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(upstream(404))
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, GraderError::UpstreamStatus { status: 404, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_and_retries() {
        let limiter = RateLimiter::new(
            Duration::ZERO,
            Duration::from_secs(30),
            RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
        );
        let attempts = AtomicUsize::new(0);

        let err = limiter
            .call("whoisxml", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        match err {
            GraderError::AdapterExhausted { last, .. } => {
                assert!(matches!(*last, GraderError::Timeout { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
