use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use leaky_bucket::RateLimiter;
use rand::Rng;
use tokio::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};

/// Process-wide cooldown shared by every outbound call.
///
/// A single timestamp: the earliest instant any caller may hit the upstream
/// service again. A rate-limited response pushes it forward; every caller
/// that observes it in the future sleeps instead of calling. Initialized
/// once at startup and never reset except by restart.
pub struct RateLimitState {
    epoch: Instant,
    next_allowed_ms: AtomicU64,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            next_allowed_ms: AtomicU64::new(0),
        }
    }

    pub fn next_allowed(&self) -> Instant {
        self.epoch + Duration::from_millis(self.next_allowed_ms.load(Relaxed))
    }

    /// Push the cooldown to at least `now + backoff`. `fetch_max` keeps the
    /// timestamp monotone when several workers hit 429 at once.
    pub fn extend(&self, backoff: Duration) {
        let until = Instant::now() + backoff - self.epoch;
        self.next_allowed_ms
            .fetch_max(until.as_millis() as u64, Relaxed);
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Policy wrapper around every outbound call.
///
/// Has no knowledge of what it is calling; the fan-out executor routes both
/// classification and provider listing through it. Combines a steady-state
/// pacing bucket with the shared cooldown and a bounded retry loop:
/// rate-limited responses back off linearly up to the attempt ceiling,
/// permanently-invalid requests fail immediately, and transient failures
/// (including per-call timeouts) get exactly one immediate retry.
#[derive(Clone)]
pub struct RateLimitedClient {
    state: Arc<RateLimitState>,
    pacer: Arc<RateLimiter>,
    config: RateLimitConfig,
}

impl RateLimitedClient {
    pub fn new(state: Arc<RateLimitState>, config: RateLimitConfig) -> Self {
        let pacer = RateLimiter::builder()
            .initial(config.rate_limit_per_sec)
            .interval(Duration::from_millis(config.refill_interval_ms as u64))
            .max(config.rate_limit_per_sec)
            .refill(config.refill_amount)
            .build();

        Self {
            state,
            pacer: Arc::new(pacer),
            config,
        }
    }

    pub fn state(&self) -> Arc<RateLimitState> {
        self.state.clone()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(
            self.config.backoff_base_secs + attempt as u64 * self.config.backoff_step_secs,
        )
    }

    async fn wait_for_cooldown(&self) {
        let next_allowed = self.state.next_allowed();
        if next_allowed > Instant::now() {
            // Jitter spreads workers back out after a shared cooldown so
            // they do not re-synchronize into a thundering herd.
            let jitter_ms: u64 = rand::rng().random_range(0..1000);
            tokio::time::sleep_until(next_allowed + Duration::from_millis(jitter_ms)).await;
        }
    }

    pub async fn execute<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);
        let mut rate_limit_attempts: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            self.wait_for_cooldown().await;
            self.pacer.acquire_one().await;

            match tokio::time::timeout(call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(AppError::RateLimitExceeded)) => {
                    rate_limit_attempts += 1;
                    if rate_limit_attempts >= self.config.max_attempts {
                        tracing::error!(
                            "Rate limited {} times, giving up",
                            rate_limit_attempts
                        );
                        return Err(AppError::RateLimitExceeded);
                    }
                    let backoff = self.backoff(rate_limit_attempts - 1);
                    tracing::info!("Rate limit hit, waiting {} seconds", backoff.as_secs());
                    self.state.extend(backoff);
                    // A rate-limited response breaks a transient streak
                    transient_failures = 0;
                }
                Ok(Err(err @ AppError::BadRequest(_))) => {
                    // Retrying cannot help
                    tracing::info!("Bad request: {err}");
                    return Err(err);
                }
                Ok(Err(err)) => {
                    transient_failures += 1;
                    if transient_failures >= 2 {
                        return Err(err);
                    }
                    tracing::warn!("Transient error, retrying once: {err}");
                }
                Err(_elapsed) => {
                    transient_failures += 1;
                    if transient_failures >= 2 {
                        return Err(AppError::RequestTimeout);
                    }
                    tracing::warn!(
                        "Call exceeded {}s timeout, retrying once",
                        call_timeout.as_secs()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            rate_limit_per_sec: 10_000,
            refill_interval_ms: 100,
            refill_amount: 1_000,
            max_attempts: 5,
            backoff_base_secs: 30,
            backoff_step_secs: 10,
            call_timeout_secs: 20,
        }
    }

    fn client() -> RateLimitedClient {
        RateLimitedClient::new(Arc::new(RateLimitState::new()), test_config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_call_before_cooldown_expires() {
        let client = client();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(AtomicU32::new(1));

        let start = Instant::now();
        let result = client
            .execute(|| {
                let calls = calls.clone();
                let failures = failures.clone();
                async move {
                    calls.lock().unwrap().push(Instant::now());
                    if failures.fetch_sub(1, Relaxed) > 0 {
                        Err(AppError::RateLimitExceeded)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        // First backoff is 30s; the retry must not start before it passes
        assert!(calls[1] - start >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_shared_across_clients() {
        let state = Arc::new(RateLimitState::new());
        let first = RateLimitedClient::new(state.clone(), test_config());
        let second = RateLimitedClient::new(state.clone(), test_config());

        // First caller burns its retry budget and surfaces the failure
        let result: AppResult<()> = first.execute(|| async { Err(AppError::RateLimitExceeded) }).await;
        assert!(matches!(result, Err(AppError::RateLimitExceeded)));

        // The cooldown left behind is observed by an unrelated caller
        let before = Instant::now();
        assert!(state.next_allowed() > before);
        let value = second.execute(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(Instant::now() >= state.next_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly() {
        let client = client();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let result: AppResult<()> = client
            .execute(|| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(Instant::now());
                    Err(AppError::RateLimitExceeded)
                }
            })
            .await;
        assert!(matches!(result, Err(AppError::RateLimitExceeded)));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        // Gaps of at least 30/40/50/60 seconds between attempts
        for (i, min_gap) in [30u64, 40, 50, 60].iter().enumerate() {
            let gap = calls[i + 1] - calls[i];
            assert!(
                gap >= Duration::from_secs(*min_gap),
                "gap {i} was {gap:?}, wanted >= {min_gap}s"
            );
        }
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let client = client();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: AppResult<()> = client
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Relaxed);
                    Err(AppError::BadRequest("malformed".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(attempts.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retries_exactly_once() {
        let client = client();
        let attempts = Arc::new(AtomicU32::new(0));

        // Fails once, then succeeds
        let attempts_clone = attempts.clone();
        let value = client
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    if attempts.fetch_add(1, Relaxed) == 0 {
                        Err(AppError::Internal(anyhow::anyhow!("connection reset")))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(attempts.load(Relaxed), 2);

        // Fails twice in a row: surfaced
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: AppResult<()> = client
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Relaxed);
                    Err(AppError::Internal(anyhow::anyhow!("connection reset")))
                }
            })
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(attempts.load(Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout_cuts_off_slow_calls() {
        let mut config = test_config();
        config.call_timeout_secs = 1;
        let client = RateLimitedClient::new(Arc::new(RateLimitState::new()), config);

        let result: AppResult<()> = client
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::RequestTimeout)));
    }
}
