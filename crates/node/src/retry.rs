//! Retry, circuit breaking, and rate limiting for peer interactions.
//!
//! Peer requests retry with exponential backoff starting at 1 s, doubling
//! to a 60 s cap with ±10% jitter, for at most 5 attempts. A per-peer
//! circuit breaker opens after 5 consecutive failures inside a minute,
//! half-opens after 60 s, and closes on the next success. The submission
//! boundary carries a token-bucket rate limiter per caller.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Retry policy parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Maximum attempts.
    pub max_attempts: u32,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            jitter: 0.10,
        }
    }
}

impl RetryPolicy {
    /// The delay before retry number `attempt` (0-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_span = exp.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((exp.as_secs_f64() + offset).max(0.0))
    }
}

/// Run an async operation with exponential backoff.
///
/// Returns the first success, or the last error once attempts are
/// exhausted.
pub async fn retry_with_backoff<T, E, Fut, Op>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: Op,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(
                        operation = operation_name,
                        attempts = policy.max_attempts,
                        error = %e,
                        "all retries exhausted"
                    );
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.expect("at least one attempt ran"))
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused until the open window elapses.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

/// A per-peer circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    failure_window: Duration,
    open_duration: Duration,

    state: CircuitState,
    consecutive_failures: u32,
    window_started: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` consecutive
    /// failures within `failure_window`, staying open for
    /// `open_duration`.
    pub fn new(failure_threshold: u32, failure_window: Duration, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            failure_window,
            open_duration,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window_started: None,
            opened_at: None,
        }
    }

    /// Breaker with the protocol defaults: 5 failures / 1 minute, 60 s
    /// open.
    pub fn with_defaults() -> Self {
        Self::new(5, Duration::from_secs(60), Duration::from_secs(60))
    }

    /// Whether a request may proceed right now. Transitions open
    /// circuits to half-open when the window has elapsed.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| at.elapsed() >= self.open_duration)
                    .unwrap_or(true);
                if elapsed {
                    debug!("circuit half-open, allowing probe");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request.
    pub fn on_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("circuit closed after successful request");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.window_started = None;
        self.opened_at = None;
    }

    /// Record a failed request.
    pub fn on_failure(&mut self) {
        let now = Instant::now();

        // Failures only accumulate within the window.
        match self.window_started {
            Some(started) if now.duration_since(started) <= self.failure_window => {
                self.consecutive_failures += 1;
            }
            _ => {
                self.window_started = Some(now);
                self.consecutive_failures = 1;
            }
        }

        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.failure_threshold
        {
            if self.state != CircuitState::Open {
                warn!(
                    failures = self.consecutive_failures,
                    "circuit opened"
                );
            }
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    /// Current state (without side effects).
    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Token-bucket rate limiter for the submission boundary.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_second: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter replenishing `rate_per_second` tokens up to
    /// `capacity`.
    pub fn new(rate_per_second: f64, capacity: u32) -> Self {
        Self {
            rate_per_second,
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Take `tokens` tokens; false when rate-limited.
    pub fn acquire(&mut self, tokens: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_second).min(self.capacity);
        self.last_refill = now;

        let wanted = f64::from(tokens);
        if self.tokens >= wanted {
            self.tokens -= wanted;
            true
        } else {
            debug!(available = self.tokens, wanted, "rate limited");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays_double_up_to_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        // Past the cap.
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(0).as_secs_f64();
            assert!((0.9..=1.1).contains(&delay), "delay {delay} outside jitter band");
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 5,
            jitter: 0.0,
        };
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(&policy, "test", || {
            calls += 1;
            let outcome = if calls < 3 { Err("transient".to_string()) } else { Ok(7) };
            async move { outcome }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 5,
            jitter: 0.0,
        };
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(&policy, "test", || {
            calls += 1;
            async { Err("permanent".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut breaker = CircuitBreaker::with_defaults();
        for _ in 0..4 {
            breaker.on_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_circuit_half_open_probe_then_close() {
        let mut breaker = CircuitBreaker::new(
            2,
            Duration::from_secs(60),
            Duration::from_millis(0),
        );
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero open-duration: the next request is the probe.
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(
            2,
            Duration::from_secs(60),
            Duration::from_millis(0),
        );
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.allow_request());
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_rate_limiter_enforces_capacity() {
        let mut limiter = RateLimiter::new(0.0, 2);
        assert!(limiter.acquire(1));
        assert!(limiter.acquire(1));
        assert!(!limiter.acquire(1));
    }
}
