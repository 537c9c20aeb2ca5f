//! Retry with exponential backoff
//!
//! Generic retry helper for transient failures, plus a full-jitter backoff
//! sequence used by the session's reconnection loop (§2: "exponential
//! backoff with jitter, capped at a configured maximum").

use std::future::Future;
use std::time::Duration;
use tracing::{warn, info};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Maximum delay between retries (cap).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Execute an async operation with exponential backoff retry.
///
/// The `should_retry` closure determines whether a given error is transient
/// (and therefore retryable) or permanent (bail immediately).
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(
///     RetryConfig::default(),
///     || billing_service.calculate_transaction_billing(tx_id, tariff_id),
///     |err| matches!(err, DomainError::Infra(_)),
///     "calculate_billing",
/// ).await;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt,
                        "Succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt == config.max_attempts || !should_retry(&err) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = config.max_attempts,
                        error = %err,
                        "Operation failed permanently"
                    );
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );

                tokio::time::sleep(delay).await;

                // Exponential backoff with cap
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }

    unreachable!("Loop exits via return")
}

/// Full-jitter exponential backoff sequence for session reconnection.
///
/// Each call to `next()` doubles the base delay (capped at `max`) and
/// returns a uniformly random duration in `[0, base]` — this is the
/// resolution recorded in `DESIGN.md` for the spec's open question on
/// exact backoff shape.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            base: initial,
            max,
            attempt: 0,
        }
    }

    /// Delay for the next reconnection attempt.
    pub fn next(&mut self) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(self.attempt as i32);
        let capped = exp.min(self.max.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64(capped * rand::random::<f64>())
    }

    /// Reset the sequence after a successful reconnection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod backoff_tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        let mut b = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(5));
        for _ in 0..20 {
            let d = b.next();
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(30));
        for _ in 0..10 {
            b.next();
        }
        b.reset();
        assert_eq!(b.attempt, 0);
    }
}
