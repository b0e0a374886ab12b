//! Reconnection backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Attempts before giving up (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// A fresh attempt counter over this config.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            attempt: 0,
        }
    }
}

/// Attempt counter for one run of reconnects. Reset after a successful session.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` if attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.config.should_reconnect(self.attempt) {
            Some(self.config.delay_for_attempt(self.attempt))
        } else {
            None
        }
    }

    /// Forget recorded failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Call `connect_fn` until it succeeds, sleeping between attempts.
///
/// Errors for which `is_retryable` returns `false` are returned immediately.
pub async fn reconnect_with_backoff<F, Fut, T, E, R>(
    config: &ReconnectConfig,
    is_retryable: R,
    mut connect_fn: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut backoff = config.backoff();

    loop {
        match connect_fn().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                let Some(delay) = backoff.next_delay() else {
                    warn!(attempts = backoff.attempt(), error = %e, "giving up reconnecting");
                    return Err(e);
                };
                debug!(attempt = backoff.attempt(), ?delay, error = %e, "connect failed, retrying");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = ReconnectConfig::default();

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(32));
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_multiplier_below_one_does_not_shrink() {
        let config = ReconnectConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
    }

    #[test]
    fn test_should_reconnect_limited() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };

        assert!(config.should_reconnect(1));
        assert!(config.should_reconnect(2));
        assert!(!config.should_reconnect(3));
    }

    #[test]
    fn test_backoff_exhausts_and_resets() {
        let config = ReconnectConfig {
            max_attempts: Some(2),
            ..Default::default()
        };
        let mut backoff = config.backoff();

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<&str, String> =
            reconnect_with_backoff(&ReconnectConfig::default(), |_| true, || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("refused".to_string())
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_on_fatal_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = reconnect_with_backoff(
            &ReconnectConfig::default(),
            |e: &String| e != "fatal",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;

        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = reconnect_with_backoff(&config, |_| true, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
