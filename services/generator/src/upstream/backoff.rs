//! Rate-limit backoff with jitter

use std::time::Duration;

use common::config::RetryConfig;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

/// Sleep policy applied between retries of a rate-limited call
#[derive(Debug, Clone)]
pub struct Backoff {
    default_delay: Duration,
    max_jitter: Duration,
    max_hint: Duration,
}

impl Backoff {
    pub fn new(default_delay: Duration, max_jitter: Duration, max_hint: Duration) -> Self {
        Self {
            default_delay,
            max_jitter,
            max_hint,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.default_retry_after(),
            config.max_jitter(),
            config.max_retry_after(),
        )
    }

    /// Delay to wait for the given hint: the hint itself (capped at
    /// `max_hint`) when the upstream supplied one, the default otherwise,
    /// plus random jitter.
    pub fn delay(&self, hint: Option<Duration>) -> Duration {
        let base = hint.map_or(self.default_delay, |h| h.min(self.max_hint));
        if self.max_jitter.is_zero() {
            return base;
        }

        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter);
        base.saturating_add(jitter)
    }

    /// Suspend the caller for [`Backoff::delay`] and report how long it slept
    pub async fn wait(&self, hint: Option<Duration>) -> Duration {
        let delay = self.delay(hint);
        debug!(delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
        delay
    }
}

/// Parse a numeric `Retry-After` header. Decimal values truncate to whole
/// seconds and negative ones clamp to zero; anything else yields `None`.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds: f64 = raw.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }

    Some(Duration::from_secs(seconds.max(0.0).trunc() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_retry_after_integer_and_decimal() {
        assert_eq!(retry_after_hint(&headers("5")), Some(Duration::from_secs(5)));
        assert_eq!(retry_after_hint(&headers(" 2.7 ")), Some(Duration::from_secs(2)));
        assert_eq!(retry_after_hint(&headers("-3")), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_unparseable_or_absent() {
        assert_eq!(retry_after_hint(&HeaderMap::new()), None);
        assert_eq!(retry_after_hint(&headers("soon")), None);
        assert_eq!(
            retry_after_hint(&headers("Wed, 21 Oct 2015 07:28:00 GMT")),
            None
        );
        assert_eq!(retry_after_hint(&headers("NaN")), None);
    }

    #[test]
    fn test_delay_uses_hint_or_default_within_jitter() {
        let backoff = Backoff::new(
            Duration::from_secs(12),
            Duration::from_millis(1500),
            Duration::from_secs(300),
        );

        for _ in 0..50 {
            let d = backoff.delay(None);
            assert!(d >= Duration::from_secs(12));
            assert!(d <= Duration::from_millis(13_500));

            let d = backoff.delay(Some(Duration::from_secs(3)));
            assert!(d >= Duration::from_secs(3));
            assert!(d <= Duration::from_millis(4_500));
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let backoff = Backoff::new(Duration::from_secs(7), Duration::ZERO, Duration::from_secs(300));
        assert_eq!(backoff.delay(None), Duration::from_secs(7));
        assert_eq!(backoff.delay(Some(Duration::from_secs(1))), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_hint_is_capped() {
        let hint = retry_after_hint(&headers("1e20"));
        assert!(hint.is_some());

        let backoff = Backoff::new(
            Duration::from_secs(12),
            Duration::from_millis(1500),
            Duration::from_secs(300),
        );
        for _ in 0..50 {
            let d = backoff.delay(hint);
            assert!(d >= Duration::from_secs(300));
            assert!(d <= Duration::from_millis(301_500));
        }

        let unbounded = Backoff::new(Duration::from_secs(12), Duration::from_millis(1500), Duration::MAX);
        for _ in 0..50 {
            assert!(unbounded.delay(hint) >= Duration::from_secs(u64::MAX));
        }
    }

    #[test]
    fn test_defaults_from_config() {
        let backoff = Backoff::from_config(&RetryConfig::default());
        let d = backoff.delay(None);
        assert!(d >= Duration::from_secs(12) && d <= Duration::from_millis(13_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_the_delay() {
        let backoff = Backoff::new(Duration::from_secs(12), Duration::ZERO, Duration::from_secs(300));
        let started = tokio::time::Instant::now();

        let slept = backoff.wait(Some(Duration::from_secs(2))).await;
        assert_eq!(slept, Duration::from_secs(2));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
