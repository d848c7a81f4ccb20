//! Retry eligibility and retry delays.
//!
//! A failed attempt is retried only when all of the following hold: it was
//! not cancelled, retries remain, its status is in the retryable-status set
//! and its method is in the retryable-method set. Retries count down, so a
//! logical call configured with `retries = n` makes at most `n + 1` attempts.

use http::{Method, StatusCode};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// Status codes retried when no `retry_codes` are configured.
pub const DEFAULT_RETRY_CODES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Returns the default retryable-status set.
pub fn default_retry_codes() -> BTreeSet<u16> {
    DEFAULT_RETRY_CODES.into_iter().collect()
}

/// Returns the default retryable-method set (`GET` and `POST`).
pub fn default_retry_methods() -> Vec<Method> {
    vec![Method::GET, Method::POST]
}

/// How long to wait before re-issuing a retryable request.
///
/// The default is a constant zero delay. Backoff and jitter only apply when
/// chosen explicitly.
///
/// # Examples
///
/// ```
/// use callkit::RetryDelay;
/// use std::time::Duration;
///
/// // Fixed: 250ms before every retry
/// let fixed = RetryDelay::Fixed(Duration::from_millis(250));
/// assert_eq!(fixed.delay_for_retry(3), Duration::from_millis(250));
///
/// // Exponential backoff: 100ms, 200ms, 400ms...
/// let exponential = RetryDelay::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     jitter: false,
/// };
/// assert_eq!(exponential.delay_for_retry(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy)]
pub enum RetryDelay {
    /// Wait the same duration before every retry.
    Fixed(Duration),

    /// Wait `initial_delay * 2^(retry - 1)`, capped at `max_delay`.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// Whether to scale each delay by a random factor in `[0.5, 1.0]`.
        jitter: bool,
    },

    /// Custom delay logic.
    Custom {
        /// Takes the retry number (1 = first retry) and returns the delay before it.
        delay_fn: fn(retry: usize) -> Duration,
    },
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed(Duration::ZERO)
    }
}

impl From<Duration> for RetryDelay {
    fn from(delay: Duration) -> Self {
        RetryDelay::Fixed(delay)
    }
}

impl RetryDelay {
    /// Returns the delay before the given retry (1-indexed).
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::ExponentialBackoff {
                initial_delay,
                max_delay,
                jitter,
            } => {
                let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(jitter_factor)
                } else {
                    delay
                }
            }
            RetryDelay::Custom { delay_fn } => delay_fn(retry),
        }
    }

    /// A stable description used when deriving request keys.
    pub(crate) fn key_repr(&self) -> String {
        match self {
            RetryDelay::Fixed(delay) => format!("fixed:{}", delay.as_millis()),
            RetryDelay::ExponentialBackoff {
                initial_delay,
                max_delay,
                jitter,
            } => format!(
                "exponential:{}:{}:{}",
                initial_delay.as_millis(),
                max_delay.as_millis(),
                jitter
            ),
            RetryDelay::Custom { .. } => "custom".to_string(),
        }
    }
}

/// The resolved retry settings of one attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries left for the logical call.
    pub retries: usize,
    /// Delay before each retry.
    pub delay: RetryDelay,
    /// Statuses that may be retried.
    pub codes: BTreeSet<u16>,
    /// Methods that may be retried.
    pub methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: RetryDelay::default(),
            codes: default_retry_codes(),
            methods: default_retry_methods(),
        }
    }
}

impl RetryPolicy {
    /// Decides whether a non-success response should be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// use callkit::RetryPolicy;
    /// use http::{Method, StatusCode};
    ///
    /// let policy = RetryPolicy { retries: 1, ..RetryPolicy::default() };
    ///
    /// assert!(policy.should_retry(StatusCode::SERVICE_UNAVAILABLE, &Method::GET, false));
    /// assert!(!policy.should_retry(StatusCode::NOT_FOUND, &Method::GET, false));
    /// assert!(!policy.should_retry(StatusCode::SERVICE_UNAVAILABLE, &Method::DELETE, false));
    /// assert!(!policy.should_retry(StatusCode::SERVICE_UNAVAILABLE, &Method::GET, true));
    /// ```
    pub fn should_retry(&self, status: StatusCode, method: &Method, cancelled: bool) -> bool {
        !status.is_success()
            && !cancelled
            && self.retries > 0
            && self.codes.contains(&status.as_u16())
            && self.methods.contains(method)
    }

    /// Returns the delay before the given retry (1-indexed).
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        self.delay.delay_for_retry(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(StatusCode::SERVICE_UNAVAILABLE, &Method::GET, false));
    }

    #[test]
    fn test_exhausted_budget_is_final() {
        let policy = RetryPolicy {
            retries: 0,
            codes: [503].into_iter().collect(),
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(StatusCode::SERVICE_UNAVAILABLE, &Method::GET, false));
    }

    #[test]
    fn test_success_is_never_retried() {
        let policy = RetryPolicy {
            retries: 3,
            codes: [200].into_iter().collect(),
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(StatusCode::OK, &Method::GET, false));
    }

    #[test]
    fn test_default_sets() {
        assert_eq!(
            default_retry_codes().into_iter().collect::<Vec<_>>(),
            vec![408, 409, 425, 429, 500, 502, 503, 504]
        );
        assert_eq!(default_retry_methods(), vec![Method::GET, Method::POST]);
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let delay = RetryDelay::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        };

        assert_eq!(delay.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(delay.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(delay.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(delay.delay_for_retry(4), Duration::from_millis(500));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let delay = RetryDelay::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..20 {
            let d = delay.delay_for_retry(1);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_custom_delay() {
        let delay = RetryDelay::Custom {
            delay_fn: |retry| Duration::from_millis(retry as u64 * 7),
        };
        assert_eq!(delay.delay_for_retry(3), Duration::from_millis(21));
        assert_eq!(delay.key_repr(), "custom");
    }
}
