//! Explicit retry-loop helper: a plain value (`RetryConfig`) plus a
//! call-site helper (`call_with_retry`), so cancellation and backoff are
//! visible control flow rather than hidden behind an attribute.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, ErrorKind, Result};

/// Governs exponential backoff with optional jitter for operations whose
/// failures are classified by `ErrorKind` (see `Error::kind`).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub base: f64,
    pub jitter: bool,
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    /// Default: 3 retries (4 attempts total), 200ms base delay doubling
    /// up to 30s, jittered, retrying rate-limit and provider errors.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            base: 2.0,
            jitter: true,
            retry_on: vec![ErrorKind::RateLimit, ErrorKind::ProviderError],
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.powi(attempt as i32);
        let millis = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64((millis * factor).max(0.0))
    }
}

/// Sleep in short slices so a cancellation flag raised mid-wait is
/// observed promptly rather than only between attempts.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn sleep_cancelable(duration: Duration, cancel: Option<&AtomicBool>) -> bool {
    let Some(cancel) = cancel else {
        thread::sleep(duration);
        return false;
    };

    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::SeqCst) {
            return true;
        }
        let step = remaining.min(CANCEL_POLL_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
    cancel.load(Ordering::SeqCst)
}

/// Calls `op` up to `config.max_retries + 1` times. Only errors whose
/// `Error::kind()` is listed in `config.retry_on` trigger a retry; any
/// other error propagates immediately. On the final failed attempt, the
/// original error is returned unchanged. A cancellation flag observed
/// before an attempt or during a backoff sleep aborts with
/// `Error::Cancelled` without running `op` again.
pub fn call_with_retry<T>(
    config: &RetryConfig,
    cancel: Option<&AtomicBool>,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let total_attempts = config.max_retries + 1;

    for attempt in 0..total_attempts {
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt + 1 == total_attempts;
                let retryable = err.kind().map(|k| config.retry_on.contains(&k)).unwrap_or(false);
                if is_last || !retryable {
                    return Err(err);
                }
                let delay = config.delay_for_attempt(attempt);
                if sleep_cancelable(delay, cancel) {
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    unreachable!("loop always returns within total_attempts iterations")
}
