use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt`
    Linear { step: Duration },
    /// `base * 2^(attempt-1)` capped at `cap`, plus up to `jitter` of noise.
    Exponential {
        base: Duration,
        cap: Duration,
        jitter: Duration,
    },
}

/// Bounded retry with backoff. Attempts are 1-based; the delay after attempt
/// `n` is `delay_for(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: usize, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Linear { step },
        }
    }

    pub fn exponential(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(250),
                cap: Duration::from_millis(5_000),
                jitter: Duration::from_millis(250),
            },
        }
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self.backoff {
            Backoff::Linear { step } => step.saturating_mul(attempt.max(1) as u32),
            Backoff::Exponential { base, cap, jitter } => {
                let exponent = (attempt.saturating_sub(1)).min(5) as u32;
                let grown = base.saturating_mul(2u32.saturating_pow(exponent)).min(cap);
                let jitter_ms = jitter.as_millis() as u64;
                if jitter_ms == 0 {
                    return grown;
                }
                let seed = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() as u64)
                    .unwrap_or(0);
                grown + Duration::from_millis(seed % jitter_ms)
            }
        }
    }

    /// Runs `op` until it succeeds, the error is not retryable, or attempts
    /// run out. The last error is returned unchanged.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, AppError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        P: Fn(&AppError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= attempts || !is_retryable(&err) {
                        return Err(err);
                    }
                    tracing::debug!(attempt, error = %err, "retrying after failure");
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
