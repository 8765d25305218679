//! Retry with exponential backoff for fact source calls.

use std::thread;
use std::time::Duration;

use crate::config::RetrySettings;

use super::ConnectorError;

/// Retry policy for blocking connector calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Backoff starts at `initial_backoff` and doubles each retry. Permanent
    /// failures return immediately.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Result<T, ConnectorError>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying fact source call"
                    );
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: settings.initial_backoff(),
        }
    }
}
