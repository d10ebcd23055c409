use std::future::Future;
use std::time::Duration;

use ba_core::config::RetryConfig;

use crate::error::Result;

/// Fixed-delay retry for the request-send step of an adapter call.
///
/// Only the send is retried. Once a response stream is open and chunks have
/// been emitted, nothing is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is
    /// spent. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, vendor: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        vendor,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "transient provider error, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
