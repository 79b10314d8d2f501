//! Bounded retries with exponential backoff for network calls.

use std::future::Future;

use super::*;

/// How many times a transient failure is retried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Retries after the first attempt
  pub max_retries:        u32,
  /// Delay before the first retry, in milliseconds
  pub initial_backoff_ms: u64,
  /// Upper bound on any single delay, in milliseconds
  pub max_backoff_ms:     u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { max_retries: 3, initial_backoff_ms: 1_000, max_backoff_ms: 30_000 }
  }
}

impl RetryPolicy {
  /// A policy that tries exactly once.
  pub fn none() -> Self { Self { max_retries: 0, ..Self::default() } }

  /// Delay before retry number `attempt` (zero-based), doubling each time.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
  }

  /// Runs `operation`, retrying while it fails with a transient error.
  ///
  /// Non-transient errors are returned immediately; the last transient error is returned once
  /// the retries are exhausted.
  pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>, {
    let mut attempt = 0;
    loop {
      match operation().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && attempt < self.max_retries => {
          let delay = self.backoff(attempt);
          warn!("{label} failed ({e}), retrying in {delay:?}");
          tokio::time::sleep(delay).await;
          attempt += 1;
        },
        Err(e) => return Err(e),
      }
    }
  }
}
