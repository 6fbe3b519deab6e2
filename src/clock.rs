//! Clock abstraction so window arithmetic is deterministic under test.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" for window assignment and record stamping.
pub trait Clock: Send + Sync {
  /// Current time.
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock advanced by hand, for tests that script time.
#[derive(Debug)]
pub struct ManualClock {
  millis: AtomicI64,
}

impl ManualClock {
  /// Creates a manual clock pinned to `start`.
  pub fn new(start: DateTime<Utc>) -> Arc<Self> {
    Arc::new(Self {
      millis: AtomicI64::new(start.timestamp_millis()),
    })
  }

  /// Advances the clock by `step`.
  pub fn advance(&self, step: Duration) {
    self.millis.fetch_add(step.as_millis() as i64, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
      .expect("manual clock out of range")
  }
}
