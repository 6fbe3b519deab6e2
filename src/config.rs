//! Processing configuration shared by the batcher, the aggregator, and the
//! engine that wires them together.

use std::time::Duration;
use thiserror::Error;

/// Error raised when processing options are invalid at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
  /// A size parameter must be at least one.
  #[error("{0} must be greater than zero")]
  ZeroSize(&'static str),
  /// A duration parameter must be non-zero.
  #[error("{0} must be a positive duration")]
  ZeroDuration(&'static str),
}

/// Options governing batching and window aggregation.
///
/// `window_size` should be a whole multiple of `sliding_interval`; it is not
/// required, but a non-aligned pair produces windows whose final slide is
/// only partially covered, and construction logs a warning for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOptions {
  /// Maximum records per emitted batch; also the flush high-water mark.
  pub batch_size: usize,
  /// Full span of every aggregation window.
  pub window_size: Duration,
  /// Interval at which new windows open and aggregates are emitted.
  pub sliding_interval: Duration,
  /// Number of concurrent sub-chunks a draining batch is split into.
  pub chunk_count: usize,
  /// Capacity of the bounded batch output channel (the backpressure point).
  pub batch_channel_capacity: usize,
  /// Capacity of each bounded aggregation-result subscription channel.
  pub result_channel_capacity: usize,
}

impl ProcessingOptions {
  /// Creates options with the given core parameters and default fan-out
  /// (4 sub-chunks) and channel capacities.
  pub fn new(batch_size: usize, window_size: Duration, sliding_interval: Duration) -> Self {
    Self {
      batch_size,
      window_size,
      sliding_interval,
      chunk_count: 4,
      batch_channel_capacity: 16,
      result_channel_capacity: 64,
    }
  }

  /// Sets the sub-chunk fan-out for batch processing.
  pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
    self.chunk_count = chunk_count;
    self
  }

  /// Sets the bounded batch channel capacity.
  pub fn with_batch_channel_capacity(mut self, capacity: usize) -> Self {
    self.batch_channel_capacity = capacity;
    self
  }

  /// Sets the bounded result channel capacity.
  pub fn with_result_channel_capacity(mut self, capacity: usize) -> Self {
    self.result_channel_capacity = capacity;
    self
  }

  /// Validates the options, logging a warning for a window size that is not
  /// a whole multiple of the sliding interval.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.batch_size == 0 {
      return Err(ConfigError::ZeroSize("batch_size"));
    }
    if self.chunk_count == 0 {
      return Err(ConfigError::ZeroSize("chunk_count"));
    }
    if self.batch_channel_capacity == 0 {
      return Err(ConfigError::ZeroSize("batch_channel_capacity"));
    }
    if self.result_channel_capacity == 0 {
      return Err(ConfigError::ZeroSize("result_channel_capacity"));
    }
    if self.window_size.is_zero() {
      return Err(ConfigError::ZeroDuration("window_size"));
    }
    if self.sliding_interval.is_zero() {
      return Err(ConfigError::ZeroDuration("sliding_interval"));
    }
    if self.window_size.as_millis() % self.sliding_interval.as_millis() != 0 {
      tracing::warn!(
        window_size_ms = self.window_size.as_millis() as u64,
        sliding_interval_ms = self.sliding_interval.as_millis() as u64,
        "window_size is not a multiple of sliding_interval"
      );
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_fanout_and_capacities() {
    let opts = ProcessingOptions::new(10, Duration::from_secs(1), Duration::from_millis(500));
    assert_eq!(opts.chunk_count, 4);
    assert!(opts.batch_channel_capacity > 0);
    assert!(opts.result_channel_capacity > 0);
    assert!(opts.validate().is_ok());
  }

  #[test]
  fn test_zero_batch_size_rejected() {
    let opts = ProcessingOptions::new(0, Duration::from_secs(1), Duration::from_millis(500));
    assert_eq!(opts.validate(), Err(ConfigError::ZeroSize("batch_size")));
  }

  #[test]
  fn test_zero_durations_rejected() {
    let opts = ProcessingOptions::new(1, Duration::ZERO, Duration::from_millis(500));
    assert_eq!(opts.validate(), Err(ConfigError::ZeroDuration("window_size")));

    let opts = ProcessingOptions::new(1, Duration::from_secs(1), Duration::ZERO);
    assert_eq!(
      opts.validate(),
      Err(ConfigError::ZeroDuration("sliding_interval"))
    );
  }

  #[test]
  fn test_builders() {
    let opts = ProcessingOptions::new(5, Duration::from_secs(2), Duration::from_secs(1))
      .with_chunk_count(2)
      .with_batch_channel_capacity(3)
      .with_result_channel_capacity(7);
    assert_eq!(opts.chunk_count, 2);
    assert_eq!(opts.batch_channel_capacity, 3);
    assert_eq!(opts.result_channel_capacity, 7);
  }
}
