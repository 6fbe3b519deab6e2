//! Window boundaries and sliding-window assignment arithmetic.
//!
//! Windowing makes bounded computations possible over unbounded record
//! streams. This module owns the boundary arithmetic only; the aggregator
//! owns window contents and lifecycle.
//!
//! # Core Concepts
//!
//! - [`TimeWindow`]: a window boundary (aligned start, exclusive end)
//! - [`SlidingWindowAssigner`]: computes, for a point in time, every aligned
//!   window start whose span covers it
//!
//! Sliding windows overlap: with a window size of 1000ms and a slide of
//! 500ms, a record lands in two (occasionally three, at exact boundary
//! instants) windows at once. That replication is what makes the windows
//! "sliding" rather than "tumbling".

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// A time-based window with an aligned start and exclusive end.
#[derive(Debug, Clone)]
pub struct TimeWindow {
  /// Start time of the window (inclusive).
  start: DateTime<Utc>,
  /// End time of the window (exclusive).
  end: DateTime<Utc>,
}

impl TimeWindow {
  /// Creates a new time window with the given start and end.
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self { start, end }
  }

  /// Creates the window of span `size` starting at `start`.
  pub fn starting_at(start: DateTime<Utc>, size: Duration) -> Self {
    let span = ChronoDuration::from_std(size).unwrap_or(ChronoDuration::seconds(1));
    Self {
      start,
      end: start + span,
    }
  }

  /// Returns the start time of the window.
  pub fn start(&self) -> DateTime<Utc> {
    self.start
  }

  /// Returns the end time of the window.
  pub fn end(&self) -> DateTime<Utc> {
    self.end
  }

  /// Returns true if the given timestamp falls within this window.
  pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
    timestamp >= self.start && timestamp < self.end
  }
}

impl PartialEq for TimeWindow {
  fn eq(&self, other: &Self) -> bool {
    self.start == other.start && self.end == other.end
  }
}

impl Eq for TimeWindow {}

impl Hash for TimeWindow {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.start.hash(state);
    self.end.hash(state);
  }
}

impl PartialOrd for TimeWindow {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for TimeWindow {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .start
      .cmp(&other.start)
      .then_with(|| self.end.cmp(&other.end))
  }
}

impl fmt::Display for TimeWindow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {})",
      self.start.format("%H:%M:%S%.3f"),
      self.end.format("%H:%M:%S%.3f")
    )
  }
}

/// Assigns points in time to overlapping sliding windows.
///
/// Every produced start time is an exact multiple of the slide interval.
/// A timestamp `now` belongs to a window starting at `s` iff
/// `now - s <= size`; the upper bound is inclusive, matching eviction,
/// which keeps a window until its age strictly exceeds the window size.
#[derive(Debug, Clone)]
pub struct SlidingWindowAssigner {
  /// Size of each window.
  size: Duration,
  /// Slide interval between window starts.
  slide: Duration,
}

impl SlidingWindowAssigner {
  /// Creates a new sliding window assigner.
  pub fn new(size: Duration, slide: Duration) -> Self {
    Self { size, slide }
  }

  /// Returns the window size.
  pub fn size(&self) -> Duration {
    self.size
  }

  /// Returns the slide interval.
  pub fn slide(&self) -> Duration {
    self.slide
  }

  /// Upper bound on the number of windows a single timestamp can land in.
  pub fn max_windows(&self) -> usize {
    let size_millis = self.size.as_millis();
    let slide_millis = self.slide.as_millis();
    (size_millis.div_ceil(slide_millis) + 1) as usize
  }

  /// The aligned start of the most recent window covering `now`.
  pub fn aligned_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    let ts_millis = now.timestamp_millis();
    let slide_millis = self.slide.as_millis() as i64;
    let start_millis = ts_millis.div_euclid(slide_millis) * slide_millis;
    DateTime::from_timestamp_millis(start_millis).unwrap_or(now)
  }

  /// Every aligned window start whose span covers `now`, most recent first.
  pub fn assign_starts(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let ts_millis = now.timestamp_millis();
    let size_millis = self.size.as_millis() as i64;
    let slide_millis = self.slide.as_millis() as i64;
    let first_start = ts_millis.div_euclid(slide_millis) * slide_millis;

    (0..self.max_windows() as i64)
      .map(|i| first_start - i * slide_millis)
      .filter(|start| ts_millis - start <= size_millis)
      .filter_map(DateTime::from_timestamp_millis)
      .collect()
  }

  /// Returns true once `start`'s entire span has elapsed at `now`.
  pub fn is_expired(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.timestamp_millis() - start.timestamp_millis() > self.size.as_millis() as i64
  }
}
