//! Sliding-window aggregation over live record streams.
//!
//! The [`SlidingWindowAggregator`] maintains a set of overlapping time
//! windows keyed by aligned start time. Every incoming record is replicated
//! into each window whose span currently covers "now"; a periodic tick
//! recomputes grouped statistics for active windows and emits them to
//! subscribers; windows whose entire span has elapsed are evicted.
//!
//! A window is never finalized: it keeps re-emitting a growing snapshot on
//! every tick until eviction removes it. Consumers that want one result per
//! window must deduplicate by timestamp themselves.

use crate::clock::Clock;
use crate::config::{ConfigError, ProcessingOptions};
use crate::record::Record;
use crate::stats::{self, GroupStats};
use crate::window::{SlidingWindowAssigner, TimeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One grouped-statistics snapshot for one window, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
  /// The window's aligned start time.
  pub timestamp: DateTime<Utc>,
  /// Number of records in the window at emission time.
  pub count: usize,
  /// Per-group statistics, keyed by composite group key.
  pub data: HashMap<String, GroupStats>,
}

struct AggregatorState {
  windows: HashMap<DateTime<Utc>, Vec<Record>>,
  last_cleanup: DateTime<Utc>,
}

/// Maintains overlapping time windows and periodically emits grouped
/// statistics for them.
///
/// Shared by every concurrently processing source; each source only ever
/// calls [`add_record`](Self::add_record). The periodic tick is the sole
/// writer that removes state, and it is single-flight: a tick that fires
/// while the previous one is still executing is a no-op.
pub struct SlidingWindowAggregator {
  assigner: SlidingWindowAssigner,
  window_size: Duration,
  clock: Arc<dyn Clock>,
  state: Mutex<AggregatorState>,
  subscribers: Mutex<Vec<mpsc::Sender<AggregationResult>>>,
  result_capacity: usize,
  in_tick: AtomicBool,
  cancel: CancellationToken,
}

impl SlidingWindowAggregator {
  /// Creates the aggregator and spawns its periodic tick task.
  ///
  /// The tick fires every `sliding_interval` until [`stop`](Self::stop).
  pub fn new(
    options: &ProcessingOptions,
    clock: Arc<dyn Clock>,
  ) -> Result<Arc<Self>, ConfigError> {
    options.validate()?;
    let aggregator = Arc::new(Self {
      assigner: SlidingWindowAssigner::new(options.window_size, options.sliding_interval),
      window_size: options.window_size,
      state: Mutex::new(AggregatorState {
        windows: HashMap::new(),
        last_cleanup: clock.now(),
      }),
      clock,
      subscribers: Mutex::new(Vec::new()),
      result_capacity: options.result_channel_capacity,
      in_tick: AtomicBool::new(false),
      cancel: CancellationToken::new(),
    });

    let ticker = Arc::clone(&aggregator);
    let interval = options.sliding_interval;
    tokio::spawn(async move {
      let mut timer = tokio::time::interval(interval);
      loop {
        tokio::select! {
          _ = ticker.cancel.cancelled() => break,
          _ = timer.tick() => ticker.run_tick().await,
        }
      }
    });

    Ok(aggregator)
  }

  /// Replicates `record` into every window whose span covers "now".
  ///
  /// The stored entries are defensive copies: mutating the original record
  /// afterwards never affects window contents.
  pub fn add_record(&self, record: &Record) {
    let now = self.clock.now();
    let mut state = self.lock_state();
    for start in self.assigner.assign_starts(now) {
      state.windows.entry(start).or_default().push(record.clone());
    }
  }

  /// Opens a bounded subscription to emitted aggregation results.
  ///
  /// Results arrive in emission order. A full channel blocks the tick's
  /// emission phase, which is the backpressure contract; a dropped receiver
  /// is pruned on the next emission.
  pub fn subscribe(&self) -> mpsc::Receiver<AggregationResult> {
    let (tx, rx) = mpsc::channel(self.result_capacity);
    self.lock_subscribers().push(tx);
    rx
  }

  /// Number of currently tracked windows.
  pub fn window_count(&self) -> usize {
    self.lock_state().windows.len()
  }

  /// Boundaries of every currently tracked window, oldest first.
  pub fn active_windows(&self) -> Vec<TimeWindow> {
    let state = self.lock_state();
    let mut windows: Vec<TimeWindow> = state
      .windows
      .keys()
      .map(|start| TimeWindow::starting_at(*start, self.window_size))
      .collect();
    windows.sort_unstable();
    windows
  }

  /// Cancels the tick, discards all windows, and detaches all subscribers.
  ///
  /// No further results are emitted after `stop` returns. Idempotent.
  pub fn stop(&self) {
    self.cancel.cancel();
    self.lock_state().windows.clear();
    self.lock_subscribers().clear();
    tracing::debug!("aggregator stopped");
  }

  async fn run_tick(&self) {
    // Single-flight: a tick overlapping a still-running tick is a no-op.
    if self.in_tick.swap(true, Ordering::SeqCst) {
      tracing::debug!("aggregation tick still in flight; skipping");
      return;
    }

    let now = self.clock.now();
    let results = self.collect_results(now);
    self.emit(results).await;

    self.in_tick.store(false, Ordering::SeqCst);
  }

  /// Computes snapshots for all windows old enough to report, most recent
  /// first, running the eviction pass when one is due.
  fn collect_results(&self, now: DateTime<Utc>) -> Vec<AggregationResult> {
    let slide_millis = self.assigner.slide().as_millis() as i64;
    let mut state = self.lock_state();

    if (now - state.last_cleanup).num_milliseconds() >= self.window_size.as_millis() as i64 {
      let before = state.windows.len();
      let assigner = &self.assigner;
      state.windows.retain(|start, _| !assigner.is_expired(*start, now));
      state.last_cleanup = now;
      tracing::debug!(evicted = before - state.windows.len(), "window eviction pass");
    }

    let mut due: Vec<&DateTime<Utc>> = state
      .windows
      .keys()
      .filter(|start| (now - **start).num_milliseconds() >= slide_millis)
      .collect();
    due.sort_unstable_by(|a, b| b.cmp(a));

    due
      .into_iter()
      .map(|start| {
        let records = &state.windows[start];
        AggregationResult {
          timestamp: *start,
          count: records.len(),
          data: stats::aggregate(records),
        }
      })
      .collect()
  }

  async fn emit(&self, results: Vec<AggregationResult>) {
    if results.is_empty() {
      return;
    }
    let senders: Vec<mpsc::Sender<AggregationResult>> = self.lock_subscribers().clone();
    for result in results {
      if self.cancel.is_cancelled() {
        return;
      }
      for sender in &senders {
        // A closed receiver is pruned below; a full one applies
        // backpressure to the tick.
        let _ = sender.send(result.clone()).await;
      }
    }
    self.lock_subscribers().retain(|s| !s.is_closed());
  }

  fn lock_state(&self) -> MutexGuard<'_, AggregatorState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_subscribers(&self) -> MutexGuard<'_, Vec<mpsc::Sender<AggregationResult>>> {
    self
      .subscribers
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::record::FieldValue;

  fn options(window_ms: u64, slide_ms: u64) -> ProcessingOptions {
    ProcessingOptions::new(
      16,
      Duration::from_millis(window_ms),
      Duration::from_millis(slide_ms),
    )
  }

  fn record(category: &str, value: f64) -> Record {
    let mut r = Record::new();
    r.insert("category", FieldValue::Text(category.to_string()));
    r.insert("value", FieldValue::Number(value));
    r
  }

  async fn step(clock: &ManualClock, millis: u64) {
    clock.advance(Duration::from_millis(millis));
    tokio::time::advance(Duration::from_millis(millis)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_first_result_counts_window_records() {
    // Off-aligned start so boundary instants stay out of the picture.
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    let aggregator =
      SlidingWindowAggregator::new(&options(1_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    aggregator.add_record(&record("a", 1.0));
    aggregator.add_record(&record("a", 2.0));
    step(&clock, 500).await;

    let first = results.recv().await.unwrap();
    assert_eq!(first.timestamp, DateTime::from_timestamp_millis(10_000).unwrap());
    assert_eq!(first.count, 2);

    aggregator.add_record(&record("a", 3.0));
    aggregator.add_record(&record("a", 4.0));
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_emission_descends_by_start_time() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    let aggregator =
      SlidingWindowAggregator::new(&options(1_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    aggregator.add_record(&record("a", 1.0));
    step(&clock, 500).await;

    // The record landed in the windows at 10_000 and 9_500; one tick emits
    // both, most recent first.
    let first = results.recv().await.unwrap();
    let second = results.recv().await.unwrap();
    assert!(first.timestamp > second.timestamp);
    assert_eq!(second.timestamp, DateTime::from_timestamp_millis(9_500).unwrap());
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_window_re_emits_growing_snapshot() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    // Window size leaves the target window alive across both observed ticks.
    let aggregator =
      SlidingWindowAggregator::new(&options(2_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    aggregator.add_record(&record("a", 1.0));
    step(&clock, 500).await;
    let mut first_pass = Vec::new();
    while let Ok(r) = results.try_recv() {
      first_pass.push(r);
    }

    aggregator.add_record(&record("a", 2.0));
    step(&clock, 500).await;
    let mut second_pass = Vec::new();
    while let Ok(r) = results.try_recv() {
      second_pass.push(r);
    }

    let target = DateTime::from_timestamp_millis(10_000).unwrap();
    let before = first_pass.iter().find(|r| r.timestamp == target).unwrap();
    let after = second_pass.iter().find(|r| r.timestamp == target).unwrap();
    assert_eq!(before.count, 1);
    assert_eq!(after.count, 2);
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_grouped_statistics_in_results() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    let aggregator =
      SlidingWindowAggregator::new(&options(1_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    aggregator.add_record(&record("A", 10.0));
    aggregator.add_record(&record("A", 20.0));
    aggregator.add_record(&record("B", 30.0));
    step(&clock, 500).await;

    let result = results.recv().await.unwrap();
    let a = &result.data["category:A"];
    assert_eq!(a.count, 2);
    assert_eq!(a.fields["value"].sum, 30.0);
    assert_eq!(a.fields["value"].avg, 15.0);
    assert_eq!(a.fields["value"].min, 10.0);
    assert_eq!(a.fields["value"].max, 20.0);
    let b = &result.data["category:B"];
    assert_eq!(b.count, 1);
    assert_eq!(b.fields["value"].sum, 30.0);
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_stored_records_are_defensive_copies() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    let aggregator =
      SlidingWindowAggregator::new(&options(1_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    let mut original = record("A", 10.0);
    aggregator.add_record(&original);
    original.insert("value", FieldValue::Number(99.0));
    step(&clock, 500).await;

    let result = results.recv().await.unwrap();
    assert_eq!(result.data["category:A"].fields["value"].sum, 10.0);
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_replication_is_bounded_and_aligned() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_050).unwrap());
    let opts = options(500, 100);
    let aggregator = SlidingWindowAggregator::new(&opts, clock.clone()).unwrap();

    aggregator.add_record(&record("a", 1.0));
    let max_windows =
      SlidingWindowAssigner::new(opts.window_size, opts.sliding_interval).max_windows();
    assert!(aggregator.window_count() <= max_windows);
    assert!(aggregator.window_count() >= 1);
    // Every tracked window's span covers the ingestion instant, and starts
    // sit on slide boundaries.
    for window in aggregator.active_windows() {
      assert!(window.contains(clock.now()));
      assert_eq!(window.start().timestamp_millis() % 100, 0);
    }
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_elapsed_windows_stop_appearing() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_050).unwrap());
    let opts = options(500, 100).with_result_channel_capacity(512);
    let aggregator = SlidingWindowAggregator::new(&opts, clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    for i in 0..10 {
      aggregator.add_record(&record("a", i as f64));
      step(&clock, 100).await;
    }
    step(&clock, 1_000).await;
    while results.try_recv().is_ok() {}

    // Everything has fully elapsed and been evicted; later ticks emit
    // nothing old.
    let horizon = clock.now() - chrono::Duration::milliseconds(500);
    step(&clock, 100).await;
    while let Ok(result) = results.try_recv() {
      assert!(result.timestamp >= horizon);
    }
    assert_eq!(aggregator.window_count(), 0);
    aggregator.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_silences_emission() {
    let clock = ManualClock::new(DateTime::from_timestamp_millis(10_030).unwrap());
    let aggregator =
      SlidingWindowAggregator::new(&options(1_000, 500), clock.clone()).unwrap();
    let mut results = aggregator.subscribe();

    aggregator.add_record(&record("a", 1.0));
    aggregator.stop();
    aggregator.stop(); // idempotent
    step(&clock, 500).await;

    assert!(results.recv().await.is_none());
    assert_eq!(aggregator.window_count(), 0);
  }
}
