//! Record batching with bounded, backpressured output.
//!
//! The [`RecordBatcher`] turns an unbounded stream of individual records into
//! a stream of bounded, stamped [`Batch`]es. Its output channel is bounded,
//! so a slow batch consumer throttles `accept` (and through it the upstream
//! source) instead of causing unbounded buffering.

use crate::clock::Clock;
use crate::config::{ConfigError, ProcessingOptions};
use crate::error::{
  ComponentInfo, ErrorAction, ErrorContext, ErrorStrategy, StreamError, StringError,
};
use crate::record::Record;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A bounded, ordered sequence of stamped records emitted as one unit.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
  /// The stamped records. Order within one sub-chunk is input order; order
  /// across sub-chunks of the same batch is not guaranteed.
  pub records: Vec<Record>,
  /// When the batch was assembled.
  pub created_at: DateTime<Utc>,
}

impl Batch {
  /// Number of records in the batch.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  /// Returns true if the batch carries no records.
  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

/// Buffers incoming records and drains them as stamped batches.
///
/// One batcher serves one source session. A flush cycle drains up to
/// `batch_size` records, splits them into `chunk_count` concurrent
/// sub-chunks, stamps each record with the processing timestamp, and sends
/// the combined batch downstream. Only one flush cycle runs at a time; a
/// record arriving mid-flush waits for the next cycle.
pub struct RecordBatcher {
  buffer: VecDeque<Record>,
  batch_size: usize,
  chunk_count: usize,
  clock: Arc<dyn Clock>,
  output: Option<mpsc::Sender<Batch>>,
  flushing: bool,
  error_strategy: ErrorStrategy<Record>,
  name: Option<String>,
}

impl RecordBatcher {
  /// Creates a batcher and the bounded receiver for its batch output.
  pub fn new(
    options: &ProcessingOptions,
    clock: Arc<dyn Clock>,
  ) -> Result<(Self, mpsc::Receiver<Batch>), ConfigError> {
    options.validate()?;
    let (tx, rx) = mpsc::channel(options.batch_channel_capacity);
    Ok((
      Self {
        buffer: VecDeque::new(),
        batch_size: options.batch_size,
        chunk_count: options.chunk_count,
        clock,
        output: Some(tx),
        flushing: false,
        error_strategy: ErrorStrategy::Skip,
        name: None,
      },
      rx,
    ))
  }

  /// Sets the strategy applied to sub-chunk processing failures.
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<Record>) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the name used in logs and error context.
  pub fn with_name(mut self, name: String) -> Self {
    self.name = Some(name);
    self
  }

  /// Number of records currently buffered.
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }

  /// Buffers a record, flushing when the high-water mark is reached.
  ///
  /// A structurally invalid record is fatal: the error propagates and the
  /// caller must abandon this batcher's stream. If a flush is already in
  /// flight the record is deferred to the next cycle.
  pub async fn accept(&mut self, record: Record) -> Result<(), StreamError<Record>> {
    if !record.is_structurally_valid() {
      return Err(self.fatal("not a field-mapping record", Some(record)));
    }
    if self.output.is_none() {
      return Err(self.fatal("batcher already released", Some(record)));
    }
    self.buffer.push_back(record);
    if self.buffer.len() >= self.batch_size && !self.flushing {
      self.flush_cycle().await?;
    }
    Ok(())
  }

  /// Drains the buffer completely, one flush cycle at a time.
  ///
  /// Terminates even when the final cycle holds fewer than `batch_size`
  /// records; the loop is iterative by design.
  pub async fn flush_all(&mut self) -> Result<(), StreamError<Record>> {
    while !self.buffer.is_empty() {
      self.flush_cycle().await?;
    }
    Ok(())
  }

  /// Detaches the downstream channel and clears all buffered state.
  ///
  /// Safe to call multiple times and after a fatal error.
  pub fn release(&mut self) {
    if self.output.take().is_some() {
      tracing::debug!(
        batcher = %self.display_name(),
        dropped = self.buffer.len(),
        "batcher released"
      );
    }
    self.buffer.clear();
    self.flushing = false;
  }

  async fn flush_cycle(&mut self) -> Result<(), StreamError<Record>> {
    if self.flushing {
      return Ok(());
    }
    self.flushing = true;
    let result = self.run_flush().await;
    self.flushing = false;
    result
  }

  async fn run_flush(&mut self) -> Result<(), StreamError<Record>> {
    let take = self.batch_size.min(self.buffer.len());
    if take == 0 {
      return Ok(());
    }
    let drained: Vec<Record> = self.buffer.drain(..take).collect();
    let now = self.clock.now();

    // Partition into chunk_count sub-chunks, sizes as equal as the
    // remainder allows, and stamp them concurrently.
    let mut pending: FuturesUnordered<_> = partition(drained, self.chunk_count)
      .into_iter()
      .map(|chunk| async move {
        let stamped = stamp_chunk(&chunk, now);
        (chunk, stamped)
      })
      .collect();

    let mut records = Vec::with_capacity(take);
    while let Some((chunk, outcome)) = pending.next().await {
      match outcome {
        Ok(stamped) => records.extend(stamped),
        Err(message) => {
          if let Some(stamped) = self.absorb_chunk_failure(chunk, message, now)? {
            records.extend(stamped);
          }
        }
      }
    }

    if records.is_empty() {
      tracing::warn!(
        batcher = %self.display_name(),
        "flush cycle produced no records; every sub-chunk failed"
      );
      return Ok(());
    }

    let batch = Batch {
      records,
      created_at: now,
    };
    let Some(output) = self.output.as_ref() else {
      return Err(self.fatal("batcher already released", None));
    };
    if output.send(batch).await.is_err() {
      return Err(self.fatal("batch channel closed by downstream", None));
    }
    Ok(())
  }

  /// Routes a failed sub-chunk through the configured error strategy.
  ///
  /// Returns stamped records when a retry eventually succeeds, `None` when
  /// the chunk is skipped, and an error when the strategy stops the stream.
  fn absorb_chunk_failure(
    &self,
    chunk: Vec<Record>,
    message: String,
    now: DateTime<Utc>,
  ) -> Result<Option<Vec<Record>>, StreamError<Record>> {
    let mut error = self.fatal(&message, chunk.first().cloned());
    loop {
      match self.error_strategy.action_for(&error) {
        ErrorAction::Skip => {
          tracing::warn!(
            batcher = %self.display_name(),
            chunk_len = chunk.len(),
            error = %message,
            "sub-chunk failed; skipping it, batch continues"
          );
          return Ok(None);
        }
        ErrorAction::Retry => {
          error.retries += 1;
          match stamp_chunk(&chunk, now) {
            Ok(stamped) => return Ok(Some(stamped)),
            Err(_) => continue,
          }
        }
        ErrorAction::Stop => return Err(error),
      }
    }
  }

  fn fatal(&self, message: &str, item: Option<Record>) -> StreamError<Record> {
    StreamError::new(
      Box::new(StringError(message.to_string())),
      ErrorContext {
        timestamp: chrono::Utc::now(),
        item,
        component_name: self.display_name(),
        component_type: std::any::type_name::<Self>().to_string(),
      },
      self.component_info(),
    )
  }

  fn component_info(&self) -> ComponentInfo {
    ComponentInfo::new(
      self.display_name(),
      std::any::type_name::<Self>().to_string(),
    )
  }

  fn display_name(&self) -> String {
    self
      .name
      .clone()
      .unwrap_or_else(|| "record_batcher".to_string())
  }
}

/// Splits `records` into at most `chunk_count` non-empty runs whose sizes
/// differ by at most one, preserving order within each run.
fn partition(records: Vec<Record>, chunk_count: usize) -> Vec<Vec<Record>> {
  let len = records.len();
  let count = chunk_count.min(len).max(1);
  let base = len / count;
  let remainder = len % count;

  let mut chunks = Vec::with_capacity(count);
  let mut rest = records;
  for i in 0..count {
    let size = base + usize::from(i < remainder);
    let tail = rest.split_off(size.min(rest.len()));
    chunks.push(rest);
    rest = tail;
  }
  chunks.retain(|c| !c.is_empty());
  chunks
}

fn stamp_chunk(chunk: &[Record], now: DateTime<Utc>) -> Result<Vec<Record>, String> {
  let mut stamped = Vec::with_capacity(chunk.len());
  for record in chunk {
    let mut copy = record.clone();
    copy
      .stamp(now)
      .map_err(|e| format!("stamping failed: {}", e))?;
    stamped.push(copy);
  }
  Ok(stamped)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{ManualClock, SystemClock};
  use crate::record::{FieldValue, STAMP_FIELD};
  use proptest::prelude::*;
  use std::time::Duration;

  fn options(batch_size: usize) -> ProcessingOptions {
    ProcessingOptions::new(
      batch_size,
      Duration::from_secs(1),
      Duration::from_millis(500),
    )
  }

  fn record(id: f64, value: f64) -> Record {
    let mut r = Record::new();
    r.insert("id", FieldValue::Number(id));
    r.insert("value", FieldValue::Number(value));
    r
  }

  #[tokio::test]
  async fn test_full_batch_emitted_with_stamps() {
    let start = chrono::DateTime::from_timestamp_millis(50_000).unwrap();
    let clock = ManualClock::new(start);
    let (mut batcher, mut rx) = RecordBatcher::new(&options(2), clock).unwrap();

    batcher.accept(record(1.0, 10.0)).await.unwrap();
    batcher.accept(record(2.0, 20.0)).await.unwrap();

    let batch = rx.try_recv().unwrap();
    assert_eq!(batch.len(), 2);
    for stamped in &batch.records {
      assert_eq!(
        stamped.get(STAMP_FIELD),
        Some(&FieldValue::Number(50_000.0))
      );
    }
    assert_eq!(batcher.buffered(), 0);
  }

  #[tokio::test]
  async fn test_below_threshold_stays_buffered() {
    let (mut batcher, mut rx) =
      RecordBatcher::new(&options(3), Arc::new(SystemClock)).unwrap();
    batcher.accept(record(1.0, 10.0)).await.unwrap();
    batcher.accept(record(2.0, 20.0)).await.unwrap();
    assert_eq!(batcher.buffered(), 2);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_flush_all_drains_remainder() {
    let (mut batcher, mut rx) =
      RecordBatcher::new(&options(2), Arc::new(SystemClock)).unwrap();
    for i in 0..5 {
      batcher.accept(record(i as f64, 0.0)).await.unwrap();
    }
    batcher.flush_all().await.unwrap();

    let mut sizes = Vec::new();
    while let Ok(batch) = rx.try_recv() {
      sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(batcher.buffered(), 0);
  }

  #[tokio::test]
  async fn test_single_chunk_preserves_input_order() {
    let opts = options(4).with_chunk_count(1);
    let (mut batcher, mut rx) =
      RecordBatcher::new(&opts, Arc::new(SystemClock)).unwrap();
    for i in 0..4 {
      batcher.accept(record(i as f64, 0.0)).await.unwrap();
    }
    let batch = rx.try_recv().unwrap();
    let ids: Vec<f64> = batch
      .records
      .iter()
      .map(|r| r.get("id").unwrap().as_number().unwrap())
      .collect();
    assert_eq!(ids, vec![0.0, 1.0, 2.0, 3.0]);
  }

  #[tokio::test]
  async fn test_invalid_record_is_fatal() {
    let (mut batcher, _rx) =
      RecordBatcher::new(&options(2), Arc::new(SystemClock)).unwrap();
    let err = batcher.accept(Record::new()).await.unwrap_err();
    assert!(err.to_string().contains("not a field-mapping record"));
  }

  #[tokio::test]
  async fn test_prestamped_chunk_skipped_batch_continues() {
    // chunk_count = batch_size puts every record in its own sub-chunk, so
    // only the poisoned record's chunk is dropped.
    let opts = options(3).with_chunk_count(3);
    let (mut batcher, mut rx) =
      RecordBatcher::new(&opts, Arc::new(SystemClock)).unwrap();

    let mut poisoned = record(1.0, 10.0);
    poisoned.stamp(chrono::Utc::now()).unwrap();

    batcher.accept(record(0.0, 5.0)).await.unwrap();
    batcher.accept(poisoned).await.unwrap();
    batcher.accept(record(2.0, 15.0)).await.unwrap();

    let batch = rx.try_recv().unwrap();
    assert_eq!(batch.len(), 2);
    let mut ids: Vec<f64> = batch
      .records
      .iter()
      .map(|r| r.get("id").unwrap().as_number().unwrap())
      .collect();
    ids.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(ids, vec![0.0, 2.0]);
  }

  #[tokio::test]
  async fn test_stop_strategy_aborts_on_chunk_failure() {
    let opts = options(2).with_chunk_count(2);
    let (batcher, _rx) = RecordBatcher::new(&opts, Arc::new(SystemClock)).unwrap();
    let mut batcher = batcher.with_error_strategy(ErrorStrategy::Stop);

    let mut poisoned = record(1.0, 10.0);
    poisoned.stamp(chrono::Utc::now()).unwrap();

    batcher.accept(record(0.0, 5.0)).await.unwrap();
    let err = batcher.accept(poisoned).await.unwrap_err();
    assert!(err.to_string().contains("stamping failed"));
  }

  #[tokio::test]
  async fn test_release_is_idempotent() {
    let (mut batcher, mut rx) =
      RecordBatcher::new(&options(2), Arc::new(SystemClock)).unwrap();
    batcher.accept(record(1.0, 10.0)).await.unwrap();
    batcher.release();
    batcher.release();
    assert_eq!(batcher.buffered(), 0);
    // Sender dropped: the channel reports disconnect, not data.
    assert!(matches!(
      rx.try_recv(),
      Err(mpsc::error::TryRecvError::Disconnected)
    ));
    // Accepting after release is a fatal error.
    assert!(batcher.accept(record(2.0, 20.0)).await.is_err());
  }

  #[test]
  fn test_partition_sizes_as_equal_as_remainder_allows() {
    let records: Vec<Record> = (0..10).map(|i| record(i as f64, 0.0)).collect();
    let chunks = partition(records, 4);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![3, 3, 2, 2]);

    let records: Vec<Record> = (0..2).map(|i| record(i as f64, 0.0)).collect();
    let chunks = partition(records, 4);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![1, 1]);
  }

  proptest! {
    #[test]
    fn prop_batch_sizes_sum_to_input_length(
      len in 0usize..60,
      batch_size in 1usize..10,
      chunk_count in 1usize..6,
    ) {
      let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
      rt.block_on(async move {
        let opts = options(batch_size)
          .with_chunk_count(chunk_count)
          .with_batch_channel_capacity(len + 1);
        let (mut batcher, mut rx) =
          RecordBatcher::new(&opts, Arc::new(SystemClock)).unwrap();
        for i in 0..len {
          batcher.accept(record(i as f64, 0.0)).await.unwrap();
        }
        batcher.flush_all().await.unwrap();
        drop(batcher);

        let mut total = 0usize;
        while let Some(batch) = rx.recv().await {
          assert!(batch.len() <= batch_size);
          assert!(!batch.is_empty());
          total += batch.len();
        }
        assert_eq!(total, len);
      });
    }
  }
}
