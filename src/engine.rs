//! The processing engine: wires record sources into the batcher and the
//! sliding-window aggregator.
//!
//! One engine owns one shared [`SlidingWindowAggregator`] and an append-only,
//! order-preserving log of every aggregation result it has emitted. Each
//! call to [`Engine::process_source`] runs an isolated per-source session
//! with its own [`RecordBatcher`] and terminal batch sink; sessions may run
//! concurrently as interleaved tasks and fail independently. Tearing one
//! session down never touches another session or any already-accumulated
//! results.
//!
//! Lifecycle is caller-owned: construct the engine, process sources, and
//! call [`Engine::cleanup`] on shutdown. There are no ambient process-level
//! hooks.

use crate::aggregator::{AggregationResult, SlidingWindowAggregator};
use crate::batcher::RecordBatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ProcessingOptions};
use crate::error::SourceError;
use crate::sink::{BatchSink, TraceSink};
use crate::source::{RecordSource, RecordStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Outcome of a successfully completed source session.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
  /// The source's name.
  pub source: String,
  /// Number of records decoded and forwarded.
  pub records: usize,
}

/// Binds sources to the batching and aggregation engines.
pub struct Engine {
  options: ProcessingOptions,
  clock: Arc<dyn Clock>,
  aggregator: Arc<SlidingWindowAggregator>,
  results: Arc<Mutex<Vec<AggregationResult>>>,
  sessions: Mutex<HashMap<u64, CancellationToken>>,
  next_session: AtomicU64,
  shutdown: CancellationToken,
}

impl Engine {
  /// Creates an engine on the system clock.
  ///
  /// Fails fast on invalid [`ProcessingOptions`]. Must be called from within
  /// a tokio runtime; the aggregator tick and result drain start here.
  pub fn new(options: ProcessingOptions) -> Result<Self, ConfigError> {
    Self::with_clock(options, Arc::new(SystemClock))
  }

  /// Creates an engine on an explicit clock, for deterministic tests.
  pub fn with_clock(
    options: ProcessingOptions,
    clock: Arc<dyn Clock>,
  ) -> Result<Self, ConfigError> {
    options.validate()?;
    let aggregator = SlidingWindowAggregator::new(&options, Arc::clone(&clock))?;

    let results = Arc::new(Mutex::new(Vec::new()));
    let mut subscription = aggregator.subscribe();
    let log = Arc::clone(&results);
    tokio::spawn(async move {
      while let Some(result) = subscription.recv().await {
        log
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .push(result);
      }
    });

    Ok(Self {
      options,
      clock,
      aggregator,
      results,
      sessions: Mutex::new(HashMap::new()),
      next_session: AtomicU64::new(0),
      shutdown: CancellationToken::new(),
    })
  }

  /// The shared aggregator, for callers that want their own subscription.
  pub fn aggregator(&self) -> &Arc<SlidingWindowAggregator> {
    &self.aggregator
  }

  /// Processes one source to completion with the default terminal sink.
  pub async fn process_source(
    &self,
    source: impl RecordSource,
  ) -> Result<SourceSummary, SourceError> {
    self.process_source_with_sink(source, TraceSink).await
  }

  /// Processes one source to completion, draining batches into `sink`.
  ///
  /// Every decoded record is forwarded to the session's batcher and to the
  /// shared aggregator. The returned future resolves when the source signals
  /// end of input, and fails on: a decode error, a structurally invalid
  /// record, a fatal batcher error, zero decoded records, or engine
  /// shutdown. Failure tears down this session only.
  pub async fn process_source_with_sink(
    &self,
    mut source: impl RecordSource,
    mut sink: impl BatchSink + 'static,
  ) -> Result<SourceSummary, SourceError> {
    if self.shutdown.is_cancelled() {
      return Err(SourceError::ShutDown);
    }

    let name = source.name().to_string();
    let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
    let cancel = self.shutdown.child_token();
    self.lock_sessions().insert(session_id, cancel.clone());
    tracing::debug!(source = %name, session = session_id, "source session started");

    let (batcher, mut batches) =
      match RecordBatcher::new(&self.options, Arc::clone(&self.clock)) {
        Ok(pair) => pair,
        Err(e) => {
          self.lock_sessions().remove(&session_id);
          return Err(SourceError::Batch(e.to_string()));
        }
      };
    let mut batcher = batcher.with_name(format!("{}-batcher", name));

    let sink_task = tokio::spawn(async move {
      while let Some(batch) = batches.recv().await {
        if let Err(e) = sink.deliver(batch).await {
          tracing::warn!(error = %e, "batch delivery failed; continuing");
        }
      }
    });

    let outcome = self
      .pump(source.stream(), &mut batcher, &cancel)
      .await;

    // Teardown is scoped to this session: release the batcher (closing the
    // batch channel ends the sink task) and deregister. Accumulated
    // aggregation results are left untouched.
    batcher.release();
    self.lock_sessions().remove(&session_id);
    if sink_task.await.is_err() {
      tracing::warn!(source = %name, "batch sink task failed during teardown");
    }

    match outcome {
      Ok(records) => {
        tracing::debug!(source = %name, records, "source session completed");
        Ok(SourceSummary {
          source: name,
          records,
        })
      }
      Err(error) => {
        tracing::debug!(source = %name, %error, "source session failed");
        Err(error)
      }
    }
  }

  async fn pump(
    &self,
    mut stream: RecordStream,
    batcher: &mut RecordBatcher,
    cancel: &CancellationToken,
  ) -> Result<usize, SourceError> {
    let mut records = 0usize;
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return Err(SourceError::ShutDown),
        next = stream.next() => match next {
          Some(Ok(record)) => {
            if !record.is_structurally_valid() {
              return Err(SourceError::Validation(
                "record maps no fields".to_string(),
              ));
            }
            batcher
              .accept(record.clone())
              .await
              .map_err(|e| SourceError::Batch(e.to_string()))?;
            self.aggregator.add_record(&record);
            records += 1;
          }
          Some(Err(error)) => return Err(error),
          None => break,
        },
      }
    }

    if records == 0 {
      return Err(SourceError::Empty);
    }
    batcher
      .flush_all()
      .await
      .map_err(|e| SourceError::Batch(e.to_string()))?;
    Ok(records)
  }

  /// Defensive, order-preserving snapshot of all results emitted so far.
  pub fn get_results(&self) -> Vec<AggregationResult> {
    self
      .results
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Full engine shutdown: cancels every live session, stops the aggregator
  /// (discarding all windows), and clears the results log.
  ///
  /// This is the only cancellation primitive, and it is global. Idempotent.
  pub fn cleanup(&self) {
    self.shutdown.cancel();
    self.aggregator.stop();
    self
      .results
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
    self.lock_sessions().clear();
    tracing::debug!("engine cleaned up");
  }

  fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
    self
      .sessions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}
