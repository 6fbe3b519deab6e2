//! Terminal sinks for batched output.
//!
//! Batched output is currently a terminal stage: the engine drains each
//! session's batch channel into a [`BatchSink`]. Delivery failures are
//! transient; they are logged and absorbed, never failing the session.

use crate::batcher::Batch;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Failure to deliver a batch downstream.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("sink delivery failed: {0}")]
pub struct SinkError(pub String);

/// Consumes emitted batches.
#[async_trait]
pub trait BatchSink: Send {
  /// Delivers one batch.
  async fn deliver(&mut self, batch: Batch) -> Result<(), SinkError>;
}

/// Default terminal sink: logs the batch and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceSink;

#[async_trait]
impl BatchSink for TraceSink {
  async fn deliver(&mut self, batch: Batch) -> Result<(), SinkError> {
    tracing::debug!(records = batch.len(), created_at = %batch.created_at, "batch delivered");
    Ok(())
  }
}

/// Collecting sink for tests and diagnostics.
///
/// The sink itself moves into the engine's drain task; keep the handle from
/// [`collected`](Self::collected) to inspect what arrived.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
  batches: Arc<Mutex<Vec<Batch>>>,
}

impl VecSink {
  /// Creates an empty collecting sink.
  pub fn new() -> Self {
    Self::default()
  }

  /// Shared handle to the collected batches.
  pub fn collected(&self) -> Arc<Mutex<Vec<Batch>>> {
    Arc::clone(&self.batches)
  }
}

#[async_trait]
impl BatchSink for VecSink {
  async fn deliver(&mut self, batch: Batch) -> Result<(), SinkError> {
    self
      .batches
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(batch);
    Ok(())
  }
}
