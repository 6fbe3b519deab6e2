//! # fieldflow
//!
//! Real-time windowed aggregation over streams of tabular records.
//!
//! fieldflow ingests decoded tabular records from one or more independent
//! sources and produces time-windowed aggregate statistics while records are
//! still arriving, shielding the aggregation stage from a slow or bursty
//! consumer through batched backpressure.
//!
//! ## Key Components
//!
//! - **[`Record`](record::Record)**: an ordered, schema-less field mapping
//!   of numeric and textual values
//! - **[`RecordBatcher`](batcher::RecordBatcher)**: buffers records, drains
//!   them as bounded batches of stamped records, and splits each batch into
//!   concurrently processed sub-chunks
//! - **[`SlidingWindowAggregator`](aggregator::SlidingWindowAggregator)**:
//!   replicates records into overlapping time windows and periodically emits
//!   grouped statistics per window
//! - **[`Engine`](engine::Engine)**: wires each source into both engines,
//!   tracks per-source success and failure independently, and accumulates an
//!   ordered result log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldflow::{Engine, ProcessingOptions, VecSource};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ProcessingOptions::new(
//!   100,
//!   Duration::from_secs(10),
//!   Duration::from_secs(5),
//! );
//! let engine = Engine::new(options)?;
//!
//! let source = VecSource::from_json("upload", &[
//!   serde_json::json!({"category": "A", "value": 10}),
//!   serde_json::json!({"category": "B", "value": 30}),
//! ]);
//! let summary = engine.process_source(source).await?;
//! println!("processed {} records", summary.records);
//!
//! let results = engine.get_results();
//! engine.cleanup();
//! # Ok(())
//! # }
//! ```

/// Sliding-window aggregation engine and its emitted results.
pub mod aggregator;
/// Record batching with bounded, backpressured output.
pub mod batcher;
/// Clock abstraction for deterministic time in tests.
pub mod clock;
/// Processing configuration and validation.
pub mod config;
/// Orchestration of sources into the batching and windowing paths.
pub mod engine;
/// Error strategies, component errors, and the per-source failure taxonomy.
pub mod error;
/// The dynamic tabular record model.
pub mod record;
/// Terminal sinks for batched output.
pub mod sink;
/// The record-source boundary contract and in-memory sources.
pub mod source;
/// Grouping and per-group numeric statistics.
pub mod stats;
/// Window boundaries and sliding-window assignment arithmetic.
pub mod window;

pub use aggregator::{AggregationResult, SlidingWindowAggregator};
pub use batcher::{Batch, RecordBatcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ProcessingOptions};
pub use engine::{Engine, SourceSummary};
pub use error::{ErrorAction, ErrorStrategy, SourceError, StreamError};
pub use record::{FieldValue, Record, RecordError, STAMP_FIELD};
pub use sink::{BatchSink, SinkError, TraceSink, VecSink};
pub use source::{RecordSource, RecordStream, VecSource};
pub use stats::{GroupStats, NumericStats};
pub use window::{SlidingWindowAssigner, TimeWindow};
