//! The record-source boundary: where the external decoder hands records in.
//!
//! A source yields decoded records in input order and signals exactly one
//! terminal event: end of input (the stream ends) or a decode error (an
//! `Err` item, after which the engine abandons the stream). Anything that is
//! not a well-formed field mapping must be reported through the same error
//! channel, never silently dropped.

use crate::error::SourceError;
use crate::record::Record;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Stream of decoded records as the engine consumes it.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record, SourceError>> + Send>>;

/// A named producer of decoded records.
pub trait RecordSource: Send {
  /// Name used in logs and summaries.
  fn name(&self) -> &str;

  /// Consumes the source's input and returns its record stream.
  fn stream(&mut self) -> RecordStream;
}

/// In-memory source backed by a vector of pre-decoded items.
pub struct VecSource {
  name: String,
  items: Vec<Result<Record, SourceError>>,
  pace: Option<Duration>,
}

impl VecSource {
  /// A source that yields the given records and then ends successfully.
  pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
    Self {
      name: name.into(),
      items: records.into_iter().map(Ok).collect(),
      pace: None,
    }
  }

  /// A source over raw items, for scripting decode failures mid-stream.
  pub fn with_results(
    name: impl Into<String>,
    items: Vec<Result<Record, SourceError>>,
  ) -> Self {
    Self {
      name: name.into(),
      items,
      pace: None,
    }
  }

  /// Decodes a sequence of JSON objects at the boundary; a value that is not
  /// a flat field mapping becomes an `Err` item in the stream.
  pub fn from_json(name: impl Into<String>, values: &[serde_json::Value]) -> Self {
    let items = values
      .iter()
      .map(|v| Record::from_json(v).map_err(|e| SourceError::Decode(e.to_string())))
      .collect();
    Self {
      name: name.into(),
      items,
      pace: None,
    }
  }

  /// Spaces consecutive records `interval` apart, emulating live arrival.
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.pace = Some(interval);
    self
  }
}

impl RecordSource for VecSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn stream(&mut self) -> RecordStream {
    let items = std::mem::take(&mut self.items);
    match self.pace {
      None => Box::pin(futures::stream::iter(items)),
      Some(interval) => Box::pin(async_stream::stream! {
        for item in items {
          yield item;
          tokio::time::sleep(interval).await;
        }
      }),
    }
  }
}
