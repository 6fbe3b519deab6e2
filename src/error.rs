//! # Error Handling
//!
//! Two layers of error handling, kept deliberately separate:
//!
//! - **Component-level**: [`StreamError`] carries rich context (timestamp,
//!   offending item, component identity) for failures inside a processing
//!   component, and [`ErrorStrategy`] / [`ErrorAction`] decide whether such a
//!   failure stops the component, is skipped, or is retried. The batcher uses
//!   this layer to absorb transient sub-chunk failures without aborting the
//!   batch.
//! - **Session-level**: [`SourceError`] is the fatal taxonomy a per-source
//!   processing session can terminate with. These reject the completion of
//!   `Engine::process_source` and never leak across sessions.
//!
//! Transient failures are logged and absorbed; fatal failures reject exactly
//! one source's completion. There is no global error channel.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Action to take when an error occurs in a processing component.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorAction {
  /// Stop processing immediately.
  Stop,
  /// Skip the item (or sub-chunk) that caused the error and continue.
  Skip,
  /// Retry the operation that caused the error.
  Retry,
}

// Type alias for the custom error handler function
type CustomErrorHandler<T> = Arc<dyn Fn(&StreamError<T>) -> ErrorAction + Send + Sync>;

/// Strategy for handling component-level errors.
///
/// Configured per component; the default everywhere is `Skip` for transient
/// work (sub-chunk stamping) and `Stop` for structural failures.
pub enum ErrorStrategy<T> {
  /// Stop processing immediately when an error occurs.
  Stop,
  /// Skip items that cause errors and continue processing.
  Skip,
  /// Retry failed operations up to the given number of times.
  Retry(usize),
  /// Custom error handling logic.
  Custom(CustomErrorHandler<T>),
}

impl<T: fmt::Debug + Clone + Send + Sync> ErrorStrategy<T> {
  /// Creates a custom strategy from a handler function.
  pub fn new_custom<F>(f: F) -> Self
  where
    F: Fn(&StreamError<T>) -> ErrorAction + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  /// Resolves this strategy against a concrete error.
  pub fn action_for(&self, error: &StreamError<T>) -> ErrorAction {
    match self {
      ErrorStrategy::Stop => ErrorAction::Stop,
      ErrorStrategy::Skip => ErrorAction::Skip,
      ErrorStrategy::Retry(n) if error.retries < *n => ErrorAction::Retry,
      ErrorStrategy::Retry(_) => ErrorAction::Stop,
      ErrorStrategy::Custom(handler) => handler(error),
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> Clone for ErrorStrategy<T> {
  fn clone(&self) -> Self {
    match self {
      ErrorStrategy::Stop => ErrorStrategy::Stop,
      ErrorStrategy::Skip => ErrorStrategy::Skip,
      ErrorStrategy::Retry(n) => ErrorStrategy::Retry(*n),
      ErrorStrategy::Custom(handler) => ErrorStrategy::Custom(handler.clone()),
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> fmt::Debug for ErrorStrategy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorStrategy::Stop => write!(f, "ErrorStrategy::Stop"),
      ErrorStrategy::Skip => write!(f, "ErrorStrategy::Skip"),
      ErrorStrategy::Retry(n) => write!(f, "ErrorStrategy::Retry({})", n),
      ErrorStrategy::Custom(_) => write!(f, "ErrorStrategy::Custom"),
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> PartialEq for ErrorStrategy<T> {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (ErrorStrategy::Stop, ErrorStrategy::Stop) => true,
      (ErrorStrategy::Skip, ErrorStrategy::Skip) => true,
      (ErrorStrategy::Retry(a), ErrorStrategy::Retry(b)) => a == b,
      (ErrorStrategy::Custom(_), ErrorStrategy::Custom(_)) => true,
      _ => false,
    }
  }
}

/// A simple error type that wraps a string message.
#[derive(Debug)]
pub struct StringError(pub String);

impl fmt::Display for StringError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl Error for StringError {}

/// Error that occurred inside a processing component.
///
/// Carries the original error, the context it happened in, and how often it
/// has been retried.
#[derive(Debug)]
pub struct StreamError<T> {
  /// The original error.
  pub source: Box<dyn Error + Send + Sync>,
  /// Context about when and where the error occurred.
  pub context: ErrorContext<T>,
  /// The component that encountered the error.
  pub component: ComponentInfo,
  /// Number of times this error has been retried.
  pub retries: usize,
}

impl<T: fmt::Debug + Clone + Send + Sync> StreamError<T> {
  /// Creates a new error with `retries` set to 0.
  pub fn new(
    source: Box<dyn Error + Send + Sync>,
    context: ErrorContext<T>,
    component: ComponentInfo,
  ) -> Self {
    Self {
      source,
      context,
      component,
      retries: 0,
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> Clone for StreamError<T> {
  fn clone(&self) -> Self {
    Self {
      source: Box::new(StringError(self.source.to_string())),
      context: self.context.clone(),
      component: self.component.clone(),
      retries: self.retries,
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> fmt::Display for StreamError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Error in {} ({}): {}",
      self.component.name, self.component.type_name, self.source
    )
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> Error for StreamError<T> {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    Some(self.source.as_ref())
  }
}

/// Context information about when and where an error occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext<T> {
  /// When the error occurred.
  pub timestamp: chrono::DateTime<chrono::Utc>,
  /// The item being processed, if available.
  pub item: Option<T>,
  /// Name of the component that encountered the error.
  pub component_name: String,
  /// Type of the component that encountered the error.
  pub component_type: String,
}

/// Identifying information about a processing component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInfo {
  /// The component's configured name.
  pub name: String,
  /// The component's type name.
  pub type_name: String,
}

impl ComponentInfo {
  /// Creates a new `ComponentInfo`.
  pub fn new(name: String, type_name: String) -> Self {
    Self { name, type_name }
  }
}

/// Fatal outcome of one source's processing session.
///
/// Exactly one of these rejects a session; callers processing N sources
/// concurrently inspect each completion independently. Aggregation results
/// accumulated before the failure always survive it.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum SourceError {
  /// The external decoder reported malformed input.
  #[error("source decode failure: {0}")]
  Decode(String),
  /// A decoded value is not a structurally valid record.
  #[error("invalid record: {0}")]
  Validation(String),
  /// The source produced zero records; there is no "success with nothing".
  #[error("source produced no records")]
  Empty,
  /// The batcher stream reported a fatal error.
  #[error("batch stream failure: {0}")]
  Batch(String),
  /// The engine was cleaned up while this session was live.
  #[error("engine shut down during processing")]
  ShutDown,
}
