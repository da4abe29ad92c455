use thiserror::Error;
use validator::ValidationErrors;

/// Failure to grow the managed region. The region is left unchanged.
#[derive(Debug, Error)]
pub enum ExtendError {
  #[error("heap exhausted: requested {requested} bytes, {remaining} remaining")]
  Exhausted { requested: usize, remaining: usize },

  #[error("failed to reserve {size} bytes for the heap: {source}")]
  Reserve {
    size: usize,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Error)]
pub enum AllocError {
  /// The heap extender could not grow the region far enough.
  #[error("resource exhausted: {0}")]
  ResourceExhausted(#[from] ExtendError),

  /// `count * size` does not fit in a `usize`.
  #[error("overflow rejected: {count} * {size} exceeds the address space")]
  OverflowRejected { count: usize, size: usize },

  /// Zero-byte requests never produce a block.
  #[error("zero-sized request")]
  ZeroSize,
}

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration parsing error: {0}")]
  Parsing(#[from] Box<figment::Error>),

  #[error("invalid configuration: {0}")]
  Validation(#[from] ValidationErrors),
}

impl From<figment::Error> for ConfigError {
  fn from(error: figment::Error) -> Self {
    ConfigError::Parsing(Box::new(error))
  }
}
