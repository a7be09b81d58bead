use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// The different kinds of errors the library can return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
  /// `InvalidInput` errors indicate the token streams or parameters
  /// handed to the encoder cannot be represented, e.g. a histogram with
  /// more entries than an ANS table can hold.
  InvalidInput,
  /// `InternalInvariant` errors indicate a logic error inside the
  /// encoder, e.g. a histogram rebalance that failed to terminate with a
  /// positive balancing bin. These are bugs, not user errors.
  InternalInvariant,
  /// `EncodingRejected` errors occur when a histogram serialization
  /// cannot represent its input (run lengths too long for the counts
  /// format). Method selection normally retries with a flat code before
  /// this ever propagates.
  EncodingRejected,
  /// `WriterOverflow` errors indicate a bit sink reservation was
  /// exceeded. The sink is rewound to the last successful boundary.
  WriterOverflow,
}

/// The error type used in results for all `entro` functionality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntroError {
  pub kind: ErrorKind,
  pub message: String,
}

impl EntroError {
  pub(crate) fn new<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
    EntroError {
      kind,
      message: message.as_ref().to_string(),
    }
  }

  pub(crate) fn invalid_input<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::InvalidInput, message)
  }

  pub(crate) fn invariant<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::InternalInvariant, message)
  }

  pub(crate) fn rejected<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::EncodingRejected, message)
  }

  pub(crate) fn overflow<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::WriterOverflow, message)
  }
}

impl Display for EntroError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "entro {:?} error: {}",
      self.kind, &self.message
    )
  }
}

impl Error for EntroError {}

pub type EntroResult<T> = Result<T, EntroError>;
