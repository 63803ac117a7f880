use std::fmt::{self, Display, Formatter};
use std::io;

/// Errors surfaced by trace sinks, transports, and the companion decoder.
///
/// Failures on the hot logging path are latched inside the sink and
/// reported once, at end-of-trace; a partial trace stays parseable up to
/// the last flushed buffer.
#[derive(Debug)]
pub enum TraceError {
  /// The transport link closed before the trace finished draining.
  Disconnected,
  Io(io::Error),
  /// The decoder hit bytes that do not form a valid record.
  Malformed(String),
}

impl Display for TraceError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Disconnected => {
        write!(f, "transport closed before the trace finished draining")
      }
      Self::Io(err) => write!(f, "i/o error while writing trace: {err}"),
      Self::Malformed(msg) => write!(f, "malformed trace data: {msg}"),
    }
  }
}

impl std::error::Error for TraceError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for TraceError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}
