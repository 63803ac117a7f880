use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::TraceError;
use crate::wire::{utf16_byte_len, TraceBuffer, FILE_BUF_LEN};

/// Result of asking a sink to finish the trace.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EndOutcome {
  /// Everything reached the transport; the trace file/stream is complete.
  Complete,
  /// Buffered data is still in flight; poll [`Sink::poll_complete`].
  Draining,
}

/// Buffered transport for encoded records.
///
/// The encoder computes the exact byte length of the next record and calls
/// [`Sink::ensure_capacity`] before writing any of its fields, so
/// implementations flush only on record boundaries.
pub trait Sink {
  /// Flush if a record of `next_record_len` would overflow the buffer.
  fn ensure_capacity(&mut self, next_record_len: usize);

  /// Finish the trace. I/O errors latched during logging surface here.
  ///
  /// # Errors
  ///
  /// Returns the first transport failure observed while writing.
  fn end(&mut self) -> Result<EndOutcome, TraceError>;

  /// Drive a draining sink; `Ok(true)` once everything is delivered.
  ///
  /// # Errors
  ///
  /// Returns a transport failure observed while draining.
  fn poll_complete(&mut self) -> Result<bool, TraceError> {
    Ok(true)
  }

  /// On-wire length contribution of a string field, excluding its prefix.
  fn str_len(&self, val: &str) -> usize;

  /// Whether the remote peer asked us to stop tracing since the last call.
  fn take_remote_stop(&mut self) -> bool {
    false
  }

  fn write_byte(&mut self, val: u8);

  fn write_int(&mut self, val: i32);

  fn write_str(&mut self, val: &str);
}

/// Binary sink over anything `Write`, flushing a fixed buffer to the
/// handle whenever the next record would overflow it.
#[derive(Debug)]
pub struct FileSink<W: Write> {
  buf: TraceBuffer,
  error: Option<io::Error>,
  out: W,
}

impl FileSink<File> {
  /// Open (truncating) the trace file at `path`.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be created.
  pub fn create(path: impl AsRef<Path>, capacity: usize) -> io::Result<Self> {
    Ok(Self::from_writer(File::create(path)?, capacity))
  }
}

impl<W: Write> FileSink<W> {
  fn flush_now(&mut self) {
    if self.error.is_none() {
      if let Err(err) = self.out.write_all(self.buf.filled()) {
        self.error = Some(err);
      }
    }
    self.buf.reset();
  }

  #[must_use]
  pub fn from_writer(out: W, capacity: usize) -> Self {
    Self {
      buf: TraceBuffer::with_capacity(capacity),
      error: None,
      out,
    }
  }

  /// Consume the sink, returning the underlying writer (tests).
  #[must_use]
  pub fn into_inner(self) -> W {
    self.out
  }

  #[must_use]
  pub fn new(out: W) -> Self {
    Self::from_writer(out, FILE_BUF_LEN)
  }
}

impl<W: Write> Sink for FileSink<W> {
  fn ensure_capacity(&mut self, next_record_len: usize) {
    if !self.buf.fits(next_record_len) {
      self.flush_now();
    }
  }

  fn end(&mut self) -> Result<EndOutcome, TraceError> {
    if !self.buf.is_empty() {
      self.flush_now();
    }
    if self.error.is_none() {
      if let Err(err) = self.out.flush() {
        self.error = Some(err);
      }
    }
    match self.error.take() {
      Some(err) => Err(TraceError::Io(err)),
      None => {
        tracing::info!("done writing trace");
        Ok(EndOutcome::Complete)
      }
    }
  }

  fn str_len(&self, val: &str) -> usize {
    utf16_byte_len(val)
  }

  fn write_byte(&mut self, val: u8) {
    self.buf.write_byte(val);
  }

  fn write_int(&mut self, val: i32) {
    self.buf.write_int(val);
  }

  fn write_str(&mut self, val: &str) {
    self.buf.write_str(val);
  }
}

/// Debug sink rendering every field as comma-separated text, for
/// human-diffable traces. Capacity accounting is in accumulated string
/// length rather than packed bytes.
#[derive(Debug)]
pub struct AsciiSink<W: Write> {
  capacity: usize,
  error: Option<io::Error>,
  out: W,
  text: String,
}

impl AsciiSink<File> {
  /// Open (truncating) the debug trace file at `path`.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be created.
  pub fn create(path: impl AsRef<Path>, capacity: usize) -> io::Result<Self> {
    Ok(Self::from_writer(File::create(path)?, capacity))
  }
}

impl<W: Write> AsciiSink<W> {
  fn flush_now(&mut self) {
    if self.error.is_none() {
      if let Err(err) = self.out.write_all(self.text.as_bytes()) {
        self.error = Some(err);
      }
    }
    self.text.clear();
  }

  #[must_use]
  pub fn from_writer(out: W, capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      error: None,
      out,
      text: String::new(),
    }
  }

  #[must_use]
  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write> Sink for AsciiSink<W> {
  fn ensure_capacity(&mut self, next_record_len: usize) {
    if self.text.len() + next_record_len > self.capacity {
      self.flush_now();
    }
  }

  fn end(&mut self) -> Result<EndOutcome, TraceError> {
    if !self.text.is_empty() {
      self.flush_now();
    }
    if self.error.is_none() {
      if let Err(err) = self.out.flush() {
        self.error = Some(err);
      }
    }
    match self.error.take() {
      Some(err) => Err(TraceError::Io(err)),
      None => {
        tracing::info!("done writing trace");
        Ok(EndOutcome::Complete)
      }
    }
  }

  fn str_len(&self, val: &str) -> usize {
    val.encode_utf16().count()
  }

  fn write_byte(&mut self, val: u8) {
    let _ = write!(self.text, "{val},");
  }

  fn write_int(&mut self, val: i32) {
    let _ = write!(self.text, "{val},");
  }

  fn write_str(&mut self, val: &str) {
    self.text.push_str(val);
    self.text.push(',');
  }
}
