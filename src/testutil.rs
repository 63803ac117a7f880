//! In-memory trace capture shared by unit tests.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::decode::decode_trace;
use crate::encoder::EventLog;
use crate::record::TraceRecord;
use crate::sink::{FileSink, Sink};

struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }

  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.borrow_mut().extend_from_slice(buf);
    Ok(buf.len())
  }
}

/// Shared byte store a sink writes into and a test reads back.
#[derive(Clone, Default)]
pub struct CaptureBuf {
  data: Rc<RefCell<Vec<u8>>>,
}

impl CaptureBuf {
  #[must_use]
  pub fn bytes(&self) -> Vec<u8> {
    self.data.borrow().clone()
  }

  pub fn new() -> Self {
    Self::default()
  }

  /// Decode what has been flushed so far; end the log first.
  #[must_use]
  pub fn records(&self) -> Vec<TraceRecord> {
    decode_trace(&self.bytes()).expect("captured trace decodes")
  }

  #[must_use]
  pub fn sink(&self) -> Box<dyn Sink> {
    Box::new(FileSink::from_writer(SharedBuf(Rc::clone(&self.data)), 4096))
  }
}

/// An [`EventLog`] writing into memory, decodable once finished.
pub struct CaptureLog {
  buf: CaptureBuf,
  log: EventLog,
}

impl CaptureLog {
  /// Finish the log and return the raw encoded bytes.
  pub fn bytes(mut self) -> Vec<u8> {
    self.log.end().expect("in-memory sink cannot fail");
    self.buf.bytes()
  }

  pub fn log(&mut self) -> &mut EventLog {
    &mut self.log
  }

  pub fn new() -> Self {
    let buf = CaptureBuf::new();
    let log = EventLog::new(buf.sink());
    Self { buf, log }
  }

  /// Finish the log and decode everything it wrote.
  pub fn records(self) -> Vec<TraceRecord> {
    let bytes = self.bytes();
    decode_trace(&bytes).expect("captured trace decodes")
  }
}
