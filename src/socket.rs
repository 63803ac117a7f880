use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_queue::SegQueue;

use crate::error::TraceError;
use crate::sink::{EndOutcome, Sink};
use crate::wire::{utf16_byte_len, TraceBuffer};

/// Pending-queue depth past which we warn about unexpected backlog.
const QUEUE_WARN_LEN: usize = 64;

/// Notifications delivered by a transport's event source.
#[derive(Debug)]
pub enum LinkEvent {
  /// An earlier frame was acknowledged by the peer.
  Ack,
  /// The link is up and ready for frames.
  Connected,
  /// The link failed; no further frames will be delivered.
  Down(io::Error),
  /// The peer asked us to stop tracing.
  StopTracing,
}

/// Byte-frame transport under the socket sink.
///
/// The sink never blocks on the transport: sends hand a frame off, and
/// acknowledgements arrive later through [`Transport::poll_event`].
pub trait Transport {
  fn close(&mut self);

  fn poll_event(&mut self) -> Option<LinkEvent>;

  /// # Errors
  ///
  /// Returns an error if the frame cannot be handed to the link.
  fn send(&mut self, frame: &[u8]) -> Result<(), TraceError>;

  /// # Errors
  ///
  /// Returns an error if the control message cannot be handed to the link.
  fn send_control(&mut self, msg: &str) -> Result<(), TraceError>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LinkState {
  AwaitingAck,
  Closed,
  Idle,
}

/// Network sink keeping at most one frame in flight.
///
/// Flushes taken before the link is up pile into the pending queue and are
/// replayed, head first, once the `startup` control message is sent. Each
/// ack releases the next queued frame.
pub struct SocketSink<T: Transport> {
  buf: TraceBuffer,
  drained: bool,
  end_pending: bool,
  error: Option<TraceError>,
  pending: VecDeque<Vec<u8>>,
  remote_stop: bool,
  state: LinkState,
  transport: T,
}

impl<T: Transport> SocketSink<T> {
  fn fail(&mut self, err: TraceError) {
    if self.error.is_none() {
      self.error = Some(err);
    }
    self.state = LinkState::Closed;
    self.drained = true;
  }

  fn flush_now(&mut self) {
    if self.buf.is_empty() {
      return;
    }
    self.pending.push_back(self.buf.filled().to_vec());
    self.buf.reset();
    if self.pending.len() > QUEUE_WARN_LEN {
      tracing::warn!(
        queued = self.pending.len(),
        "trace backlog growing; peer is slow to ack"
      );
    }
    self.pump();
    self.send_next();
  }

  #[must_use]
  pub fn new(transport: T, capacity: usize) -> Self {
    Self {
      buf: TraceBuffer::with_capacity(capacity),
      drained: false,
      end_pending: false,
      error: None,
      pending: VecDeque::new(),
      remote_stop: false,
      state: LinkState::Closed,
      transport,
    }
  }

  #[must_use]
  pub fn pending_frames(&self) -> usize {
    self.pending.len()
  }

  fn pump(&mut self) {
    while let Some(event) = self.transport.poll_event() {
      match event {
        LinkEvent::Ack => {
          if self.state == LinkState::AwaitingAck {
            self.state = LinkState::Idle;
          }
          if self.pending.is_empty() {
            if self.end_pending && !self.drained {
              self.transport.close();
              self.state = LinkState::Closed;
              self.drained = true;
            }
          } else {
            self.send_next();
          }
        }
        LinkEvent::Connected => {
          if let Err(err) = self.transport.send_control("startup") {
            self.fail(err);
            return;
          }
          self.state = LinkState::Idle;
          self.send_next();
        }
        LinkEvent::Down(err) => {
          self.fail(TraceError::Io(err));
          return;
        }
        LinkEvent::StopTracing => self.remote_stop = true,
      }
    }
  }

  fn send_next(&mut self) {
    if self.state != LinkState::Idle {
      return;
    }
    if let Some(frame) = self.pending.pop_front() {
      match self.transport.send(&frame) {
        Ok(()) => self.state = LinkState::AwaitingAck,
        Err(err) => self.fail(err),
      }
    }
  }
}

impl<T: Transport> Sink for SocketSink<T> {
  fn ensure_capacity(&mut self, next_record_len: usize) {
    self.pump();
    if !self.buf.fits(next_record_len) {
      self.flush_now();
    }
  }

  fn end(&mut self) -> Result<EndOutcome, TraceError> {
    self.pump();
    if !self.buf.is_empty() {
      self.flush_now();
    }
    if let Some(err) = self.error.take() {
      return Err(err);
    }
    if self.pending.is_empty() && self.state != LinkState::AwaitingAck {
      if !self.drained {
        self.transport.close();
        self.drained = true;
      }
      self.state = LinkState::Closed;
      return Ok(EndOutcome::Complete);
    }
    self.end_pending = true;
    Ok(EndOutcome::Draining)
  }

  fn poll_complete(&mut self) -> Result<bool, TraceError> {
    self.pump();
    if let Some(err) = self.error.take() {
      return Err(err);
    }
    Ok(self.drained)
  }

  fn str_len(&self, val: &str) -> usize {
    utf16_byte_len(val)
  }

  fn take_remote_stop(&mut self) -> bool {
    self.pump();
    std::mem::take(&mut self.remote_stop)
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

const FRAME_CONTROL: u8 = 0;
const FRAME_TRACE: u8 = 1;

/// TCP transport: frames are `[kind: u8][len: u32 BE][payload]`. Peer
/// messages (`ack`, `endTracing`) arrive on a reader thread and are handed
/// to the single-threaded sink through a lock-free queue, so logging never
/// blocks on the network.
pub struct TcpTransport {
  events: Arc<SegQueue<LinkEvent>>,
  reader: Option<JoinHandle<()>>,
  stream: TcpStream,
}

impl TcpTransport {
  /// # Errors
  ///
  /// Returns an error if the connection cannot be established.
  pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
    let stream = TcpStream::connect(addr)?;
    let events = Arc::new(SegQueue::new());
    // The connect above is synchronous, so the link is usable right away;
    // queuing the event still drives the sink through its connected
    // transition like any other transport.
    events.push(LinkEvent::Connected);
    let reader_stream = stream.try_clone()?;
    let reader_events = Arc::clone(&events);
    let reader = thread::spawn(move || read_peer_messages(reader_stream, &reader_events));
    Ok(Self {
      events,
      reader: Some(reader),
      stream,
    })
  }

  fn send_frame(&mut self, kind: u8, payload: &[u8]) -> Result<(), TraceError> {
    let len = u32::try_from(payload.len())
      .map_err(|_| TraceError::Io(io::Error::other("frame too large")))?;
    self.stream.write_all(&[kind])?;
    self.stream.write_all(&len.to_be_bytes())?;
    self.stream.write_all(payload)?;
    Ok(())
  }
}

impl Transport for TcpTransport {
  fn close(&mut self) {
    let _ = self.stream.shutdown(Shutdown::Both);
    if let Some(handle) = self.reader.take() {
      let _ = handle.join();
    }
  }

  fn poll_event(&mut self) -> Option<LinkEvent> {
    self.events.pop()
  }

  fn send(&mut self, frame: &[u8]) -> Result<(), TraceError> {
    self.send_frame(FRAME_TRACE, frame)
  }

  fn send_control(&mut self, msg: &str) -> Result<(), TraceError> {
    self.send_frame(FRAME_CONTROL, msg.as_bytes())
  }
}

fn read_peer_messages(mut stream: TcpStream, events: &SegQueue<LinkEvent>) {
  loop {
    let mut len_buf = [0u8; 4];
    if let Err(err) = stream.read_exact(&mut len_buf) {
      if err.kind() != io::ErrorKind::UnexpectedEof {
        events.push(LinkEvent::Down(err));
      }
      return;
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if let Err(err) = stream.read_exact(&mut payload) {
      events.push(LinkEvent::Down(err));
      return;
    }
    match payload.as_slice() {
      b"ack" => events.push(LinkEvent::Ack),
      b"endTracing" => events.push(LinkEvent::StopTracing),
      other => {
        tracing::debug!(len = other.len(), "ignoring unknown peer message");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::rc::Rc;

  #[derive(Default)]
  struct Script {
    closed: bool,
    controls: Vec<String>,
    events: VecDeque<LinkEvent>,
    sent: Vec<Vec<u8>>,
  }

  #[derive(Clone, Default)]
  struct MockTransport {
    script: Rc<RefCell<Script>>,
  }

  impl MockTransport {
    fn push(&self, event: LinkEvent) {
      self.script.borrow_mut().events.push_back(event);
    }

    fn sent_count(&self) -> usize {
      self.script.borrow().sent.len()
    }
  }

  impl Transport for MockTransport {
    fn close(&mut self) {
      self.script.borrow_mut().closed = true;
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
      self.script.borrow_mut().events.pop_front()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TraceError> {
      self.script.borrow_mut().sent.push(frame.to_vec());
      Ok(())
    }

    fn send_control(&mut self, msg: &str) -> Result<(), TraceError> {
      self.script.borrow_mut().controls.push(msg.to_string());
      Ok(())
    }
  }

  fn fill(sink: &mut SocketSink<MockTransport>, bytes: usize) {
    for _ in 0..bytes {
      sink.ensure_capacity(1);
      sink.write_byte(0xAB);
    }
  }

  #[test]
  fn buffers_flushes_until_connected() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 4);
    fill(&mut sink, 9); // two overflows -> two queued frames
    assert_eq!(handle.sent_count(), 0);
    assert_eq!(sink.pending_frames(), 2);

    handle.push(LinkEvent::Connected);
    sink.ensure_capacity(1);
    assert_eq!(handle.script.borrow().controls, vec!["startup".to_string()]);
    // Only the head frame goes out; the rest waits for an ack.
    assert_eq!(handle.sent_count(), 1);
  }

  #[test]
  fn keeps_exactly_one_frame_in_flight() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 4);
    handle.push(LinkEvent::Connected);
    fill(&mut sink, 13); // three queued frames
    assert_eq!(handle.sent_count(), 1);

    handle.push(LinkEvent::Ack);
    sink.ensure_capacity(1);
    assert_eq!(handle.sent_count(), 2);

    handle.push(LinkEvent::Ack);
    handle.push(LinkEvent::Ack);
    sink.ensure_capacity(1);
    assert_eq!(handle.sent_count(), 3);
  }

  #[test]
  fn end_defers_until_queue_drains() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 4);
    handle.push(LinkEvent::Connected);
    fill(&mut sink, 6);
    assert!(matches!(sink.end(), Ok(EndOutcome::Draining)));
    assert!(!handle.script.borrow().closed);

    handle.push(LinkEvent::Ack); // releases the tail frame
    assert!(matches!(sink.poll_complete(), Ok(false)));
    handle.push(LinkEvent::Ack);
    assert!(matches!(sink.poll_complete(), Ok(true)));
    assert!(handle.script.borrow().closed);
  }

  #[test]
  fn end_completes_immediately_when_nothing_queued() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 64);
    handle.push(LinkEvent::Connected);
    sink.ensure_capacity(1);
    sink.write_byte(1);
    assert!(matches!(sink.end(), Ok(EndOutcome::Draining)));
    handle.push(LinkEvent::Ack);
    assert!(matches!(sink.poll_complete(), Ok(true)));
  }

  #[test]
  fn surfaces_remote_stop_request() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 64);
    handle.push(LinkEvent::Connected);
    handle.push(LinkEvent::StopTracing);
    assert!(sink.take_remote_stop());
    assert!(!sink.take_remote_stop());
  }

  #[test]
  fn link_failure_surfaces_at_end() {
    let transport = MockTransport::default();
    let handle = transport.clone();
    let mut sink = SocketSink::new(transport, 4);
    handle.push(LinkEvent::Connected);
    handle.push(LinkEvent::Down(io::Error::other("reset")));
    fill(&mut sink, 5);
    assert!(matches!(sink.end(), Err(TraceError::Io(_))));
  }
}
