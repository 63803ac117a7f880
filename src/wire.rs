/// Buffer capacity used by the file-backed sink.
pub const FILE_BUF_LEN: usize = 65536;

/// Buffer capacity used by the socket-backed sink.
pub const SOCKET_BUF_LEN: usize = 64000;

/// Byte length of a string on the wire, excluding the 4-byte length prefix.
///
/// Strings are written as UTF-16 code units (two bytes each, low byte
/// first), so the length is twice the number of code units.
#[must_use]
pub fn utf16_byte_len(val: &str) -> usize {
  val.encode_utf16().count() * 2
}

/// Fixed-capacity byte buffer holding encoded records between flushes.
///
/// Writers never grow the buffer; the owning sink checks that the next
/// record fits (and flushes first if not) before any field is written, so
/// a flush can never split a record.
#[derive(Debug)]
pub struct TraceBuffer {
  bytes: Box<[u8]>,
  offset: usize,
}

impl TraceBuffer {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.bytes.len()
  }

  /// The filled region, ready to be handed to the transport.
  #[must_use]
  pub fn filled(&self) -> &[u8] {
    &self.bytes[..self.offset]
  }

  /// Whether a record of `len` bytes fits without a flush.
  #[must_use]
  pub fn fits(&self, len: usize) -> bool {
    self.offset + len <= self.bytes.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.offset == 0
  }

  #[must_use]
  pub fn offset(&self) -> usize {
    self.offset
  }

  pub fn reset(&mut self) {
    self.offset = 0;
  }

  #[must_use]
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      bytes: vec![0u8; capacity.max(1)].into_boxed_slice(),
      offset: 0,
    }
  }

  pub fn write_byte(&mut self, val: u8) {
    self.bytes[self.offset] = val;
    self.offset += 1;
  }

  /// 32-bit big-endian signed integer.
  pub fn write_int(&mut self, val: i32) {
    let offset = self.offset;
    self.bytes[offset..offset + 4].copy_from_slice(&val.to_be_bytes());
    self.offset = offset + 4;
  }

  /// Length-prefixed string: big-endian byte length, then UTF-16 code
  /// units with the low byte first.
  pub fn write_str(&mut self, val: &str) {
    let byte_len = utf16_byte_len(val);
    self.write_int(byte_len as i32);
    let mut offset = self.offset;
    for unit in val.encode_utf16() {
      let [lo, hi] = unit.to_le_bytes();
      self.bytes[offset] = lo;
      self.bytes[offset + 1] = hi;
      offset += 2;
    }
    self.offset = offset;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_big_endian_ints() {
    let mut buf = TraceBuffer::with_capacity(16);
    buf.write_int(0x0102_0304);
    buf.write_int(-1);
    assert_eq!(
      buf.filled(),
      &[0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF]
    );
  }

  #[test]
  fn writes_length_prefixed_utf16_strings() {
    let mut buf = TraceBuffer::with_capacity(16);
    buf.write_str("ab");
    assert_eq!(buf.filled(), &[0, 0, 0, 4, b'a', 0, b'b', 0]);
  }

  #[test]
  fn handles_non_ascii_code_units() {
    let mut buf = TraceBuffer::with_capacity(16);
    buf.write_str("é");
    assert_eq!(buf.filled(), &[0, 0, 0, 2, 0xE9, 0x00]);
  }

  #[test]
  fn surrogate_pairs_count_as_two_units() {
    assert_eq!(utf16_byte_len("𝄞"), 4);
    let mut buf = TraceBuffer::with_capacity(16);
    buf.write_str("𝄞");
    assert_eq!(buf.offset(), 4 + 4);
  }

  #[test]
  fn reset_reclaims_the_whole_buffer() {
    let mut buf = TraceBuffer::with_capacity(8);
    buf.write_int(7);
    assert!(!buf.fits(8));
    buf.reset();
    assert!(buf.fits(8));
    assert!(buf.is_empty());
  }
}
