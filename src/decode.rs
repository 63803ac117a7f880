use crate::error::TraceError;
use crate::record::{FreeVarNames, RecordKind, TraceRecord};

struct Decoder<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Decoder<'a> {
  fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, pos: 0 }
  }

  fn read_byte(&mut self) -> Result<u8, TraceError> {
    let byte = *self
      .bytes
      .get(self.pos)
      .ok_or_else(|| TraceError::Malformed("record truncated".to_string()))?;
    self.pos += 1;
    Ok(byte)
  }

  fn read_int(&mut self) -> Result<i32, TraceError> {
    let end = self.pos + 4;
    let raw = self
      .bytes
      .get(self.pos..end)
      .ok_or_else(|| TraceError::Malformed("int field truncated".to_string()))?;
    self.pos = end;
    Ok(i32::from_be_bytes(raw.try_into().unwrap()))
  }

  fn read_record(&mut self) -> Result<TraceRecord, TraceError> {
    let byte = self.read_byte()?;
    let kind = RecordKind::from_byte(byte)
      .ok_or_else(|| TraceError::Malformed(format!("unknown record type {byte}")))?;
    Ok(match kind {
      RecordKind::Declare => TraceRecord::Declare {
        iid: self.read_int()?,
        name: self.read_str()?,
        obj_id: self.read_int()?,
      },
      RecordKind::CreateObj => TraceRecord::CreateObj {
        iid: self.read_int()?,
        obj_id: self.read_int()?,
      },
      RecordKind::CreateFun => TraceRecord::CreateFun {
        iid: self.read_int()?,
        fun_enter_iid: self.read_int()?,
        obj_id: self.read_int()?,
      },
      RecordKind::PutField => TraceRecord::PutField {
        iid: self.read_int()?,
        base_id: self.read_int()?,
        prop: self.read_str()?,
        val_id: self.read_int()?,
      },
      RecordKind::Write => TraceRecord::Write {
        iid: self.read_int()?,
        name: self.read_str()?,
        obj_id: self.read_int()?,
      },
      RecordKind::LastUse => TraceRecord::LastUse {
        obj_id: self.read_int()?,
        timestamp: self.read_int()?,
        iid: self.read_int()?,
      },
      RecordKind::FunctionEnter => TraceRecord::FunctionEnter {
        iid: self.read_int()?,
        fun_obj_id: self.read_int()?,
      },
      RecordKind::FunctionExit => TraceRecord::FunctionExit {
        iid: self.read_int()?,
      },
      RecordKind::TopLevelFlush => TraceRecord::TopLevelFlush {
        iid: self.read_int()?,
      },
      RecordKind::UpdateIid => TraceRecord::UpdateIid {
        obj_id: self.read_int()?,
        new_iid: self.read_int()?,
      },
      RecordKind::Debug => TraceRecord::Debug {
        call_iid: self.read_int()?,
        obj_id: self.read_int()?,
      },
      RecordKind::Return => TraceRecord::Return {
        obj_id: self.read_int()?,
      },
      RecordKind::CreateDomNode => TraceRecord::CreateDomNode {
        iid: self.read_int()?,
        obj_id: self.read_int()?,
      },
      RecordKind::AddDomChild => TraceRecord::AddDomChild {
        parent_id: self.read_int()?,
        child_id: self.read_int()?,
      },
      RecordKind::RemoveDomChild => TraceRecord::RemoveDomChild {
        parent_id: self.read_int()?,
        child_id: self.read_int()?,
      },
      RecordKind::AddToChildSet => TraceRecord::AddToChildSet {
        iid: self.read_int()?,
        parent_id: self.read_int()?,
        name: self.read_str()?,
        child_id: self.read_int()?,
      },
      RecordKind::RemoveFromChildSet => TraceRecord::RemoveFromChildSet {
        iid: self.read_int()?,
        parent_id: self.read_int()?,
        name: self.read_str()?,
        child_id: self.read_int()?,
      },
      RecordKind::DomRoot => TraceRecord::DomRoot {
        obj_id: self.read_int()?,
      },
      RecordKind::Call => TraceRecord::Call {
        iid: self.read_int()?,
        fun_obj_id: self.read_int()?,
        fun_enter_iid: self.read_int()?,
      },
      RecordKind::ScriptEnter => TraceRecord::ScriptEnter {
        iid: self.read_int()?,
        filename: self.read_str()?,
      },
      RecordKind::ScriptExit => TraceRecord::ScriptExit {
        iid: self.read_int()?,
      },
      RecordKind::FreeVars => {
        let iid = self.read_int()?;
        let count = self.read_int()?;
        let names = if count == -1 {
          FreeVarNames::Unconstrained(self.read_str()?)
        } else if count < 0 {
          return Err(TraceError::Malformed(format!(
            "negative free-variable count {count}"
          )));
        } else {
          let mut names = Vec::with_capacity(count as usize);
          for _ in 0..count {
            names.push(self.read_str()?);
          }
          FreeVarNames::Names(names)
        };
        TraceRecord::FreeVars { iid, names }
      }
      RecordKind::SourceMapping => TraceRecord::SourceMapping {
        iid: self.read_int()?,
        filename: self.read_str()?,
        start_line: self.read_int()?,
        start_col: self.read_int()?,
      },
    })
  }

  fn read_str(&mut self) -> Result<String, TraceError> {
    let byte_len = self.read_int()?;
    if byte_len < 0 || byte_len % 2 != 0 {
      return Err(TraceError::Malformed(format!(
        "bad string byte length {byte_len}"
      )));
    }
    let end = self.pos + byte_len as usize;
    let raw = self
      .bytes
      .get(self.pos..end)
      .ok_or_else(|| TraceError::Malformed("string field truncated".to_string()))?;
    self.pos = end;
    let units: Vec<u16> = raw
      .chunks_exact(2)
      .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
      .collect();
    String::from_utf16(&units)
      .map_err(|_| TraceError::Malformed("string field is not valid UTF-16".to_string()))
  }
}

/// Decode a complete binary trace.
///
/// # Errors
///
/// Returns an error on an unknown type byte, a truncated record, or a
/// string field that is not valid UTF-16.
pub fn decode_trace(bytes: &[u8]) -> Result<Vec<TraceRecord>, TraceError> {
  let mut decoder = Decoder::new(bytes);
  let mut records = Vec::new();
  while decoder.pos < bytes.len() {
    records.push(decoder.read_record()?);
  }
  Ok(records)
}

/// Decode as much of a possibly-truncated trace as parses cleanly.
///
/// A trace cut off mid-stream (crashed host, severed link) is still
/// meaningful up to its last whole record; the error describing where
/// decoding stopped rides along.
#[must_use]
pub fn decode_trace_prefix(bytes: &[u8]) -> (Vec<TraceRecord>, Option<TraceError>) {
  let mut decoder = Decoder::new(bytes);
  let mut records = Vec::new();
  while decoder.pos < bytes.len() {
    let mark = decoder.pos;
    match decoder.read_record() {
      Ok(record) => records.push(record),
      Err(err) => {
        tracing::warn!(offset = mark, "trace decoding stopped early: {err}");
        return (records, Some(err));
      }
    }
  }
  (records, None)
}

/// Render records as line-delimited JSON arrays, type byte first.
#[must_use]
pub fn trace_to_json(records: &[TraceRecord]) -> String {
  let mut out = String::new();
  for record in records {
    // Serialization of these rows cannot fail.
    out.push_str(&serde_json::to_string(record).unwrap());
    out.push('\n');
  }
  out
}
