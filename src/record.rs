use serde::ser::{Serialize, SerializeSeq, Serializer};

/// Source location could not be determined.
pub const IID_UNKNOWN: i32 = -1;

/// Synthetic location for the initial DOM traversal.
pub const IID_INIT_DOM_TRAVERSAL: i32 = -2;

/// Type byte of each record kind, in wire order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum RecordKind {
  Declare = 0,
  CreateObj = 1,
  CreateFun = 2,
  PutField = 3,
  Write = 4,
  LastUse = 5,
  FunctionEnter = 6,
  FunctionExit = 7,
  TopLevelFlush = 8,
  UpdateIid = 9,
  Debug = 10,
  Return = 11,
  CreateDomNode = 12,
  AddDomChild = 13,
  RemoveDomChild = 14,
  AddToChildSet = 15,
  RemoveFromChildSet = 16,
  DomRoot = 17,
  Call = 18,
  ScriptEnter = 19,
  ScriptExit = 20,
  FreeVars = 21,
  SourceMapping = 22,
}

impl RecordKind {
  #[must_use]
  pub fn from_byte(byte: u8) -> Option<Self> {
    Some(match byte {
      0 => Self::Declare,
      1 => Self::CreateObj,
      2 => Self::CreateFun,
      3 => Self::PutField,
      4 => Self::Write,
      5 => Self::LastUse,
      6 => Self::FunctionEnter,
      7 => Self::FunctionExit,
      8 => Self::TopLevelFlush,
      9 => Self::UpdateIid,
      10 => Self::Debug,
      11 => Self::Return,
      12 => Self::CreateDomNode,
      13 => Self::AddDomChild,
      14 => Self::RemoveDomChild,
      15 => Self::AddToChildSet,
      16 => Self::RemoveFromChildSet,
      17 => Self::DomRoot,
      18 => Self::Call,
      19 => Self::ScriptEnter,
      20 => Self::ScriptExit,
      21 => Self::FreeVars,
      22 => Self::SourceMapping,
      _ => return None,
    })
  }
}

/// Free-variable set attached to a function body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FreeVarNames {
  /// A concrete list of names.
  Names(Vec<String>),
  /// The instrumentation could not bound the set (written as `-1` plus a
  /// marker string, conventionally `"ANY"`).
  Unconstrained(String),
}

/// One decoded trace record.
///
/// The encoder writes fields directly to its sink; this owned form exists
/// for the companion decoder and for round-trip tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord {
  Declare { iid: i32, name: String, obj_id: i32 },
  CreateObj { iid: i32, obj_id: i32 },
  /// The prototype object's id is implicitly `obj_id + 1`.
  CreateFun { iid: i32, fun_enter_iid: i32, obj_id: i32 },
  PutField { iid: i32, base_id: i32, prop: String, val_id: i32 },
  Write { iid: i32, name: String, obj_id: i32 },
  LastUse { obj_id: i32, timestamp: i32, iid: i32 },
  FunctionEnter { iid: i32, fun_obj_id: i32 },
  FunctionExit { iid: i32 },
  TopLevelFlush { iid: i32 },
  UpdateIid { obj_id: i32, new_iid: i32 },
  Debug { call_iid: i32, obj_id: i32 },
  Return { obj_id: i32 },
  CreateDomNode { iid: i32, obj_id: i32 },
  AddDomChild { parent_id: i32, child_id: i32 },
  RemoveDomChild { parent_id: i32, child_id: i32 },
  AddToChildSet { iid: i32, parent_id: i32, name: String, child_id: i32 },
  RemoveFromChildSet { iid: i32, parent_id: i32, name: String, child_id: i32 },
  DomRoot { obj_id: i32 },
  Call { iid: i32, fun_obj_id: i32, fun_enter_iid: i32 },
  ScriptEnter { iid: i32, filename: String },
  ScriptExit { iid: i32 },
  FreeVars { iid: i32, names: FreeVarNames },
  SourceMapping { iid: i32, filename: String, start_line: i32, start_col: i32 },
}

impl TraceRecord {
  #[must_use]
  pub fn kind(&self) -> RecordKind {
    match self {
      Self::Declare { .. } => RecordKind::Declare,
      Self::CreateObj { .. } => RecordKind::CreateObj,
      Self::CreateFun { .. } => RecordKind::CreateFun,
      Self::PutField { .. } => RecordKind::PutField,
      Self::Write { .. } => RecordKind::Write,
      Self::LastUse { .. } => RecordKind::LastUse,
      Self::FunctionEnter { .. } => RecordKind::FunctionEnter,
      Self::FunctionExit { .. } => RecordKind::FunctionExit,
      Self::TopLevelFlush { .. } => RecordKind::TopLevelFlush,
      Self::UpdateIid { .. } => RecordKind::UpdateIid,
      Self::Debug { .. } => RecordKind::Debug,
      Self::Return { .. } => RecordKind::Return,
      Self::CreateDomNode { .. } => RecordKind::CreateDomNode,
      Self::AddDomChild { .. } => RecordKind::AddDomChild,
      Self::RemoveDomChild { .. } => RecordKind::RemoveDomChild,
      Self::AddToChildSet { .. } => RecordKind::AddToChildSet,
      Self::RemoveFromChildSet { .. } => RecordKind::RemoveFromChildSet,
      Self::DomRoot { .. } => RecordKind::DomRoot,
      Self::Call { .. } => RecordKind::Call,
      Self::ScriptEnter { .. } => RecordKind::ScriptEnter,
      Self::ScriptExit { .. } => RecordKind::ScriptExit,
      Self::FreeVars { .. } => RecordKind::FreeVars,
      Self::SourceMapping { .. } => RecordKind::SourceMapping,
    }
  }
}

/// Serializes as one JSON array per record, type byte first, matching the
/// readable dump format of the trace parser.
impl Serialize for TraceRecord {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut seq = serializer.serialize_seq(None)?;
    seq.serialize_element(&(self.kind() as u8))?;
    match self {
      Self::Declare { iid, name, obj_id } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(name)?;
        seq.serialize_element(obj_id)?;
      }
      Self::CreateObj { iid, obj_id } | Self::CreateDomNode { iid, obj_id } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(obj_id)?;
      }
      Self::CreateFun {
        iid,
        fun_enter_iid,
        obj_id,
      } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(fun_enter_iid)?;
        seq.serialize_element(obj_id)?;
      }
      Self::PutField {
        iid,
        base_id,
        prop,
        val_id,
      } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(base_id)?;
        seq.serialize_element(prop)?;
        seq.serialize_element(val_id)?;
      }
      Self::Write { iid, name, obj_id } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(name)?;
        seq.serialize_element(obj_id)?;
      }
      Self::LastUse {
        obj_id,
        timestamp,
        iid,
      } => {
        seq.serialize_element(obj_id)?;
        seq.serialize_element(timestamp)?;
        seq.serialize_element(iid)?;
      }
      Self::FunctionEnter { iid, fun_obj_id } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(fun_obj_id)?;
      }
      Self::FunctionExit { iid }
      | Self::TopLevelFlush { iid }
      | Self::ScriptExit { iid } => {
        seq.serialize_element(iid)?;
      }
      Self::UpdateIid { obj_id, new_iid } => {
        seq.serialize_element(obj_id)?;
        seq.serialize_element(new_iid)?;
      }
      Self::Debug { call_iid, obj_id } => {
        seq.serialize_element(call_iid)?;
        seq.serialize_element(obj_id)?;
      }
      Self::Return { obj_id } | Self::DomRoot { obj_id } => {
        seq.serialize_element(obj_id)?;
      }
      Self::AddDomChild {
        parent_id,
        child_id,
      }
      | Self::RemoveDomChild {
        parent_id,
        child_id,
      } => {
        seq.serialize_element(parent_id)?;
        seq.serialize_element(child_id)?;
      }
      Self::AddToChildSet {
        iid,
        parent_id,
        name,
        child_id,
      }
      | Self::RemoveFromChildSet {
        iid,
        parent_id,
        name,
        child_id,
      } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(parent_id)?;
        seq.serialize_element(name)?;
        seq.serialize_element(child_id)?;
      }
      Self::Call {
        iid,
        fun_obj_id,
        fun_enter_iid,
      } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(fun_obj_id)?;
        seq.serialize_element(fun_enter_iid)?;
      }
      Self::ScriptEnter { iid, filename } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(filename)?;
      }
      Self::FreeVars { iid, names } => {
        seq.serialize_element(iid)?;
        match names {
          FreeVarNames::Unconstrained(marker) => {
            seq.serialize_element(marker)?;
          }
          FreeVarNames::Names(list) => {
            seq.serialize_element(list)?;
          }
        }
      }
      Self::SourceMapping {
        iid,
        filename,
        start_line,
        start_col,
      } => {
        seq.serialize_element(iid)?;
        seq.serialize_element(filename)?;
        seq.serialize_element(start_line)?;
        seq.serialize_element(start_col)?;
      }
    }
    seq.end()
  }
}
