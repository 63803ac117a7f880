//! Core library entry point for the memory-behavior tracer.
//!
//! The goal of this crate is to record how a managed program builds up,
//! connects, and abandons its heap: every object creation, reference
//! store, call, and last use becomes a record in a compact binary trace
//! that downstream tooling replays to find leaks and stale structure.

mod analysis;
mod config;
mod decode;
mod encoder;
mod error;
mod flush;
mod host;
mod identity;
mod last_use;
mod models;
mod record;
mod sink;
mod socket;
#[cfg(test)]
mod testutil;
mod wire;

pub use {
  analysis::{CodeInfo, LoggingAnalysis},
  config::{TracerConfig, Transport},
  decode::{decode_trace, decode_trace_prefix, trace_to_json},
  encoder::EventLog,
  error::TraceError,
  flush::FlushCoordinator,
  host::{
    dom_node, FunctionData, HostObject, NativeOp, NodeData, ObjRef, ObjectData, Prop, Value,
    WeakObjRef,
  },
  identity::{
    extract_obj_id, is_unannotated_this, HiddenSlotStore, IdentityStore, ObjIdManager,
    WeakTableStore, GLOBAL_OBJ_ID,
  },
  last_use::LastUseTracker,
  models::{ModelCtx, NativeModels},
  record::{FreeVarNames, RecordKind, TraceRecord, IID_INIT_DOM_TRAVERSAL, IID_UNKNOWN},
  sink::{AsciiSink, EndOutcome, FileSink, Sink},
  socket::{LinkEvent, SocketSink, TcpTransport, Transport as LinkTransport},
  wire::{utf16_byte_len, TraceBuffer, FILE_BUF_LEN, SOCKET_BUF_LEN},
};
