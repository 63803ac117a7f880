use crate::config::{TracerConfig, Transport};
use crate::encoder::EventLog;
use crate::error::TraceError;
use crate::flush::FlushCoordinator;
use crate::host::{ObjRef, Prop, Value};
use crate::identity::ObjIdManager;
use crate::last_use::LastUseTracker;
use crate::models::{ModelCtx, NativeModels};
use crate::record::{FreeVarNames, IID_UNKNOWN};
use crate::sink::{AsciiSink, EndOutcome, FileSink, Sink};
use crate::socket::{SocketSink, TcpTransport};
use crate::wire::{FILE_BUF_LEN, SOCKET_BUF_LEN};

/// Static facts about one instrumented compilation unit, reported before
/// any of its code runs.
#[derive(Debug, Default, Clone)]
pub struct CodeInfo {
  /// `(function enter iid, free variables of that function)`.
  pub free_vars: Vec<(i32, FreeVarNames)>,
  /// `(iid, filename, start line, start column)`.
  pub source_mappings: Vec<(i32, String, i32, i32)>,
  /// Locations that are top-level expression statements.
  pub top_level_iids: Vec<i32>,
}

/// The tracer front end: one callback per observable program event.
///
/// The host runtime drives these callbacks as the program executes; the
/// analysis turns them into trace records, assigns object identities,
/// coalesces last-use information, and decides where flush checkpoints
/// go. Single-threaded by construction, like the programs it observes.
pub struct LoggingAnalysis {
  debug_fun: Option<String>,
  done_logging: bool,
  /// Whether the current call got a `Call` record at its call site, so
  /// the callee's `FunctionEnter` is attributable.
  emitted_call: bool,
  flush: FlushCoordinator,
  ids: ObjIdManager,
  last_use: LastUseTracker,
  log: EventLog,
  log_all_putfields: bool,
  models: NativeModels,
  skip_putfield: Vec<bool>,
  /// Per call frame, the receiver that got flagged as an unannotated
  /// `this` on entry, if any.
  unannot_this: Vec<Option<ObjRef>>,
}

impl LoggingAnalysis {
  /// `delete base[prop]` and friends. Deletion clears the slot.
  pub fn binary(&mut self, iid: i32, op: &str, left: &Value, right: &Value) {
    if op == "delete" {
      if let (Some(base), Value::Str(prop)) = (left.as_obj(), right) {
        let base_id = self.value_id(&Value::Obj(base.clone()), iid, false);
        let prop = prop.to_string();
        self.log.log_put_field(iid, base_id, &prop, 0);
      }
    }
    self.handle_top_level(iid);
  }

  /// Conditional expression evaluated at `iid`.
  pub fn conditional(&mut self, iid: i32) {
    self.handle_top_level(iid);
  }

  fn ctx(&mut self) -> ModelCtx<'_> {
    ModelCtx {
      ids: &mut self.ids,
      last_use: &mut self.last_use,
      log: &mut self.log,
    }
  }

  /// Variable declaration. The callee-side `arguments` binding is noise.
  pub fn declare(&mut self, iid: i32, name: &str, val: &Value) {
    if name == "arguments" {
      return;
    }
    // Hoisted function declarations are the literal creation site.
    let obj_id = self.value_id(val, iid, true);
    self.log.log_declare(iid, name, obj_id);
  }

  /// The whole document became available; see
  /// [`NativeModels::document_loaded`].
  pub fn document_loaded(&mut self, document: &ObjRef) {
    let mut models = std::mem::take(&mut self.models);
    models.document_loaded(document, &mut self.ctx());
    self.models = models;
  }

  /// A batch of DOM mutations was observed under `parent`.
  pub fn dom_mutation(&mut self, iid: i32, parent: &ObjRef, added: &[ObjRef], removed: &[ObjRef]) {
    let mut models = std::mem::take(&mut self.models);
    models.dom_mutation(iid, parent, added, removed, &mut self.ctx());
    self.models = models;
  }

  /// The program is done. Flushes pending last-use entries and finishes
  /// the trace; a socket sink may still be draining afterwards.
  ///
  /// # Errors
  ///
  /// Returns the first transport failure observed during the run.
  pub fn end_execution(&mut self) -> Result<(), TraceError> {
    self.last_use.flush(&mut self.log);
    if self.log.end()? == EndOutcome::Complete {
      self.done_logging = true;
    }
    Ok(())
  }

  /// Function body entered.
  ///
  /// `this_obj` without an id yet means an uninstrumented constructor
  /// call allocated the receiver; it gets an id here and a corrected
  /// allocation site later, via `UpdateIid`, if the call turns out to be
  /// an instrumented `new`.
  pub fn function_enter(&mut self, iid: i32, fun: &ObjRef, this_obj: Option<&ObjRef>) {
    if self.emitted_call {
      // The call site already attributed this frame with a Call record.
      self.emitted_call = false;
    } else {
      // Entered from uninstrumented code (event dispatch, timers); no
      // invoke_fun follows, so the callee's last use is kept fresh here.
      let fun_id = self
        .ids
        .find_or_create_id(fun, iid, false, &mut self.log, &mut self.last_use);
      self.log.log_function_enter(iid, fun_id as i32);
      self.use_obj(fun, iid);
    }
    let mut fresh_receiver = None;
    if let Some(this_obj) = this_obj {
      if !self.ids.has_metadata(this_obj) {
        let _ = self.ids.find_or_create_id(
          this_obj,
          IID_UNKNOWN,
          false,
          &mut self.log,
          &mut self.last_use,
        );
        self.ids.mark_unannotated_this(this_obj);
        fresh_receiver = Some(this_obj.clone());
      }
      let this_id = self.ids.find_existing_id(this_obj) as i32;
      self.log.log_declare(iid, "this", this_id);
    }
    self.unannot_this.push(fresh_receiver);
  }

  /// Function body exited (return, fall-through, or throw). An object
  /// result gets a `Return` record so it stays rooted across the exit;
  /// a constructor body falling through without one gets a `Return` for
  /// its receiver instead.
  pub fn function_exit(&mut self, iid: i32, ret: &Value) {
    let mut logged_return = false;
    if let Some(obj) = ret.as_obj() {
      if self.ids.has_metadata(obj) {
        let ret_id = self.ids.find_existing_id(obj) as i32;
        self.log.log_return(ret_id);
        logged_return = true;
      }
    }
    if let Some(receiver) = self.unannot_this.pop().flatten() {
      if !logged_return {
        let receiver_id = self.ids.find_existing_id(&receiver) as i32;
        self.log.log_return(receiver_id);
      }
    }
    self.log.log_function_exit(iid);
  }

  /// Property read: `base[prop]` evaluated to `val`.
  pub fn get_field(&mut self, iid: i32, base: &ObjRef, _prop: &str, val: &Value) {
    self.use_obj(base, iid);
    self.use_value(val, iid);
    self.handle_top_level(iid);
  }

  fn handle_top_level(&mut self, iid: i32) {
    self.flush.observe(iid, &mut self.log, &mut self.ids);
    if self.log.take_remote_stop() {
      tracing::info!("peer requested end of tracing");
      self.last_use.flush(&mut self.log);
      self.log.stop_tracing();
    }
  }

  /// Static information about code that is about to run (a script or an
  /// `eval` body).
  pub fn instrument_code(&mut self, _eval_iid: i32, info: &CodeInfo) {
    self
      .flush
      .register_top_level_all(info.top_level_iids.iter().copied());
    for (iid, names) in &info.free_vars {
      self.log.log_free_vars(*iid, names);
    }
    for (iid, filename, line, col) in &info.source_mappings {
      self.log.log_source_mapping(*iid, filename, *line, *col);
    }
  }

  /// A call completed. Native calls get modeled here; constructor results
  /// get their allocation site patched.
  pub fn invoke_fun(
    &mut self,
    iid: i32,
    fun: &ObjRef,
    base: Option<&ObjRef>,
    args: &[Value],
    result: &Value,
    is_constructor: bool,
  ) {
    if let Some(obj) = result.as_obj() {
      if self.ids.has_metadata(obj) {
        if self.ids.is_unannotated_this(obj) {
          let obj_id = self.ids.find_existing_id(obj) as i32;
          if is_constructor {
            // Patch the receiver's creation site and expose the pointer
            // to the constructor's prototype.
            self.log.log_update_iid(obj_id, iid);
            if fun.is_function() {
              let proto = fun.function_data().prototype.borrow().clone();
              if let Some(proto) = proto {
                let proto_id = self.value_id(&Value::Obj(proto), iid, false);
                self.log.log_put_field(iid, obj_id, "__proto__", proto_id);
              }
            }
          }
          self.ids.clear_unannotated_this(obj);
        }
      } else {
        // An object allocated inside a native carries the call site as
        // its creation hint, in case an id is assigned later.
        self.ids.record_native_hint(obj, iid);
      }
    }
    if let Some(op) = fun.native_op() {
      let mut models = std::mem::take(&mut self.models);
      models.model_invoke_fun(iid, op, base, args, result, &mut self.ctx());
      self.models = models;
    }
    self.use_obj(fun, iid);
    self.handle_top_level(iid);
  }

  /// A call is about to run.
  pub fn invoke_fun_pre(&mut self, iid: i32, fun: &ObjRef, base: Option<&ObjRef>, args: &[Value]) {
    if fun.is_function() && self.is_debug_fun(fun) {
      for arg in args {
        let Some(obj) = arg.as_obj() else { continue };
        match self.ids.find_id(&Value::Obj(obj.clone())) {
          Some(id) => self.log.log_debug(iid, id as i32),
          None => panic!("missing metadata for argument to debug function"),
        }
      }
      return;
    }
    if let Some(op) = fun.native_op() {
      self.models.model_invoke_fun_pre(op, base);
    } else if fun.is_function() {
      // Only instrumented functions have a known body entry; modeled
      // natives never get a Call record.
      let fun_id = self
        .ids
        .find_id(&Value::Obj(fun.clone()))
        .map_or(-1, |id| id as i32);
      self
        .log
        .log_call(iid, fun_id, fun.function_data().enter_iid);
      self.emitted_call = true;
    }
    if let Some(base) = base {
      self.use_obj(base, iid);
    }
    for arg in args {
      self.use_value(arg, iid);
    }
  }

  fn is_debug_fun(&self, fun: &ObjRef) -> bool {
    match &self.debug_fun {
      Some(name) => fun.function_data().name.as_ref() == name.as_str(),
      None => false,
    }
  }

  /// A literal value was constructed at `iid`.
  ///
  /// Object literals record their object-valued own properties; accessor
  /// properties use the synthetic `~get~`/`~set~` names so getters and
  /// setters stay reachable in the trace.
  pub fn literal(&mut self, iid: i32, val: &Value) {
    let Some(obj) = val.as_obj() else {
      return;
    };
    let obj_id = self
      .ids
      .find_or_create_id(obj, iid, true, &mut self.log, &mut self.last_use) as i32;
    // Function literals get their edges from CreateFun; only plain
    // literals carry initialized properties worth walking.
    if !obj.is_function() {
      let props: Vec<(String, Prop)> = obj
        .props
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
      for (name, prop) in props {
        match prop {
          Prop::Accessor { get, set } => {
            for (fun, tag) in [(get, "~get~"), (set, "~set~")] {
              if let Some(fun) = fun {
                let synth = format!("{tag}{}", fun.function_data().name);
                let fun_id = self.value_id(&Value::Obj(fun), iid, true);
                self.log.log_put_field(iid, obj_id, &synth, fun_id);
              }
            }
          }
          Prop::Data(val) => {
            if val.is_object() {
              let val_id = self.value_id(&val, iid, true);
              self.log.log_put_field(iid, obj_id, &name, val_id);
            }
          }
        }
      }
    }
    self.handle_top_level(iid);
  }

  /// Open the configured transport and start a trace.
  ///
  /// # Errors
  ///
  /// Returns an error if the trace file cannot be created or the
  /// collector cannot be reached.
  pub fn new(config: &TracerConfig, global: ObjRef) -> Result<Self, TraceError> {
    let sink: Box<dyn Sink> = match &config.transport {
      Transport::Ascii(path) => Box::new(AsciiSink::create(
        path,
        config.buffer_capacity.unwrap_or(FILE_BUF_LEN),
      )?),
      Transport::File(path) => Box::new(FileSink::create(
        path,
        config.buffer_capacity.unwrap_or(FILE_BUF_LEN),
      )?),
      Transport::Socket(addr) => {
        let transport = TcpTransport::connect(addr.as_str())?;
        Box::new(SocketSink::new(
          transport,
          config.buffer_capacity.unwrap_or(SOCKET_BUF_LEN),
        ))
      }
    };
    tracing::info!(transport = ?config.transport, "tracing started");
    Ok(Self::with_sink(config, sink, global))
  }

  /// Drive a draining trace to completion; `Ok(true)` once everything
  /// reached the transport.
  ///
  /// # Errors
  ///
  /// Returns a transport failure observed while draining.
  pub fn poll_done(&mut self) -> Result<bool, TraceError> {
    if self.done_logging {
      return Ok(true);
    }
    if self.log.poll_complete()? {
      self.done_logging = true;
    }
    Ok(self.done_logging)
  }

  /// Property write completed: `base[prop] = val`.
  pub fn put_field(&mut self, iid: i32, base: &ObjRef, prop: &str, val: &Value) {
    let skip = self.skip_putfield.pop().unwrap_or(false);
    let mut models = std::mem::take(&mut self.models);
    let modeled = models.model_put_field(iid, base, prop, &mut self.ctx());
    self.models = models;
    if !modeled && !skip {
      let base_id = self.value_id(&Value::Obj(base.clone()), iid, false);
      let val_id = self.value_id(val, iid, false);
      self.log.log_put_field(iid, base_id, prop, val_id);
    }
    self.use_obj(base, iid);
    self.use_value(val, iid);
    self.handle_top_level(iid);
  }

  /// Property write about to happen; decides whether it is worth a
  /// record. Overwriting one primitive with another moves no object
  /// references, so it is skipped unless configured otherwise. Writes
  /// through an accessor land in the setter, not the named slot, so they
  /// are suppressed too.
  pub fn put_field_pre(&mut self, _iid: i32, base: &ObjRef, prop: &str, val: &Value) {
    let skip = match base.get_prop(prop) {
      Some(Prop::Accessor { .. }) => true,
      Some(Prop::Data(old)) => !self.log_all_putfields && !val.is_object() && !old.is_object(),
      None => false,
    };
    self.skip_putfield.push(skip);
  }

  /// Variable read.
  pub fn read(&mut self, iid: i32, _name: &str, val: &Value) {
    self.use_value(val, iid);
    self.handle_top_level(iid);
  }

  /// Script (compilation unit) entered.
  pub fn script_enter(&mut self, iid: i32, filename: &str) {
    self.log.log_script_enter(iid, filename);
  }

  /// Script exited.
  pub fn script_exit(&mut self, iid: i32) {
    self.log.log_script_exit(iid);
    self.handle_top_level(iid);
  }

  /// The host ran the callback registered under `timer_id`.
  pub fn timer_fired(&mut self, timer_id: i32) {
    let mut models = std::mem::take(&mut self.models);
    models.timer_fired(timer_id, &mut self.ctx());
    self.models = models;
  }

  /// Unary expression evaluated at `iid`.
  pub fn unary(&mut self, iid: i32) {
    self.handle_top_level(iid);
  }

  fn use_obj(&mut self, obj: &ObjRef, iid: i32) {
    if let Some(id) = self.ids.find_id(&Value::Obj(obj.clone())) {
      let time = self.log.time();
      self.last_use.update(id, iid, time, &mut self.log);
    }
  }

  fn use_value(&mut self, val: &Value, iid: i32) {
    if let Some(obj) = val.as_obj() {
      self.use_obj(obj, iid);
    }
  }

  fn value_id(&mut self, val: &Value, iid: i32, is_literal: bool) -> i32 {
    match val.as_obj() {
      Some(obj) => {
        self
          .ids
          .find_or_create_id(obj, iid, is_literal, &mut self.log, &mut self.last_use) as i32
      }
      None => 0,
    }
  }

  /// Build an analysis over an already-open sink. The global object gets
  /// id 1, created at the unknown location.
  #[must_use]
  pub fn with_sink(config: &TracerConfig, sink: Box<dyn Sink>, global: ObjRef) -> Self {
    let mut analysis = Self {
      debug_fun: config.debug_fun.clone(),
      done_logging: false,
      emitted_call: false,
      flush: FlushCoordinator::new(),
      ids: if config.use_hidden_slot {
        ObjIdManager::with_hidden_slots()
      } else {
        ObjIdManager::with_weak_table()
      },
      last_use: LastUseTracker::new(config.all_uses),
      log: EventLog::new(sink),
      log_all_putfields: config.all_putfields,
      models: NativeModels::new(),
      skip_putfield: Vec::new(),
      unannot_this: Vec::new(),
    };
    let _ = analysis.ids.find_or_create_id(
      &global,
      IID_UNKNOWN,
      false,
      &mut analysis.log,
      &mut analysis.last_use,
    );
    analysis
  }

  /// Variable write: `name = val`, replacing `old_val`.
  ///
  /// # Panics
  ///
  /// Panics on an empty variable name; the instrumentation must always
  /// supply one.
  pub fn write(&mut self, iid: i32, name: &str, val: &Value, old_val: &Value) {
    assert!(!name.is_empty(), "variable write without a name");
    if val.is_object() {
      let obj_id = self.value_id(val, iid, false);
      self.log.log_write(iid, name, obj_id);
    } else if old_val.is_object() {
      // The write of 0 releases the old binding's reference.
      self.log.log_write(iid, name, 0);
    }
    self.handle_top_level(iid);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::{dom_node, NativeOp};
  use crate::identity::GLOBAL_OBJ_ID;
  use crate::record::{RecordKind, TraceRecord};
  use crate::testutil::CaptureBuf;

  struct Fixture {
    analysis: LoggingAnalysis,
    buf: CaptureBuf,
  }

  impl Fixture {
    fn new() -> Self {
      Self::with_config(TracerConfig::default())
    }

    fn records(mut self) -> Vec<TraceRecord> {
      self.analysis.end_execution().expect("end");
      self.buf.records()
    }

    fn with_config(config: TracerConfig) -> Self {
      let buf = CaptureBuf::new();
      let analysis = LoggingAnalysis::with_sink(&config, buf.sink(), ObjRef::plain());
      Self { analysis, buf }
    }
  }

  #[test]
  fn bootstrap_creates_the_global_object() {
    let records = Fixture::new().records();
    assert_eq!(
      records[0],
      TraceRecord::CreateObj {
        iid: IID_UNKNOWN,
        obj_id: GLOBAL_OBJ_ID as i32,
      }
    );
  }

  #[test]
  fn declare_skips_the_arguments_binding() {
    let mut fx = Fixture::new();
    fx.analysis.declare(3, "arguments", &Value::Undefined);
    fx.analysis.declare(4, "x", &Value::Number(1.0));
    let records = fx.records();
    let declares: Vec<_> = records
      .iter()
      .filter(|r| r.kind() == RecordKind::Declare)
      .collect();
    assert_eq!(declares.len(), 1);
  }

  #[test]
  fn primitive_overwrites_are_not_recorded() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    obj.set_prop("n", Value::Number(1.0));
    fx.analysis.put_field_pre(3, &obj, "n", &Value::Number(2.0));
    obj.set_prop("n", Value::Number(2.0));
    fx.analysis.put_field(3, &obj, "n", &Value::Number(2.0));
    let records = fx.records();
    assert!(!records.iter().any(|r| r.kind() == RecordKind::PutField));
  }

  #[test]
  fn object_stores_are_always_recorded() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    let val = Value::Obj(ObjRef::plain());
    fx.analysis.put_field_pre(3, &obj, "p", &val);
    obj.set_prop("p", val.clone());
    fx.analysis.put_field(3, &obj, "p", &val);
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, val_id, .. } if prop == "p" && *val_id > 0
    )));
  }

  #[test]
  fn all_putfields_mode_keeps_primitive_overwrites() {
    let mut fx = Fixture::with_config(TracerConfig::default().with_all_putfields());
    let obj = ObjRef::plain();
    obj.set_prop("n", Value::Number(1.0));
    fx.analysis.put_field_pre(3, &obj, "n", &Value::Number(2.0));
    fx.analysis.put_field(3, &obj, "n", &Value::Number(2.0));
    let records = fx.records();
    assert!(records.iter().any(|r| r.kind() == RecordKind::PutField));
  }

  #[test]
  fn primitive_variable_writes_are_not_logged() {
    let mut fx = Fixture::new();
    fx.analysis
      .write(3, "n", &Value::Number(1.0), &Value::Undefined);
    let records = fx.records();
    assert!(!records.iter().any(|r| r.kind() == RecordKind::Write));
  }

  #[test]
  fn overwriting_an_object_binding_releases_it() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(obj.clone()));
    fx.analysis
      .write(4, "x", &Value::Number(1.0), &Value::Obj(obj));
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::Write { iid: 4, name, obj_id: 0 } if name == "x"
    )));
  }

  #[test]
  fn top_level_writes_arm_a_flush() {
    let mut fx = Fixture::new();
    fx.analysis.instrument_code(
      0,
      &CodeInfo {
        top_level_iids: vec![3],
        ..CodeInfo::default()
      },
    );
    let obj = ObjRef::plain();
    fx.analysis
      .write(3, "x", &Value::Obj(obj.clone()), &Value::Undefined);
    fx.analysis.literal(4, &Value::Obj(ObjRef::plain()));
    let records = fx.records();
    assert!(records
      .iter()
      .any(|r| matches!(r, TraceRecord::TopLevelFlush { iid: 3 })));
  }

  #[test]
  fn top_level_literals_arm_a_flush() {
    let mut fx = Fixture::new();
    fx.analysis.instrument_code(
      0,
      &CodeInfo {
        top_level_iids: vec![3],
        ..CodeInfo::default()
      },
    );
    fx.analysis.literal(3, &Value::Obj(ObjRef::plain()));
    fx.analysis.literal(4, &Value::Obj(ObjRef::plain()));
    let records = fx.records();
    assert!(records
      .iter()
      .any(|r| matches!(r, TraceRecord::TopLevelFlush { iid: 3 })));
  }

  #[test]
  fn function_literal_properties_are_not_walked() {
    let mut fx = Fixture::new();
    let fun = ObjRef::function(40, "f");
    fun.set_prop("helper", Value::Obj(ObjRef::plain()));
    fx.analysis.literal(3, &Value::Obj(fun));
    let records = fx.records();
    assert!(records.iter().any(|r| r.kind() == RecordKind::CreateFun));
    assert!(!records.iter().any(|r| r.kind() == RecordKind::PutField));
  }

  #[test]
  fn literal_accessors_are_named_after_the_accessor_function() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    let getter = ObjRef::function(40, "getX");
    obj.set_accessor("x", Some(getter), None);
    fx.analysis.literal(3, &Value::Obj(obj));
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, val_id, .. } if prop == "~get~getX" && *val_id > 1
    )));
  }

  #[test]
  fn delete_clears_the_slot() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    fx.analysis
      .binary(3, "delete", &Value::Obj(obj), &Value::str("p"));
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, val_id: 0, .. } if prop == "p"
    )));
  }

  #[test]
  fn calls_record_the_site_and_suppress_the_enter() {
    let mut fx = Fixture::new();
    let fun = ObjRef::function(40, "f");
    fx.analysis.invoke_fun_pre(7, &fun, None, &[]);
    fx.analysis.function_enter(40, &fun, None);
    fx.analysis.function_exit(41, &Value::Undefined);
    fx.analysis
      .invoke_fun(7, &fun, None, &[], &Value::Undefined, false);
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::Call { iid: 7, fun_enter_iid: 40, .. }
    )));
    // The Call record already attributes the frame.
    assert!(!records.iter().any(|r| r.kind() == RecordKind::FunctionEnter));
    assert!(records.iter().any(|r| r.kind() == RecordKind::FunctionExit));
  }

  #[test]
  fn uninstrumented_entries_still_log_the_frame() {
    let mut fx = Fixture::new();
    let fun = ObjRef::function(40, "onTick");
    fx.analysis.function_enter(40, &fun, None);
    fx.analysis.function_exit(41, &Value::Undefined);
    let records = fx.records();
    assert!(records.iter().any(|r| r.kind() == RecordKind::FunctionEnter));
  }

  #[test]
  fn constructor_fall_through_roots_the_receiver() {
    let mut fx = Fixture::new();
    let ctor = ObjRef::function(40, "Point");
    let receiver = ObjRef::plain();
    fx.analysis.invoke_fun_pre(7, &ctor, None, &[]);
    fx.analysis.function_enter(40, &ctor, Some(&receiver));
    fx.analysis.function_exit(41, &Value::Undefined);
    let records = fx.records();
    let receiver_id = records
      .iter()
      .find_map(|r| match r {
        TraceRecord::CreateObj { iid: IID_UNKNOWN, obj_id } if *obj_id > 1 => Some(*obj_id),
        _ => None,
      })
      .expect("receiver creation");
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::Return { obj_id } if *obj_id == receiver_id
    )));
  }

  #[test]
  fn constructor_receivers_get_their_site_patched() {
    let mut fx = Fixture::new();
    let ctor = ObjRef::function(40, "Point");
    let receiver = ObjRef::plain();
    fx.analysis.invoke_fun_pre(7, &ctor, None, &[]);
    fx.analysis.function_enter(40, &ctor, Some(&receiver));
    fx.analysis
      .function_exit(41, &Value::Obj(receiver.clone()));
    fx.analysis
      .invoke_fun(7, &ctor, None, &[], &Value::Obj(receiver.clone()), true);
    let records = fx.records();
    // The receiver's creation is logged at the unknown site.
    let obj_id = records
      .iter()
      .find_map(|r| match r {
        TraceRecord::CreateObj { iid: IID_UNKNOWN, obj_id } if *obj_id > 1 => Some(*obj_id),
        _ => None,
      })
      .expect("receiver creation");
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::UpdateIid { obj_id: patched, new_iid: 7 } if *patched == obj_id
    )));
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, .. } if prop == "__proto__"
    )));
  }

  #[test]
  fn completed_calls_refresh_the_callee_last_use() {
    let mut fx = Fixture::new();
    let fun = ObjRef::function(40, "f");
    fx.analysis.literal(3, &Value::Obj(fun.clone()));
    fx.analysis.invoke_fun_pre(7, &fun, None, &[]);
    fx.analysis.function_enter(40, &fun, None);
    fx.analysis.function_exit(41, &Value::Undefined);
    fx.analysis
      .invoke_fun(7, &fun, None, &[], &Value::Undefined, false);
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::LastUse { obj_id: 2, iid: 7, .. }
    )));
  }

  #[test]
  fn plain_calls_clear_the_receiver_flag_without_patching() {
    let mut fx = Fixture::new();
    let fun = ObjRef::function(40, "f");
    let receiver = ObjRef::plain();
    fx.analysis.invoke_fun_pre(7, &fun, None, &[]);
    fx.analysis.function_enter(40, &fun, Some(&receiver));
    fx.analysis
      .function_exit(41, &Value::Obj(receiver.clone()));
    fx.analysis
      .invoke_fun(7, &fun, None, &[], &Value::Obj(receiver.clone()), false);
    // The flag is gone, so a later constructor-shaped call cannot patch
    // the site anymore.
    fx.analysis
      .invoke_fun(8, &fun, None, &[], &Value::Obj(receiver), true);
    let records = fx.records();
    assert!(!records.iter().any(|r| r.kind() == RecordKind::UpdateIid));
    assert!(!records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, .. } if prop == "__proto__"
    )));
  }

  #[test]
  fn debug_function_arguments_get_debug_records() {
    let mut fx = Fixture::with_config(TracerConfig::default().with_debug_fun("probe"));
    let probe = ObjRef::function(40, "probe");
    let obj = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(obj.clone()));
    fx.analysis
      .invoke_fun_pre(7, &probe, None, &[Value::Obj(obj)]);
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::Debug { call_iid: 7, obj_id } if *obj_id > 1
    )));
    // Debug probes never become Call records.
    assert!(!records.iter().any(|r| r.kind() == RecordKind::Call));
  }

  #[test]
  #[should_panic(expected = "missing metadata")]
  fn debug_function_requires_identified_arguments() {
    let mut fx = Fixture::with_config(TracerConfig::default().with_debug_fun("probe"));
    let probe = ObjRef::function(40, "probe");
    let never_seen = ObjRef::plain();
    fx.analysis
      .invoke_fun_pre(7, &probe, None, &[Value::Obj(never_seen)]);
  }

  #[test]
  fn top_level_expressions_arm_a_flush() {
    let mut fx = Fixture::new();
    fx.analysis.instrument_code(
      0,
      &CodeInfo {
        top_level_iids: vec![50],
        ..CodeInfo::default()
      },
    );
    let obj = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(obj.clone()));
    fx.analysis.read(50, "a", &Value::Obj(obj.clone()));
    fx.analysis.literal(4, &Value::Obj(ObjRef::plain()));
    let records = fx.records();
    let flush_pos = records
      .iter()
      .position(|r| matches!(r, TraceRecord::TopLevelFlush { iid: 50 }))
      .expect("flush record");
    // The flush precedes the record that followed the checkpoint.
    assert!(matches!(
      records[flush_pos + 1],
      TraceRecord::CreateObj { iid: 4, .. }
    ));
  }

  #[test]
  fn end_execution_flushes_coalesced_last_uses() {
    let mut fx = Fixture::new();
    let obj = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(obj.clone()));
    fx.analysis.read(9, "a", &Value::Obj(obj));
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::LastUse { iid: 9, .. }
    )));
  }

  #[test]
  fn eager_mode_logs_uses_immediately() {
    let mut fx = Fixture::with_config(TracerConfig::default().with_all_uses());
    let obj = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(obj.clone()));
    fx.analysis.read(9, "a", &Value::Obj(obj));
    let records = fx.records();
    let uses = records
      .iter()
      .filter(|r| r.kind() == RecordKind::LastUse)
      .count();
    // Creation seeds one use, the read adds another.
    assert!(uses >= 2);
  }

  #[test]
  fn native_array_calls_are_modeled() {
    let mut fx = Fixture::new();
    let push = ObjRef::native(NativeOp::Push);
    let elem = ObjRef::plain();
    fx.analysis.literal(3, &Value::Obj(elem.clone()));
    let arr = ObjRef::array(vec![Value::Number(1.0), Value::Obj(elem.clone())]);
    fx.analysis.literal(4, &Value::Obj(arr.clone()));
    fx.analysis
      .invoke_fun_pre(7, &push, Some(&arr), &[Value::Obj(elem.clone())]);
    fx.analysis.invoke_fun(
      7,
      &push,
      Some(&arr),
      &[Value::Obj(elem)],
      &Value::Number(2.0),
      false,
    );
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::PutField { prop, val_id, .. } if prop == "1" && *val_id > 1
    )));
    // Modeled natives never get a Call record.
    assert!(!records.iter().any(|r| r.kind() == RecordKind::Call));
  }

  #[test]
  fn mutation_events_walk_new_subtrees() {
    let mut fx = Fixture::new();
    let parent = dom_node();
    let child = dom_node();
    parent.append_child(&child);
    fx.analysis.dom_mutation(5, &parent, &[child], &[]);
    let records = fx.records();
    assert!(records.iter().any(|r| r.kind() == RecordKind::AddDomChild));
    assert!(records.iter().any(|r| r.kind() == RecordKind::CreateDomNode));
  }

  #[test]
  fn script_boundaries_are_recorded() {
    let mut fx = Fixture::new();
    fx.analysis.script_enter(1, "app.js");
    fx.analysis.script_exit(2);
    let records = fx.records();
    assert!(records.iter().any(|r| matches!(
      r,
      TraceRecord::ScriptEnter { filename, .. } if filename == "app.js"
    )));
    assert!(records.iter().any(|r| r.kind() == RecordKind::ScriptExit));
  }
}
