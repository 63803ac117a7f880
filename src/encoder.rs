use crate::error::TraceError;
use crate::record::{FreeVarNames, RecordKind};
use crate::sink::{EndOutcome, Sink};

/// Record writer owning the logical clock and the flush checkpoint.
///
/// Every record advances the clock by one tick. A pending checkpoint is
/// materialized lazily: the next record is preceded by a `TopLevelFlush`
/// record and the clock jumps by two, so the flush itself occupies a tick.
/// Metadata records (`FreeVars`, `SourceMapping`) give their tick back and
/// leave the clock unchanged.
pub struct EventLog {
  pending_flush: Option<i32>,
  sink: Box<dyn Sink>,
  stopped: bool,
  time: i32,
}

impl EventLog {
  fn before_log(&mut self) {
    match self.pending_flush.take() {
      Some(iid) => {
        self.sink.ensure_capacity(5);
        self.sink.write_byte(RecordKind::TopLevelFlush as u8);
        self.sink.write_int(iid);
        self.time += 2;
      }
      None => self.time += 1,
    }
  }

  /// Finish the trace, flushing everything still buffered.
  ///
  /// # Errors
  ///
  /// Returns the first transport failure observed while writing.
  pub fn end(&mut self) -> Result<EndOutcome, TraceError> {
    self.sink.end()
  }

  pub fn log_add_dom_child(&mut self, parent_id: i32, child_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::AddDomChild as u8);
    self.sink.write_int(parent_id);
    self.sink.write_int(child_id);
  }

  pub fn log_add_to_child_set(&mut self, iid: i32, parent_id: i32, name: &str, child_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(1 + 4 * 4 + self.sink.str_len(name));
    self.sink.write_byte(RecordKind::AddToChildSet as u8);
    self.sink.write_int(iid);
    self.sink.write_int(parent_id);
    self.sink.write_str(name);
    self.sink.write_int(child_id);
  }

  pub fn log_call(&mut self, iid: i32, fun_obj_id: i32, fun_enter_iid: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(13);
    self.sink.write_byte(RecordKind::Call as u8);
    self.sink.write_int(iid);
    self.sink.write_int(fun_obj_id);
    self.sink.write_int(fun_enter_iid);
  }

  pub fn log_create_dom_node(&mut self, iid: i32, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::CreateDomNode as u8);
    self.sink.write_int(iid);
    self.sink.write_int(obj_id);
  }

  /// The prototype object is not logged separately; its id is implicitly
  /// `obj_id + 1`.
  pub fn log_create_fun(&mut self, iid: i32, fun_enter_iid: i32, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(13);
    self.sink.write_byte(RecordKind::CreateFun as u8);
    self.sink.write_int(iid);
    self.sink.write_int(fun_enter_iid);
    self.sink.write_int(obj_id);
  }

  pub fn log_create_obj(&mut self, iid: i32, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::CreateObj as u8);
    self.sink.write_int(iid);
    self.sink.write_int(obj_id);
  }

  pub fn log_debug(&mut self, call_iid: i32, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::Debug as u8);
    self.sink.write_int(call_iid);
    self.sink.write_int(obj_id);
  }

  pub fn log_declare(&mut self, iid: i32, name: &str, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(1 + 3 * 4 + self.sink.str_len(name));
    self.sink.write_byte(RecordKind::Declare as u8);
    self.sink.write_int(iid);
    self.sink.write_str(name);
    self.sink.write_int(obj_id);
  }

  pub fn log_dom_root(&mut self, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(5);
    self.sink.write_byte(RecordKind::DomRoot as u8);
    self.sink.write_int(obj_id);
  }

  /// Metadata record; the logical clock is left where it was.
  pub fn log_free_vars(&mut self, iid: i32, names: &FreeVarNames) {
    if self.stopped {
      return;
    }
    self.before_log();
    match names {
      FreeVarNames::Unconstrained(marker) => {
        self
          .sink
          .ensure_capacity(1 + 3 * 4 + self.sink.str_len(marker));
        self.sink.write_byte(RecordKind::FreeVars as u8);
        self.sink.write_int(iid);
        self.sink.write_int(-1);
        self.sink.write_str(marker);
      }
      FreeVarNames::Names(list) => {
        let names_len: usize = list.iter().map(|n| 4 + self.sink.str_len(n)).sum();
        self.sink.ensure_capacity(1 + 2 * 4 + names_len);
        self.sink.write_byte(RecordKind::FreeVars as u8);
        self.sink.write_int(iid);
        self.sink.write_int(list.len() as i32);
        for name in list {
          self.sink.write_str(name);
        }
      }
    }
    self.time -= 1;
  }

  pub fn log_function_enter(&mut self, iid: i32, fun_obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::FunctionEnter as u8);
    self.sink.write_int(iid);
    self.sink.write_int(fun_obj_id);
  }

  pub fn log_function_exit(&mut self, iid: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(5);
    self.sink.write_byte(RecordKind::FunctionExit as u8);
    self.sink.write_int(iid);
  }

  /// `timestamp` is the tick captured when the use happened, not the
  /// current clock.
  pub fn log_last_use(&mut self, obj_id: i32, timestamp: i32, iid: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(13);
    self.sink.write_byte(RecordKind::LastUse as u8);
    self.sink.write_int(obj_id);
    self.sink.write_int(timestamp);
    self.sink.write_int(iid);
  }

  pub fn log_put_field(&mut self, iid: i32, base_id: i32, prop: &str, val_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(1 + 4 * 4 + self.sink.str_len(prop));
    self.sink.write_byte(RecordKind::PutField as u8);
    self.sink.write_int(iid);
    self.sink.write_int(base_id);
    self.sink.write_str(prop);
    self.sink.write_int(val_id);
  }

  pub fn log_remove_dom_child(&mut self, parent_id: i32, child_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::RemoveDomChild as u8);
    self.sink.write_int(parent_id);
    self.sink.write_int(child_id);
  }

  pub fn log_remove_from_child_set(
    &mut self,
    iid: i32,
    parent_id: i32,
    name: &str,
    child_id: i32,
  ) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(1 + 4 * 4 + self.sink.str_len(name));
    self.sink.write_byte(RecordKind::RemoveFromChildSet as u8);
    self.sink.write_int(iid);
    self.sink.write_int(parent_id);
    self.sink.write_str(name);
    self.sink.write_int(child_id);
  }

  pub fn log_return(&mut self, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(5);
    self.sink.write_byte(RecordKind::Return as u8);
    self.sink.write_int(obj_id);
  }

  pub fn log_script_enter(&mut self, iid: i32, filename: &str) {
    if self.stopped {
      return;
    }
    self.before_log();
    self
      .sink
      .ensure_capacity(1 + 2 * 4 + self.sink.str_len(filename));
    self.sink.write_byte(RecordKind::ScriptEnter as u8);
    self.sink.write_int(iid);
    self.sink.write_str(filename);
  }

  pub fn log_script_exit(&mut self, iid: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(5);
    self.sink.write_byte(RecordKind::ScriptExit as u8);
    self.sink.write_int(iid);
  }

  /// Metadata record; the logical clock is left where it was.
  pub fn log_source_mapping(&mut self, iid: i32, filename: &str, start_line: i32, start_col: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self
      .sink
      .ensure_capacity(1 + 4 * 4 + self.sink.str_len(filename));
    self.sink.write_byte(RecordKind::SourceMapping as u8);
    self.sink.write_int(iid);
    self.sink.write_str(filename);
    self.sink.write_int(start_line);
    self.sink.write_int(start_col);
    self.time -= 1;
  }

  pub fn log_update_iid(&mut self, obj_id: i32, new_iid: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(9);
    self.sink.write_byte(RecordKind::UpdateIid as u8);
    self.sink.write_int(obj_id);
    self.sink.write_int(new_iid);
  }

  pub fn log_write(&mut self, iid: i32, name: &str, obj_id: i32) {
    if self.stopped {
      return;
    }
    self.before_log();
    self.sink.ensure_capacity(1 + 3 * 4 + self.sink.str_len(name));
    self.sink.write_byte(RecordKind::Write as u8);
    self.sink.write_int(iid);
    self.sink.write_str(name);
    self.sink.write_int(obj_id);
  }

  #[must_use]
  pub fn new(sink: Box<dyn Sink>) -> Self {
    Self {
      pending_flush: None,
      sink,
      stopped: false,
      time: -1,
    }
  }

  #[must_use]
  pub fn checkpoint_pending(&self) -> bool {
    self.pending_flush.is_some()
  }

  /// Drive a draining sink after [`EventLog::end`] returned `Draining`.
  ///
  /// # Errors
  ///
  /// Returns a transport failure observed while draining.
  pub fn poll_complete(&mut self) -> Result<bool, TraceError> {
    self.sink.poll_complete()
  }

  /// Request a checkpoint if none is pending. Model code uses this form;
  /// a checkpoint already waiting keeps its original location.
  pub fn request_checkpoint(&mut self, iid: i32) {
    if self.pending_flush.is_none() {
      self.pending_flush = Some(iid);
    }
  }

  /// Arm the top-level checkpoint.
  ///
  /// # Panics
  ///
  /// Panics if a checkpoint is already pending; top-level expressions
  /// cannot nest, so a second arm before the flush record is written means
  /// the caller lost track of the clock.
  pub fn set_pending_checkpoint(&mut self, iid: i32) {
    assert!(
      self.pending_flush.is_none(),
      "checkpoint already pending at iid {}",
      self.pending_flush.unwrap_or(0)
    );
    self.pending_flush = Some(iid);
  }

  /// Drop all further records. The trace ends logically here even if the
  /// host keeps running.
  pub fn stop_tracing(&mut self) {
    self.stopped = true;
    tracing::info!(time = self.time, "tracing stopped");
  }

  #[must_use]
  pub fn stopped(&self) -> bool {
    self.stopped
  }

  #[must_use]
  pub fn take_remote_stop(&mut self) -> bool {
    self.sink.take_remote_stop()
  }

  /// Current logical tick; `-1` before the first record.
  #[must_use]
  pub fn time(&self) -> i32 {
    self.time
  }
}
