use std::collections::HashMap;

use nohash_hasher::BuildNoHashHasher;

use crate::encoder::EventLog;
use crate::host::{NativeOp, ObjRef, Prop, Value};
use crate::identity::ObjIdManager;
use crate::last_use::LastUseTracker;
use crate::record::{IID_INIT_DOM_TRAVERSAL, IID_UNKNOWN};

/// Mutable tracer state a model is allowed to touch.
pub struct ModelCtx<'a> {
  pub ids: &'a mut ObjIdManager,
  pub last_use: &'a mut LastUseTracker,
  pub log: &'a mut EventLog,
}

impl ModelCtx<'_> {
  /// Id to record for a value landing in a slot: the object's id
  /// (assigned on first sight) or 0 for primitives.
  fn slot_id(&mut self, val: &Value, iid: i32) -> i32 {
    match val.as_obj() {
      Some(obj) => self
        .ids
        .find_or_create_id(obj, iid, false, self.log, self.last_use) as i32,
      None => 0,
    }
  }
}

#[derive(Debug)]
struct TimerBinding {
  fun_enter_iid: i32,
  name: String,
  repeating: bool,
}

/// Synthesizes trace records for built-ins the instrumentation cannot see
/// into.
///
/// Built-ins mutate heap structure natively, so each modeled operation
/// re-states its effect in ordinary records: array methods as put-fields
/// on the affected indices, timers as writes to synthetic global
/// bindings, listener registration as child-set edges, HTML insertion as
/// DOM-node creations. A call that does not match the expected shape is
/// skipped rather than guessed at.
#[derive(Default)]
pub struct NativeModels {
  callback_counter: u32,
  splice_old_len: Option<usize>,
  timers: HashMap<i32, TimerBinding, BuildNoHashHasher<i32>>,
}

impl NativeModels {
  fn bind_timer(
    &mut self,
    iid: i32,
    args: &[Value],
    result: &Value,
    repeating: bool,
    ctx: &mut ModelCtx<'_>,
  ) {
    let (Some(Value::Obj(callback)), Some(timer_id)) = (args.first(), number(result)) else {
      tracing::debug!(iid, "timer registration without callback and id; skipping model");
      return;
    };
    if !callback.is_function() {
      tracing::debug!(iid, "timer callback is not a function; skipping model");
      return;
    }
    let name = format!("~timer~global~{}", self.callback_counter);
    self.callback_counter += 1;
    let fun_id = ctx
      .ids
      .find_or_create_id(callback, iid, false, ctx.log, ctx.last_use);
    ctx.log.log_write(iid, &name, fun_id as i32);
    self.timers.insert(
      timer_id as i32,
      TimerBinding {
        fun_enter_iid: callback.function_data().enter_iid,
        name,
        repeating,
      },
    );
  }

  fn clear_timer(&mut self, iid: i32, args: &[Value], ctx: &mut ModelCtx<'_>) {
    let Some(timer_id) = args.first().and_then(number) else {
      return;
    };
    if let Some(binding) = self.timers.remove(&(timer_id as i32)) {
      ctx.log.log_write(iid, &binding.name, 0);
    }
  }

  /// Assign ids to every unidentified node in `node`'s subtree.
  ///
  /// Used for HTML insertion: the resulting nodes are only reachable
  /// through their parent, so no child edges are recorded here.
  pub fn create_descendants(&mut self, iid: i32, node: &ObjRef, ctx: &mut ModelCtx<'_>) {
    for child in node.node_data().children.borrow().iter() {
      if !ctx.ids.has_metadata(child) {
        let _ = ctx
          .ids
          .find_or_create_id(child, iid, false, ctx.log, ctx.last_use);
      }
      self.create_descendants(iid, child, ctx);
    }
  }

  fn define_property(&mut self, iid: i32, args: &[Value], ctx: &mut ModelCtx<'_>) {
    let (Some(Value::Obj(base)), Some(Value::Str(prop)), Some(Value::Obj(descriptor))) =
      (args.first(), args.get(1), args.get(2))
    else {
      tracing::debug!(iid, "unrecognized defineProperty call shape; skipping model");
      return;
    };
    let base_id = ctx
      .ids
      .find_or_create_id(base, iid, false, ctx.log, ctx.last_use) as i32;
    for (key, synthetic) in [("get", "~get~"), ("set", "~set~")] {
      if let Some(Prop::Data(val)) = descriptor.get_prop(key) {
        let fun_id = ctx.slot_id(&val, iid);
        if fun_id != 0 {
          ctx
            .log
            .log_put_field(iid, base_id, &format!("{synthetic}{prop}"), fun_id);
        }
      }
    }
    if let Some(Prop::Data(val)) = descriptor.get_prop("value") {
      let val_id = ctx.slot_id(&val, iid);
      ctx.log.log_put_field(iid, base_id, prop, val_id);
    }
  }

  /// Report a DOM mutation: `added` and `removed` children of `parent`.
  /// Subtrees entering the document for the first time are walked so every
  /// node in them has an id and a child edge.
  pub fn dom_mutation(
    &mut self,
    iid: i32,
    parent: &ObjRef,
    added: &[ObjRef],
    removed: &[ObjRef],
    ctx: &mut ModelCtx<'_>,
  ) {
    let parent_id = ctx
      .ids
      .find_or_create_id(parent, iid, false, ctx.log, ctx.last_use) as i32;
    for child in added {
      let child_id = ctx
        .ids
        .find_or_create_id(child, iid, false, ctx.log, ctx.last_use) as i32;
      ctx.log.log_add_dom_child(parent_id, child_id);
      if !child.node_data().observed.get() {
        self.dom_walk(iid, child, ctx);
      }
    }
    for child in removed {
      let child_id = ctx
        .ids
        .find_or_create_id(child, iid, false, ctx.log, ctx.last_use) as i32;
      ctx.log.log_remove_dom_child(parent_id, child_id);
    }
    ctx.log.request_checkpoint(iid);
  }

  /// Walk an unobserved subtree, assigning ids and recording child edges.
  ///
  /// # Panics
  ///
  /// Panics if `node` was already walked; callers check `observed` first.
  pub fn dom_walk(&mut self, iid: i32, node: &ObjRef, ctx: &mut ModelCtx<'_>) {
    let data = node.node_data();
    assert!(!data.observed.get(), "DOM node walked twice");
    data.observed.set(true);
    let node_id = ctx
      .ids
      .find_or_create_id(node, iid, false, ctx.log, ctx.last_use) as i32;
    for child in data.children.borrow().iter() {
      let child_id = ctx
        .ids
        .find_or_create_id(child, iid, false, ctx.log, ctx.last_use) as i32;
      ctx.log.log_add_dom_child(node_id, child_id);
      if !child.node_data().observed.get() {
        self.dom_walk(iid, child, ctx);
      }
    }
  }

  /// The document finished loading: root the document object, name its
  /// root element, and walk the whole tree.
  pub fn document_loaded(&mut self, document: &ObjRef, ctx: &mut ModelCtx<'_>) {
    let iid = IID_INIT_DOM_TRAVERSAL;
    let doc_id = ctx
      .ids
      .find_or_create_id(document, iid, false, ctx.log, ctx.last_use) as i32;
    ctx.log.log_write(iid, "document", doc_id);
    self.dom_walk(iid, document, ctx);
    let root = document.node_data().children.borrow().first().cloned();
    if let Some(root) = root {
      let root_id = ctx.ids.find_existing_id(&root) as i32;
      ctx.log.log_put_field(iid, doc_id, "documentElement", root_id);
      ctx.log.log_dom_root(root_id);
    }
    ctx.log.request_checkpoint(iid);
  }

  fn event_listener(
    &mut self,
    iid: i32,
    base: Option<&ObjRef>,
    args: &[Value],
    add: bool,
    ctx: &mut ModelCtx<'_>,
  ) {
    let (Some(base), Some(Value::Str(kind)), Some(Value::Obj(listener))) =
      (base, args.first(), args.get(1))
    else {
      tracing::debug!(iid, "unrecognized event listener call shape; skipping model");
      return;
    };
    let base_id = ctx
      .ids
      .find_or_create_id(base, iid, false, ctx.log, ctx.last_use) as i32;
    let listener_id = ctx
      .ids
      .find_or_create_id(listener, iid, false, ctx.log, ctx.last_use) as i32;
    let name = format!("~event~{kind}");
    if add {
      ctx.log.log_add_to_child_set(iid, base_id, &name, listener_id);
    } else {
      ctx
        .log
        .log_remove_from_child_set(iid, base_id, &name, listener_id);
    }
  }

  /// Model a native call after it ran. Returns whether the call matched a
  /// known model.
  pub fn model_invoke_fun(
    &mut self,
    iid: i32,
    op: NativeOp,
    base: Option<&ObjRef>,
    args: &[Value],
    result: &Value,
    ctx: &mut ModelCtx<'_>,
  ) -> bool {
    match op {
      NativeOp::AddEventListener => self.event_listener(iid, base, args, true, ctx),
      NativeOp::ClearInterval | NativeOp::ClearTimeout => self.clear_timer(iid, args, ctx),
      NativeOp::Concat => self.model_concat(iid, result, ctx),
      NativeOp::DefineProperty => self.define_property(iid, args, ctx),
      NativeOp::InsertAdjacentHtml => {
        if let Some(base) = base.filter(|b| b.is_node()) {
          self.create_descendants(iid, base, ctx);
        }
      }
      NativeOp::Pop => self.model_pop(iid, base, ctx),
      NativeOp::Push => self.model_push(iid, base, args, ctx),
      NativeOp::RemoveEventListener => self.event_listener(iid, base, args, false, ctx),
      NativeOp::SetInterval => self.bind_timer(iid, args, result, true, ctx),
      NativeOp::SetTimeout => self.bind_timer(iid, args, result, false, ctx),
      NativeOp::Shift => self.rescan_array(iid, base, 1, ctx),
      NativeOp::Splice => self.model_splice(iid, base, result, ctx),
      NativeOp::Unshift => self.rescan_array(iid, base, 0, ctx),
    }
    true
  }

  /// Model bookkeeping before a native call runs.
  pub fn model_invoke_fun_pre(&mut self, op: NativeOp, base: Option<&ObjRef>) {
    if op == NativeOp::Splice {
      self.splice_old_len = base
        .filter(|b| b.is_array())
        .map(|b| b.array_data().borrow().len());
    }
  }

  /// Model a put-field the instrumentation saw but cannot decompose,
  /// currently `innerHTML`. Returns whether the write was modeled.
  pub fn model_put_field(
    &mut self,
    iid: i32,
    base: &ObjRef,
    prop: &str,
    ctx: &mut ModelCtx<'_>,
  ) -> bool {
    if prop == "innerHTML" && base.is_node() {
      self.create_descendants(iid, base, ctx);
      return true;
    }
    false
  }

  fn model_concat(&mut self, iid: i32, result: &Value, ctx: &mut ModelCtx<'_>) {
    let Some(result) = result.as_obj().filter(|r| r.is_array()) else {
      return;
    };
    let result_id = ctx
      .ids
      .find_or_create_id(result, iid, false, ctx.log, ctx.last_use) as i32;
    for (ind, elem) in result.array_data().borrow().iter().enumerate() {
      if let Some(obj) = elem.as_obj() {
        let elem_id = ctx
          .ids
          .find_or_create_id(obj, iid, false, ctx.log, ctx.last_use) as i32;
        ctx
          .log
          .log_put_field(iid, result_id, &ind.to_string(), elem_id);
      }
    }
  }

  fn model_pop(&mut self, iid: i32, base: Option<&ObjRef>, ctx: &mut ModelCtx<'_>) {
    let Some(base) = base.filter(|b| b.is_array()) else {
      return;
    };
    let base_id = ctx
      .ids
      .find_or_create_id(base, iid, false, ctx.log, ctx.last_use) as i32;
    let vacated = base.array_data().borrow().len();
    ctx
      .log
      .log_put_field(iid, base_id, &vacated.to_string(), 0);
  }

  fn model_push(&mut self, iid: i32, base: Option<&ObjRef>, args: &[Value], ctx: &mut ModelCtx<'_>) {
    let Some(base) = base.filter(|b| b.is_array()) else {
      return;
    };
    let len = base.array_data().borrow().len();
    if len < args.len() {
      tracing::debug!(iid, "array shorter than the pushed arguments; skipping model");
      return;
    }
    let base_id = ctx
      .ids
      .find_or_create_id(base, iid, false, ctx.log, ctx.last_use) as i32;
    for (i, arg) in args.iter().enumerate().rev() {
      let ind = len - args.len() + i;
      // Only already-identified objects; primitives move no references.
      if let Some(elem_id) = ctx.ids.find_id(arg) {
        ctx
          .log
          .log_put_field(iid, base_id, &ind.to_string(), elem_id as i32);
      }
    }
  }

  fn model_splice(&mut self, iid: i32, base: Option<&ObjRef>, result: &Value, ctx: &mut ModelCtx<'_>) {
    let old_len = self.splice_old_len.take();
    let Some(base) = base.filter(|b| b.is_array()) else {
      return;
    };
    self.rescan_array(iid, Some(base), 0, ctx);
    let base_id = ctx.ids.find_existing_id(base) as i32;
    let new_len = base.array_data().borrow().len();
    for ind in new_len..old_len.unwrap_or(new_len) {
      ctx.log.log_put_field(iid, base_id, &ind.to_string(), 0);
    }
    // Removed elements live on in the returned array.
    self.model_concat(iid, result, ctx);
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Re-state every slot of `base`, plus `extra_cleared` vacated slots
  /// past the end.
  fn rescan_array(
    &mut self,
    iid: i32,
    base: Option<&ObjRef>,
    extra_cleared: usize,
    ctx: &mut ModelCtx<'_>,
  ) {
    let Some(base) = base.filter(|b| b.is_array()) else {
      return;
    };
    let base_id = ctx
      .ids
      .find_or_create_id(base, iid, false, ctx.log, ctx.last_use) as i32;
    let elems: Vec<Value> = base.array_data().borrow().clone();
    for (ind, elem) in elems.iter().enumerate() {
      let elem_id = ctx.slot_id(elem, iid);
      ctx.log.log_put_field(iid, base_id, &ind.to_string(), elem_id);
    }
    for ind in elems.len()..elems.len() + extra_cleared {
      ctx.log.log_put_field(iid, base_id, &ind.to_string(), 0);
    }
  }

  /// The host ran the callback registered for `timer_id`. One-shot timers
  /// release their synthetic binding; either way a flush checkpoint is
  /// requested at the callback's entry site.
  pub fn timer_fired(&mut self, timer_id: i32, ctx: &mut ModelCtx<'_>) {
    let Some(binding) = self.timers.get(&timer_id) else {
      return;
    };
    let fun_enter_iid = binding.fun_enter_iid;
    if !binding.repeating {
      let binding = self.timers.remove(&timer_id).unwrap();
      ctx.log.log_write(IID_UNKNOWN, &binding.name, 0);
    }
    ctx.log.request_checkpoint(fun_enter_iid);
  }
}

fn number(val: &Value) -> Option<f64> {
  match val {
    Value::Number(n) => Some(*n),
    _ => None,
  }
}
