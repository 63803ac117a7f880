use std::collections::HashMap;

use nohash_hasher::BuildNoHashHasher;

use crate::encoder::EventLog;
use crate::host::{ObjRef, Value, WeakObjRef};
use crate::last_use::LastUseTracker;

/// Object id of the global object, assigned at startup.
pub const GLOBAL_OBJ_ID: u32 = 1;

const ID_MASK: u32 = 0x7FFF_FFFF;
const UNANNOTATED_THIS: u32 = 0x8000_0000;

#[must_use]
pub fn extract_obj_id(meta: u32) -> u32 {
  meta & ID_MASK
}

#[must_use]
pub fn is_unannotated_this(meta: u32) -> bool {
  meta & UNANNOTATED_THIS != 0
}

/// Storage backend for per-object metadata words and native call-site
/// hints.
///
/// Reads take `&mut self` so the weak-table backend can drop entries whose
/// object died and whose address may since have been recycled.
pub trait IdentityStore {
  /// Discard call-site hints recorded since the last checkpoint.
  fn evict_native_hints(&mut self);

  fn metadata(&mut self, obj: &ObjRef) -> Option<u32>;

  fn record_native_hint(&mut self, obj: &ObjRef, iid: i32);

  fn set_metadata(&mut self, obj: &ObjRef, meta: u32);

  fn take_native_hint(&mut self, obj: &ObjRef) -> Option<i32>;
}

/// Side-table backend keyed by object address, holding only weak handles
/// so the tracer never extends an object's lifetime.
#[derive(Default)]
pub struct WeakTableStore {
  hints: HashMap<usize, (WeakObjRef, i32), BuildNoHashHasher<usize>>,
  table: HashMap<usize, (WeakObjRef, u32), BuildNoHashHasher<usize>>,
}

impl IdentityStore for WeakTableStore {
  fn evict_native_hints(&mut self) {
    self.hints.clear();
    // Dead entries pin recycled addresses to stale ids; drop them while
    // we are here.
    self.table.retain(|_, (weak, _)| weak.upgrade().is_some());
  }

  fn metadata(&mut self, obj: &ObjRef) -> Option<u32> {
    let addr = obj.addr();
    match self.table.get(&addr) {
      Some((weak, meta)) if weak.upgrade().is_some() => return Some(*meta),
      Some(_) => {}
      None => return None,
    }
    // The object at this address died; a later allocation may have been
    // handed the same address.
    self.table.remove(&addr);
    None
  }

  fn record_native_hint(&mut self, obj: &ObjRef, iid: i32) {
    self.hints.insert(obj.addr(), (obj.downgrade(), iid));
  }

  fn set_metadata(&mut self, obj: &ObjRef, meta: u32) {
    self.table.insert(obj.addr(), (obj.downgrade(), meta));
  }

  fn take_native_hint(&mut self, obj: &ObjRef) -> Option<i32> {
    let (weak, iid) = self.hints.remove(&obj.addr())?;
    weak.upgrade().map(|_| iid)
  }
}

/// Backend storing the metadata word in a slot on the object itself.
/// Lookups are O(1) with no table to maintain, and hints never need
/// eviction because they die with the object.
#[derive(Default)]
pub struct HiddenSlotStore;

impl IdentityStore for HiddenSlotStore {
  fn evict_native_hints(&mut self) {}

  fn metadata(&mut self, obj: &ObjRef) -> Option<u32> {
    match obj.meta.get() {
      0 => None,
      meta => Some(meta),
    }
  }

  fn record_native_hint(&mut self, obj: &ObjRef, iid: i32) {
    obj.native_iid.set(Some(iid));
  }

  fn set_metadata(&mut self, obj: &ObjRef, meta: u32) {
    obj.meta.set(meta);
  }

  fn take_native_hint(&mut self, obj: &ObjRef) -> Option<i32> {
    obj.native_iid.take()
  }
}

/// Assigns and looks up object ids, logging a creation record the first
/// time an object is seen. Ids are monotonic and never reused.
pub struct ObjIdManager {
  id_counter: u32,
  store: Box<dyn IdentityStore>,
}

impl ObjIdManager {
  pub fn clear_unannotated_this(&mut self, obj: &ObjRef) {
    if let Some(meta) = self.store.metadata(obj) {
      self.store.set_metadata(obj, meta & ID_MASK);
    }
  }

  pub fn evict_native_hints(&mut self) {
    self.store.evict_native_hints();
  }

  /// Id of an object that must already have one.
  ///
  /// # Panics
  ///
  /// Panics if the object was never assigned an id; callers use this only
  /// on paths where a creation record is known to have been written.
  #[must_use]
  pub fn find_existing_id(&mut self, obj: &ObjRef) -> u32 {
    match self.store.metadata(obj) {
      Some(meta) => extract_obj_id(meta),
      None => panic!("object has no id but one was required here"),
    }
  }

  /// Id of `val` if it is an object that already has one.
  #[must_use]
  pub fn find_id(&mut self, val: &Value) -> Option<u32> {
    let obj = val.as_obj()?;
    self.store.metadata(obj).map(extract_obj_id)
  }

  /// Look up the object's id, assigning one (and logging the creation)
  /// on first sight.
  ///
  /// Function literals reserve two consecutive ids, the second for the
  /// prototype object; the trace encodes the prototype id implicitly.
  pub fn find_or_create_id(
    &mut self,
    obj: &ObjRef,
    iid: i32,
    is_literal: bool,
    log: &mut EventLog,
    last_use: &mut LastUseTracker,
  ) -> u32 {
    if let Some(meta) = self.store.metadata(obj) {
      return extract_obj_id(meta);
    }
    let site = self.store.take_native_hint(obj).unwrap_or(iid);
    let id = self.next_id();
    self.store.set_metadata(obj, id);
    if obj.is_function() && is_literal {
      let proto_id = self.next_id();
      let proto = obj.function_data().prototype.borrow().clone();
      if let Some(proto) = proto {
        self.store.set_metadata(&proto, proto_id);
      }
      log.log_create_fun(site, obj.function_data().enter_iid, id as i32);
      last_use.update(proto_id, site, -1, log);
    } else if obj.is_node() {
      log.log_create_dom_node(site, id as i32);
    } else {
      log.log_create_obj(site, id as i32);
    }
    // Seed the last-use table so an object that is created and never
    // touched again still gets a LastUse row at flush.
    last_use.update(id, site, -1, log);
    id
  }

  #[must_use]
  pub fn has_metadata(&mut self, obj: &ObjRef) -> bool {
    self.store.metadata(obj).is_some()
  }

  #[must_use]
  pub fn is_unannotated_this(&mut self, obj: &ObjRef) -> bool {
    self.store.metadata(obj).is_some_and(is_unannotated_this)
  }

  /// Flag `obj` as a constructor receiver whose creation site will be
  /// patched by an `UpdateIid` record once known.
  pub fn mark_unannotated_this(&mut self, obj: &ObjRef) {
    if let Some(meta) = self.store.metadata(obj) {
      self.store.set_metadata(obj, meta | UNANNOTATED_THIS);
    }
  }

  #[must_use]
  pub fn new(store: Box<dyn IdentityStore>) -> Self {
    Self {
      id_counter: 0,
      store,
    }
  }

  fn next_id(&mut self) -> u32 {
    self.id_counter += 1;
    assert!(self.id_counter <= ID_MASK, "object id space exhausted");
    self.id_counter
  }

  pub fn record_native_hint(&mut self, obj: &ObjRef, iid: i32) {
    self.store.record_native_hint(obj, iid);
  }

  #[must_use]
  pub fn with_hidden_slots() -> Self {
    Self::new(Box::new(HiddenSlotStore))
  }

  #[must_use]
  pub fn with_weak_table() -> Self {
    Self::new(Box::<WeakTableStore>::default())
  }
}
