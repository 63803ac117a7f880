use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Built-in operations the tracer models instead of tracing through.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum NativeOp {
  AddEventListener,
  ClearInterval,
  ClearTimeout,
  Concat,
  DefineProperty,
  InsertAdjacentHtml,
  Pop,
  Push,
  RemoveEventListener,
  SetInterval,
  SetTimeout,
  Shift,
  Splice,
  Unshift,
}

/// A runtime value as the tracer sees it. Only `Obj` values carry
/// identity; everything else is a primitive.
#[derive(Debug, Clone)]
pub enum Value {
  Bool(bool),
  Number(f64),
  Obj(ObjRef),
  Str(Rc<str>),
  Undefined,
}

impl Value {
  #[must_use]
  pub fn as_obj(&self) -> Option<&ObjRef> {
    match self {
      Self::Obj(obj) => Some(obj),
      _ => None,
    }
  }

  #[must_use]
  pub fn is_object(&self) -> bool {
    matches!(self, Self::Obj(_))
  }

  #[must_use]
  pub fn str(val: &str) -> Self {
    Self::Str(Rc::from(val))
  }
}

/// A named property slot.
#[derive(Debug, Clone)]
pub enum Prop {
  Accessor {
    get: Option<ObjRef>,
    set: Option<ObjRef>,
  },
  Data(Value),
}

#[derive(Debug)]
pub struct FunctionData {
  pub enter_iid: i32,
  pub name: Rc<str>,
  pub prototype: RefCell<Option<ObjRef>>,
}

#[derive(Debug, Default)]
pub struct NodeData {
  pub children: RefCell<Vec<ObjRef>>,
  /// Set once the node has been reported through a DOM traversal.
  pub observed: Cell<bool>,
  pub parent: RefCell<Option<WeakObjRef>>,
}

/// Shape-specific payload of a host object.
#[derive(Debug)]
pub enum ObjectData {
  Array(RefCell<Vec<Value>>),
  Function(FunctionData),
  Native(NativeOp),
  Node(NodeData),
  Plain,
}

/// One object in the host program.
///
/// `meta` is the tracer's per-object word: the low 31 bits hold the
/// assigned object id (0 while unassigned), the high bit flags a
/// constructor receiver whose creation site is still unresolved. The
/// hidden-slot identity store keeps the word here; the weak-table store
/// ignores it.
#[derive(Debug)]
pub struct HostObject {
  pub data: ObjectData,
  pub meta: Cell<u32>,
  /// Call site recorded by a native-method model for objects the native
  /// allocates, consumed when the result first needs an id.
  pub native_iid: Cell<Option<i32>>,
  pub props: RefCell<BTreeMap<String, Prop>>,
}

/// Shared handle to a [`HostObject`].
#[derive(Debug, Clone)]
pub struct ObjRef(Rc<HostObject>);

/// Non-owning handle, used by the weak-table identity store.
#[derive(Debug, Clone)]
pub struct WeakObjRef(Weak<HostObject>);

impl WeakObjRef {
  #[must_use]
  pub fn upgrade(&self) -> Option<ObjRef> {
    self.0.upgrade().map(ObjRef)
  }
}

impl ObjRef {
  /// Stable address of the object while this handle (or any clone) lives.
  #[must_use]
  pub fn addr(&self) -> usize {
    Rc::as_ptr(&self.0) as usize
  }

  /// Append `child` to a DOM node's child list and point it back at us.
  ///
  /// # Panics
  ///
  /// Panics if either side is not a DOM node.
  pub fn append_child(&self, child: &ObjRef) {
    let node = self.node_data();
    node.children.borrow_mut().push(child.clone());
    *child.node_data().parent.borrow_mut() = Some(self.downgrade());
  }

  #[must_use]
  pub fn array(elems: Vec<Value>) -> Self {
    Self::with_data(ObjectData::Array(RefCell::new(elems)))
  }

  #[must_use]
  pub fn array_data(&self) -> &RefCell<Vec<Value>> {
    match &self.0.data {
      ObjectData::Array(elems) => elems,
      _ => panic!("not an array object"),
    }
  }

  #[must_use]
  pub fn downgrade(&self) -> WeakObjRef {
    WeakObjRef(Rc::downgrade(&self.0))
  }

  #[must_use]
  pub fn function(enter_iid: i32, name: &str) -> Self {
    let fun = Self::with_data(ObjectData::Function(FunctionData {
      enter_iid,
      name: Rc::from(name),
      prototype: RefCell::new(None),
    }));
    let proto = Self::plain();
    *fun.function_data().prototype.borrow_mut() = Some(proto);
    fun
  }

  #[must_use]
  pub fn function_data(&self) -> &FunctionData {
    match &self.0.data {
      ObjectData::Function(data) => data,
      _ => panic!("not a function object"),
    }
  }

  #[must_use]
  pub fn get_prop(&self, name: &str) -> Option<Prop> {
    self.0.props.borrow().get(name).cloned()
  }

  #[must_use]
  pub fn is_array(&self) -> bool {
    matches!(self.0.data, ObjectData::Array(_))
  }

  #[must_use]
  pub fn is_function(&self) -> bool {
    matches!(self.0.data, ObjectData::Function(_))
  }

  #[must_use]
  pub fn is_node(&self) -> bool {
    matches!(self.0.data, ObjectData::Node(_))
  }

  #[must_use]
  pub fn native(op: NativeOp) -> Self {
    Self::with_data(ObjectData::Native(op))
  }

  #[must_use]
  pub fn native_op(&self) -> Option<NativeOp> {
    match &self.0.data {
      ObjectData::Native(op) => Some(*op),
      _ => None,
    }
  }

  #[must_use]
  pub fn node(&self) -> &HostObject {
    &self.0
  }

  #[must_use]
  pub fn node_data(&self) -> &NodeData {
    match &self.0.data {
      ObjectData::Node(data) => data,
      _ => panic!("not a DOM node object"),
    }
  }

  #[must_use]
  pub fn plain() -> Self {
    Self::with_data(ObjectData::Plain)
  }

  #[must_use]
  pub fn ptr_eq(&self, other: &ObjRef) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  pub fn set_accessor(&self, name: &str, get: Option<ObjRef>, set: Option<ObjRef>) {
    self
      .0
      .props
      .borrow_mut()
      .insert(name.to_string(), Prop::Accessor { get, set });
  }

  pub fn set_prop(&self, name: &str, val: Value) {
    self
      .0
      .props
      .borrow_mut()
      .insert(name.to_string(), Prop::Data(val));
  }

  #[must_use]
  pub fn with_data(data: ObjectData) -> Self {
    Self(Rc::new(HostObject {
      data,
      meta: Cell::new(0),
      native_iid: Cell::new(None),
      props: RefCell::new(BTreeMap::new()),
    }))
  }
}

impl std::ops::Deref for ObjRef {
  type Target = HostObject;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

/// Make a DOM node object.
#[must_use]
pub fn dom_node() -> ObjRef {
  ObjRef::with_data(ObjectData::Node(NodeData::default()))
}
