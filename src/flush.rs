use std::collections::HashSet;

use nohash_hasher::BuildNoHashHasher;

use crate::encoder::EventLog;
use crate::identity::ObjIdManager;

/// Decides where flush checkpoints go.
///
/// The instrumentation reports which source locations are top-level
/// expressions; whenever the program reaches one with no checkpoint
/// already armed, the next record gets a `TopLevelFlush` in front of it.
/// Native call-site hints are only trustworthy within a checkpoint span,
/// so arming one also evicts them.
#[derive(Default)]
pub struct FlushCoordinator {
  top_level: HashSet<i32, BuildNoHashHasher<i32>>,
}

impl FlushCoordinator {
  #[must_use]
  pub fn is_top_level(&self, iid: i32) -> bool {
    self.top_level.contains(&iid)
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// The program reached location `iid`.
  pub fn observe(&mut self, iid: i32, log: &mut EventLog, ids: &mut ObjIdManager) {
    if !log.checkpoint_pending() && self.top_level.contains(&iid) {
      log.set_pending_checkpoint(iid);
      ids.evict_native_hints();
    }
  }

  pub fn register_top_level(&mut self, iid: i32) {
    self.top_level.insert(iid);
  }

  pub fn register_top_level_all(&mut self, iids: impl IntoIterator<Item = i32>) {
    for iid in iids {
      self.top_level.insert(iid);
    }
  }
}
