use std::collections::HashMap;

use nohash_hasher::BuildNoHashHasher;

use crate::encoder::EventLog;

#[derive(Debug, Clone, Copy)]
struct LastUseEntry {
  iid: i32,
  time: i32,
}

/// Tracks the most recent use of each object id.
///
/// Uses are coalesced: only the latest (site, tick) per id is kept, and
/// everything pending is emitted in one batch at a flush checkpoint. Eager
/// mode trades trace size for precision and writes every use immediately.
pub struct LastUseTracker {
  eager: bool,
  pending: HashMap<u32, LastUseEntry, BuildNoHashHasher<u32>>,
}

impl LastUseTracker {
  /// Emit all coalesced uses, smallest id first, and forget them.
  pub fn flush(&mut self, log: &mut EventLog) {
    if self.pending.is_empty() {
      return;
    }
    let mut ids: Vec<u32> = self.pending.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
      let entry = self.pending[&id];
      // Still at the creation seed; the object was never used.
      if entry.time == -1 {
        continue;
      }
      log.log_last_use(id as i32, entry.time, entry.iid);
    }
    self.pending.clear();
  }

  #[must_use]
  pub fn new(eager: bool) -> Self {
    Self {
      eager,
      pending: HashMap::default(),
    }
  }

  #[must_use]
  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  /// Note a use of `obj_id` at `iid` on logical tick `time`.
  pub fn update(&mut self, obj_id: u32, iid: i32, time: i32, log: &mut EventLog) {
    if self.eager {
      log.log_last_use(obj_id as i32, time, iid);
    } else {
      self.pending.insert(obj_id, LastUseEntry { iid, time });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sink::FileSink;

  fn log() -> EventLog {
    EventLog::new(Box::new(FileSink::from_writer(Vec::new(), 1024)))
  }

  #[test]
  fn coalesces_repeated_uses_of_an_id() {
    let mut log = log();
    let mut lu = LastUseTracker::new(false);
    lu.update(4, 10, 0, &mut log);
    lu.update(4, 12, 3, &mut log);
    assert_eq!(lu.pending_len(), 1);
    assert_eq!(log.time(), -1);
  }

  #[test]
  fn flush_emits_everything_and_is_idempotent() {
    let mut log = log();
    let mut lu = LastUseTracker::new(false);
    lu.update(9, 10, 0, &mut log);
    lu.update(2, 11, 1, &mut log);
    lu.flush(&mut log);
    // Two records, smallest id first.
    assert_eq!(log.time(), 1);
    assert_eq!(lu.pending_len(), 0);
    lu.flush(&mut log);
    assert_eq!(log.time(), 1);
  }

  #[test]
  fn creation_seeds_are_not_flushed() {
    let mut log = log();
    let mut lu = LastUseTracker::new(false);
    lu.update(4, 10, -1, &mut log);
    lu.update(2, 11, 1, &mut log);
    lu.flush(&mut log);
    // Only the genuinely used id produced a record.
    assert_eq!(log.time(), 0);
    assert_eq!(lu.pending_len(), 0);
  }

  #[test]
  fn eager_mode_writes_each_use_immediately() {
    let mut log = log();
    let mut lu = LastUseTracker::new(true);
    lu.update(4, 10, 0, &mut log);
    lu.update(4, 12, 1, &mut log);
    assert_eq!(log.time(), 1);
    assert_eq!(lu.pending_len(), 0);
  }
}
