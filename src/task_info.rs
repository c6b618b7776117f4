use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Per-worker telemetry: who the worker last ran, for how long, the worst
/// case so far and the total invocation count. Queried for admin display
/// through [`PoolManager::admin_infos`](crate::PoolManager::admin_infos).
pub struct TaskInfo {
  which: usize,
  inner: RwLock<InfoInner>,
}

struct InfoInner {
  idle: bool,
  begin: Instant,
  caller: String,
  elapse: Duration,
  max_elapse: Duration,
  max_caller: String,
  total: u64,
}

/// A point-in-time copy of one worker's [`TaskInfo`].
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
  pub which: usize,
  pub idle: bool,
  pub caller: String,
  pub elapse: Duration,
  pub max_elapse: Duration,
  pub max_caller: String,
  pub total: u64,
}

impl TaskInfo {
  pub(crate) fn new(which: usize) -> Arc<Self> {
    Arc::new(Self {
      which,
      inner: RwLock::new(InfoInner {
        idle: true,
        begin: Instant::now(),
        caller: String::new(),
        elapse: Duration::ZERO,
        max_elapse: Duration::ZERO,
        max_caller: String::new(),
        total: 0,
      }),
    })
  }

  pub(crate) fn prepare(&self, caller: &str) {
    let mut inner = self.inner.write();
    inner.idle = false;
    inner.begin = Instant::now();
    inner.caller = caller.to_string();
  }

  pub(crate) fn completed(&self) {
    let mut inner = self.inner.write();
    inner.elapse = inner.begin.elapsed();
    if inner.max_elapse < inner.elapse {
      inner.max_elapse = inner.elapse;
      inner.max_caller = inner.caller.clone();
    }
    inner.total += 1;
    inner.idle = true;
  }

  pub fn snapshot(&self) -> TaskSnapshot {
    let inner = self.inner.read();
    TaskSnapshot {
      which: self.which,
      idle: inner.idle,
      caller: inner.caller.clone(),
      elapse: inner.elapse,
      max_elapse: inner.max_elapse,
      max_caller: inner.max_caller.clone(),
      total: inner.total,
    }
  }
}
