use crate::task::Task;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

/// Per-resource ordering record.
///
/// One `OrderData` exists per logical resource that wants sequenced
/// execution (a player, a room, a session...). Tasks gated on the resource
/// queue up in `works`; the head of the queue is the current owner and the
/// only task allowed to run. Delay-gated tasks park in `delays` until their
/// timer expires, at which point they join the tail of `works`.
///
/// Callers never drive an `OrderData` directly; barriers do, through the
/// crate-internal primitives below.
pub struct OrderData {
  works: Mutex<VecDeque<Arc<Task>>>,
  delays: Mutex<HashMap<u64, Arc<Task>>>,
  tag: String,
}

/// Implemented by resource types to expose their embedded ordering record
/// to [`make_barrier`](crate::make_barrier) and
/// [`delay_barrier`](crate::delay_barrier).
pub trait Sequenced {
  fn order_data(&self) -> Arc<OrderData>;
}

impl Sequenced for Arc<OrderData> {
  fn order_data(&self) -> Arc<OrderData> {
    self.clone()
  }
}

impl OrderData {
  /// Creates the ordering record for one resource.
  ///
  /// The `tag` is a debugging label that shows up in error logs when queue
  /// bookkeeping goes wrong.
  pub fn new(tag: impl Into<String>) -> Arc<Self> {
    Arc::new(Self {
      works: Mutex::new(VecDeque::new()),
      delays: Mutex::new(HashMap::new()),
      tag: tag.into(),
    })
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Number of tasks currently contending for this resource.
  pub fn queue_len(&self) -> usize {
    self.works.lock().len()
  }

  // Peek at the queue head, the current owner of the resource.
  pub(crate) fn head(&self) -> Option<Arc<Task>> {
    self.works.lock().front().cloned()
  }

  pub(crate) fn push(&self, task: &Arc<Task>) {
    self.works.lock().push_back(task.clone());
  }

  /// Pops `task` off the head and wakes the next live contender.
  ///
  /// Logs an error and leaves the queue untouched when `task` is not the
  /// head; that guards against a double-complete corrupting the FIFO.
  pub(crate) fn complete_head(&self, task: &Arc<Task>) {
    let next = {
      let mut works = self.works.lock();
      if !matches!(works.front(), Some(head) if head.id() == task.id()) {
        error!(
          tag = %self.tag,
          task_name = %task.name(),
          "OrderData: completed task is not the queue head."
        );
        return;
      }
      works.pop_front();
      // Cancelled tasks are left in place until they surface here; prune the
      // whole run so the queue cannot stall behind them. Reads the atomic
      // cancelled flag: task state locks must not be taken under the queue
      // lock.
      while matches!(works.front(), Some(head) if head.is_cancelled()) {
        if let Some(pruned) = works.pop_front() {
          trace!(
            tag = %self.tag,
            task_name = %pruned.name(),
            "OrderData: pruning cancelled task at head."
          );
        }
      }
      works.front().cloned()
    };
    // Reinvoke outside the queue lock; reinvoke takes the successor's state
    // lock and may call back into this OrderData.
    if let Some(next) = next {
      next.reinvoke();
    }
  }

  /// Cancellation path: only acts when `task` currently owns the head slot.
  /// A cancelled task further back stays queued and is pruned by
  /// `complete_head` when it reaches the front.
  pub(crate) fn cancel_head(&self, task: &Arc<Task>) {
    let is_head = matches!(self.works.lock().front(), Some(head) if head.id() == task.id());
    if is_head {
      self.complete_head(task);
    }
  }

  pub(crate) fn park_delayed(&self, task: &Arc<Task>) {
    self.delays.lock().insert(task.id(), task.clone());
  }

  /// Moves a delay-parked task into the contention queue, unless it was
  /// cancelled in the meantime (then it is only unparked).
  ///
  /// Safe to call at most once per parked task; a second call logs and
  /// returns, which is what serializes a racing timer-expiry and cancel.
  pub(crate) fn expire_delayed(&self, task: &Arc<Task>) {
    if self.delays.lock().remove(&task.id()).is_none() {
      error!(
        tag = %self.tag,
        task_name = %task.name(),
        "OrderData: expired task not found in delay set."
      );
      return;
    }
    if task.is_cancelled() {
      return;
    }
    self.push(task);
  }
}

impl fmt::Debug for OrderData {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OrderData")
      .field("tag", &self.tag)
      .field("works", &self.works.lock().len())
      .field("delays", &self.delays.lock().len())
      .finish()
  }
}
