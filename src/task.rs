use crate::barrier::Barrier;
use crate::manager::PoolManager;
use crate::task_info::TaskInfo;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{error, info};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The type of future that the pool executes.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Life stages of a [`Task`].
///
/// `Invoked` is also the resting state of a finished task; the terminal
/// marker for a successful run is [`Task::is_completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  New,
  Blocked,
  Ready,
  Cancelled,
  Invoked,
}

/// A unit of work managed by the pool: a captured future plus an optional
/// ordering barrier, driven through a small state machine.
///
/// Tasks are created by [`PoolManager::send_work`] and shared between the
/// pool's queues and the barrier's per-resource FIFOs. The only public
/// operation is [`cancel`](Task::cancel).
pub struct Task {
  id: u64,
  name: String,
  which: AtomicI32,
  state: Mutex<TaskState>,
  // Mirror of state == Cancelled for readers that must not take the state
  // lock (queue pruning holds the OrderData lock).
  cancelled: AtomicBool,
  future: Mutex<Option<TaskFuture>>,
  barrier: Option<Arc<dyn Barrier>>,
  complete: AtomicBool,
  pool: Weak<PoolManager>,
}

impl Task {
  pub(crate) fn new(
    name: &str,
    future: TaskFuture,
    barrier: Option<Arc<dyn Barrier>>,
    pool: Weak<PoolManager>,
  ) -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      name: name.to_string(),
      which: AtomicI32::new(-1),
      state: Mutex::new(TaskState::New),
      cancelled: AtomicBool::new(false),
      future: Mutex::new(Some(future)),
      barrier,
      complete: AtomicBool::new(false),
      pool,
    })
  }

  /// Unique id of this task, process-wide.
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Index of the worker that last ran this task, or −1 before the first
  /// dispatch. Observational only.
  pub fn which(&self) -> i32 {
    self.which.load(AtomicOrdering::Relaxed)
  }

  pub fn state(&self) -> TaskState {
    *self.state.lock()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(AtomicOrdering::SeqCst)
  }

  /// Whether the task's handler ran to normal completion.
  pub fn is_completed(&self) -> bool {
    self.complete.load(AtomicOrdering::SeqCst)
  }

  pub(crate) fn pool(&self) -> Option<Arc<PoolManager>> {
    self.pool.upgrade()
  }

  /// Cancels a task that has not started executing.
  ///
  /// Only valid while the task is Blocked or Ready; any other state is a
  /// silent no-op. A cancelled task is never dispatched, and its barrier
  /// (if any) hands the resource to the next contender.
  pub fn cancel(self: &Arc<Self>) {
    let old = {
      let mut state = self.state.lock();
      match *state {
        TaskState::Blocked | TaskState::Ready => {
          let old = *state;
          *state = TaskState::Cancelled;
          self.cancelled.store(true, AtomicOrdering::SeqCst);
          old
        }
        _ => return,
      }
    };
    if old == TaskState::Blocked {
      if let Some(pool) = self.pool.upgrade() {
        pool.remove_block_work(self);
      }
    }
    // Barrier hooks run with the state lock released; a cancel cascade
    // reinvokes successors, which take their own state locks.
    if let Some(barrier) = &self.barrier {
      barrier.cancel(self);
    }
    info!(task_name = %self.name, task_id = %self.id, "Task cancelled.");
  }

  /// First transition after construction: sets up the barrier and lands in
  /// Ready or Blocked.
  ///
  /// The state lock is held across `setup` and the assignment so that a
  /// delay timer expiring immediately cannot observe the task mid-submit.
  pub(crate) fn submit(self: &Arc<Self>) {
    let Some(pool) = self.pool.upgrade() else {
      error!(task_name = %self.name, "Task: submit with no live pool.");
      return;
    };
    let mut state = self.state.lock();
    if *state != TaskState::New {
      error!(task_name = %self.name, state = ?*state, "Task: submit in wrong state.");
      return;
    }
    if let Some(barrier) = &self.barrier {
      barrier.setup(self);
    }
    // Pool bookkeeping stays under the lock: a reinvoke arriving between
    // the state write and the queue insert would otherwise race it.
    if self.can_invoke() {
      *state = TaskState::Ready;
      pool.add_ready_work(self);
    } else {
      *state = TaskState::Blocked;
      pool.add_block_work(self);
    }
  }

  // Only meaningful under the state lock.
  fn can_invoke(self: &Arc<Self>) -> bool {
    match &self.barrier {
      Some(barrier) => barrier.is_clear(self),
      None => true,
    }
  }

  /// Re-evaluates a Blocked task's clearness after an external event (a
  /// predecessor completed, a delay timer expired). Any state other than
  /// Blocked is a no-op.
  pub(crate) fn reinvoke(self: &Arc<Self>) {
    let mut state = self.state.lock();
    if *state != TaskState::Blocked {
      return;
    }
    if self.can_invoke() {
      *state = TaskState::Ready;
      if let Some(pool) = self.pool.upgrade() {
        pool.move_work_to_ready(self);
      }
    }
  }

  /// Runs the task on worker `which`. Called only from the worker loop.
  pub(crate) async fn invoke(self: &Arc<Self>, which: usize, info: &TaskInfo) {
    {
      let mut state = self.state.lock();
      match *state {
        // Cancelled tasks can still surface from the ready queue; skip.
        TaskState::Cancelled => return,
        TaskState::Ready => {
          self.which.store(which as i32, AtomicOrdering::Relaxed);
          *state = TaskState::Invoked;
        }
        other => {
          error!(task_name = %self.name, state = ?other, "Task: invoke in wrong state.");
          return;
        }
      }
    }
    info.prepare(&self.name);
    let future = self.future.lock().take();
    let Some(future) = future else {
      error!(task_name = %self.name, "Task: future already taken.");
      return;
    };
    match AssertUnwindSafe(future).catch_unwind().await {
      Ok(()) => {
        info.completed();
        self.completed();
      }
      Err(payload) => {
        // A panicking handler does not complete the task and its barrier
        // stays held.
        error!(
          task_name = %self.name,
          task_id = %self.id,
          which,
          panic = %panic_message(payload.as_ref()),
          "Task handler panicked during execution."
        );
      }
    }
  }

  fn completed(self: &Arc<Self>) {
    {
      let state = self.state.lock();
      if *state != TaskState::Invoked {
        error!(task_name = %self.name, state = ?*state, "Task: completed in wrong state.");
        return;
      }
    }
    self.complete.store(true, AtomicOrdering::SeqCst);
    if let Some(barrier) = &self.barrier {
      barrier.completed(self);
    }
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("state", &*self.state.lock())
      .finish_non_exhaustive()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
