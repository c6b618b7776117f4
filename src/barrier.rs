use crate::error::PoolError;
use crate::order::{OrderData, Sequenced};
use crate::task::Task;

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// The capability set every barrier variant implements.
///
/// The pool never interprets a barrier beyond this interface: it asks
/// [`is_clear`](Barrier::is_clear) whether the task may run and fires the
/// three hooks at the matching points of the task lifecycle. All four
/// methods are crate-driven; user code only constructs barriers via
/// [`make_barrier`] and [`delay_barrier`] and passes them to
/// [`PoolManager::send_work`](crate::PoolManager::send_work).
pub trait Barrier: Send + Sync {
  /// All prerequisites met; the task may run now.
  fn is_clear(&self, task: &Arc<Task>) -> bool;

  /// Called once during submit; enqueues the task on every gated resource.
  fn setup(&self, task: &Arc<Task>);

  /// Called when the task is cancelled before running.
  fn cancel(&self, task: &Arc<Task>);

  /// Called after the task's handler returned normally; releases the
  /// resource(s) and wakes successors.
  fn completed(&self, task: &Arc<Task>);
}

/// Builds a barrier that sequences a task behind every earlier task gated
/// on the same resource(s).
///
/// With one resource the task runs when it reaches the head of that
/// resource's FIFO; with several it must hold the head of all of them
/// simultaneously.
pub fn make_barrier<S>(resources: &[&S]) -> Result<Arc<dyn Barrier>, PoolError>
where
  S: Sequenced + ?Sized,
{
  if resources.is_empty() {
    error!("make_barrier: no ordering resources given.");
    return Err(PoolError::EmptyBarrier);
  }
  if resources.len() == 1 {
    return Ok(Arc::new(SingleBarrier {
      data: resources[0].order_data(),
    }));
  }
  Ok(Arc::new(MultiBarrier {
    datas: resources.iter().map(|r| r.order_data()).collect(),
  }))
}

/// Builds a barrier that additionally defers the task's eligibility until
/// `duration` has elapsed.
///
/// The task does not contend for its resource(s) while the timer runs; it
/// joins the tail of each FIFO at the moment of expiry.
pub fn delay_barrier<S>(
  duration: Duration,
  resources: &[&S],
) -> Result<Arc<dyn Barrier>, PoolError>
where
  S: Sequenced + ?Sized,
{
  if resources.is_empty() {
    error!("delay_barrier: no ordering resources given.");
    return Err(PoolError::EmptyBarrier);
  }
  if resources.len() == 1 {
    return Ok(Arc::new(DelayBarrier {
      data: resources[0].order_data(),
      duration,
      timer: Arc::new(DelayTimer::new()),
    }));
  }
  Ok(Arc::new(DelayMultiBarrier {
    datas: resources.iter().map(|r| r.order_data()).collect(),
    duration,
    timer: Arc::new(DelayTimer::new()),
  }))
}

// --- Plain barriers ---

struct SingleBarrier {
  data: Arc<OrderData>,
}

impl Barrier for SingleBarrier {
  fn is_clear(&self, task: &Arc<Task>) -> bool {
    matches!(self.data.head(), Some(head) if head.id() == task.id())
  }

  fn setup(&self, task: &Arc<Task>) {
    self.data.push(task);
  }

  fn cancel(&self, task: &Arc<Task>) {
    self.data.cancel_head(task);
  }

  fn completed(&self, task: &Arc<Task>) {
    self.data.complete_head(task);
  }
}

struct MultiBarrier {
  datas: Vec<Arc<OrderData>>,
}

impl Barrier for MultiBarrier {
  fn is_clear(&self, task: &Arc<Task>) -> bool {
    self
      .datas
      .iter()
      .all(|data| matches!(data.head(), Some(head) if head.id() == task.id()))
  }

  fn setup(&self, task: &Arc<Task>) {
    for data in &self.datas {
      data.push(task);
    }
  }

  fn cancel(&self, task: &Arc<Task>) {
    for data in &self.datas {
      data.cancel_head(task);
    }
  }

  fn completed(&self, task: &Arc<Task>) {
    for data in &self.datas {
      data.complete_head(task);
    }
  }
}

// --- Delay barriers ---

/// Timer state shared between a delay barrier and its spawned timer task.
///
/// `expired` serializes the race between the timer firing and a cancel:
/// whichever path swaps it first performs the delays→works migration, the
/// loser is a no-op.
struct DelayTimer {
  expired: AtomicBool,
  armed: AtomicBool,
  stop: CancellationToken,
  work: Mutex<Weak<Task>>,
}

impl DelayTimer {
  fn new() -> Self {
    Self {
      expired: AtomicBool::new(false),
      armed: AtomicBool::new(false),
      stop: CancellationToken::new(),
      work: Mutex::new(Weak::new()),
    }
  }

  fn is_expired(&self) -> bool {
    self.expired.load(AtomicOrdering::SeqCst)
  }

  /// Parks the task and starts the one-shot timer on the pool's runtime.
  /// The task is parked in every delay set before the timer is armed, so a
  /// zero-duration timer always finds it there.
  fn arm(self: &Arc<Self>, task: &Arc<Task>, orders: &[Arc<OrderData>], duration: Duration) {
    *self.work.lock() = Arc::downgrade(task);
    for order in orders {
      order.park_delayed(task);
    }
    self.armed.store(true, AtomicOrdering::SeqCst);

    let Some(pool) = task.pool() else {
      warn!(task_name = %task.name(), "DelayBarrier: no live pool, timer not armed.");
      return;
    };
    let timer = self.clone();
    let orders = orders.to_vec();
    pool.handle().spawn(async move {
      tokio::select! {
        biased;
        _ = timer.stop.cancelled() => {}
        _ = tokio::time::sleep(duration) => {
          timer.on_expired(&orders);
        }
      }
    });
  }

  fn on_expired(&self, orders: &[Arc<OrderData>]) {
    let task = self.work.lock().upgrade();
    let Some(task) = task else {
      return;
    };
    if !self.expired.swap(true, AtomicOrdering::SeqCst) {
      for order in orders {
        order.expire_delayed(&task);
      }
    }
    task.reinvoke();
  }

  /// Stops the timer and unparks a not-yet-expired task so the subsequent
  /// `cancel_head` sees a consistent queue position.
  fn cancel(&self, task: &Arc<Task>, orders: &[Arc<OrderData>]) {
    if !self.armed.load(AtomicOrdering::SeqCst) {
      return;
    }
    self.stop.cancel();
    if !self.expired.swap(true, AtomicOrdering::SeqCst) {
      for order in orders {
        order.expire_delayed(task);
      }
    }
    for order in orders {
      order.cancel_head(task);
    }
  }
}

struct DelayBarrier {
  data: Arc<OrderData>,
  duration: Duration,
  timer: Arc<DelayTimer>,
}

impl Barrier for DelayBarrier {
  fn is_clear(&self, task: &Arc<Task>) -> bool {
    if !self.timer.is_expired() {
      return false;
    }
    matches!(self.data.head(), Some(head) if head.id() == task.id())
  }

  fn setup(&self, task: &Arc<Task>) {
    self
      .timer
      .arm(task, std::slice::from_ref(&self.data), self.duration);
  }

  fn cancel(&self, task: &Arc<Task>) {
    self.timer.cancel(task, std::slice::from_ref(&self.data));
  }

  fn completed(&self, task: &Arc<Task>) {
    self.data.complete_head(task);
  }
}

struct DelayMultiBarrier {
  datas: Vec<Arc<OrderData>>,
  duration: Duration,
  timer: Arc<DelayTimer>,
}

impl Barrier for DelayMultiBarrier {
  fn is_clear(&self, task: &Arc<Task>) -> bool {
    if !self.timer.is_expired() {
      return false;
    }
    self
      .datas
      .iter()
      .all(|data| matches!(data.head(), Some(head) if head.id() == task.id()))
  }

  fn setup(&self, task: &Arc<Task>) {
    self.timer.arm(task, &self.datas, self.duration);
  }

  fn cancel(&self, task: &Arc<Task>) {
    self.timer.cancel(task, &self.datas);
  }

  fn completed(&self, task: &Arc<Task>) {
    for data in &self.datas {
      data.complete_head(task);
    }
  }
}
