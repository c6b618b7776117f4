use crate::barrier::Barrier;
use crate::error::PoolError;
use crate::job::{Job, JobHandler};
use crate::task::{Task, TaskFuture};
use crate::task_info::{TaskInfo, TaskSnapshot};

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// The worker pool: a fixed set of worker loops fed by a single dispatcher,
/// plus a registry of independent loop-jobs for shutdown bookkeeping.
///
/// Construct one explicitly at program start with [`PoolManager::new`] and
/// thread the `Arc` through collaborators; then [`start`](PoolManager::start)
/// it with the desired worker count. Work enters through
/// [`send_work`](PoolManager::send_work); tasks carrying a barrier are held
/// back until the barrier reports clear.
pub struct PoolManager {
  pool_name: Arc<String>,
  handle: TokioHandle,
  initialized: AtomicBool,
  max_workers: AtomicUsize,
  work_tx: Mutex<Option<kanal::AsyncSender<Arc<Task>>>>,
  ready_works: Arc<Mutex<VecDeque<Arc<Task>>>>,
  block_works: DashMap<u64, Arc<Task>>,
  active_works: Arc<AtomicUsize>,
  income_work: Arc<Notify>,
  shutdown_token: CancellationToken,
  join_handles: Mutex<Vec<JoinHandle<()>>>,
  dep_jobs: DashMap<u64, Arc<Job>>,
  admin_infos: RwLock<Vec<Arc<TaskInfo>>>,
}

impl PoolManager {
  /// Creates an idle pool bound to the given runtime handle. No workers
  /// exist until [`start`](PoolManager::start).
  pub fn new(pool_name: &str, handle: TokioHandle) -> Arc<Self> {
    Arc::new(Self {
      pool_name: Arc::new(pool_name.to_string()),
      handle,
      initialized: AtomicBool::new(false),
      max_workers: AtomicUsize::new(0),
      work_tx: Mutex::new(None),
      ready_works: Arc::new(Mutex::new(VecDeque::new())),
      block_works: DashMap::new(),
      active_works: Arc::new(AtomicUsize::new(0)),
      income_work: Arc::new(Notify::new()),
      shutdown_token: CancellationToken::new(),
      join_handles: Mutex::new(Vec::new()),
      dep_jobs: DashMap::new(),
      admin_infos: RwLock::new(Vec::new()),
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Worker count fixed at start time; 0 while the pool is idle.
  pub fn max_workers(&self) -> usize {
    self.max_workers.load(AtomicOrdering::Relaxed)
  }

  /// Number of tasks currently executing on workers.
  pub fn active_work_count(&self) -> usize {
    self.active_works.load(AtomicOrdering::Relaxed)
  }

  /// Number of tasks eligible for dispatch.
  pub fn ready_work_count(&self) -> usize {
    self.ready_works.lock().len()
  }

  /// Number of tasks waiting on a barrier.
  pub fn blocked_work_count(&self) -> usize {
    self.block_works.len()
  }

  /// Spawns `workers` worker loops and the dispatcher. Errors when the pool
  /// was already started.
  pub fn start(&self, workers: usize) -> Result<(), PoolError> {
    if self.initialized.swap(true, AtomicOrdering::SeqCst) {
      error!(pool_name = %self.pool_name, "Start: already started.");
      return Err(PoolError::AlreadyStarted);
    }
    let workers = workers.max(1);
    self.max_workers.store(workers, AtomicOrdering::SeqCst);

    let (work_tx, work_rx) = kanal::bounded_async::<Arc<Task>>(workers);
    let mut handles = Vec::with_capacity(workers + 1);
    let mut infos = Vec::with_capacity(workers);

    for which in 0..workers {
      let info = TaskInfo::new(which);
      infos.push(info.clone());
      handles.push(self.handle.spawn(work_process(
        self.pool_name.clone(),
        which,
        work_rx.clone(),
        self.active_works.clone(),
        self.shutdown_token.clone(),
        info,
      )));
    }
    handles.push(self.handle.spawn(dispatch_process(
      self.pool_name.clone(),
      work_tx.clone(),
      self.ready_works.clone(),
      self.active_works.clone(),
      workers,
      self.income_work.clone(),
      self.shutdown_token.clone(),
    )));

    *self.admin_infos.write() = infos;
    *self.join_handles.lock() = handles;
    *self.work_tx.lock() = Some(work_tx);

    info!(pool_name = %self.pool_name, workers, "Pool started.");
    Ok(())
  }

  /// Submits a unit of work.
  ///
  /// `name` labels the task in logs and telemetry. When `barrier` is given
  /// the task queues on every resource the barrier gates and only runs once
  /// it is clear; otherwise it is immediately eligible.
  pub fn send_work<F>(
    self: &Arc<Self>,
    name: &str,
    barrier: Option<Arc<dyn Barrier>>,
    future: F,
  ) -> Result<Arc<Task>, PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    if self.shutdown_token.is_cancelled() {
      warn!(pool_name = %self.pool_name, task_name = %name, "SendWork: pool is shutting down.");
      return Err(PoolError::ShuttingDown);
    }
    let task = Task::new(
      name,
      Box::pin(future) as TaskFuture,
      barrier,
      Arc::downgrade(self),
    );
    debug!(
      pool_name = %self.pool_name,
      task_name = %name,
      task_id = %task.id(),
      "SendWork: submitting task."
    );
    task.submit();
    Ok(task)
  }

  /// Registers an independent loop-job. The job is returned idle; the
  /// caller starts it explicitly with [`Job::run`]. Registered jobs are
  /// cancelled and joined by [`shutdown`](PoolManager::shutdown).
  pub fn add_loop_job<F, Fut>(
    self: &Arc<Self>,
    name: &str,
    interval: Duration,
    mut handler: F,
  ) -> Arc<Job>
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let boxed: JobHandler = Box::new(move || Box::pin(handler()) as TaskFuture);
    let job = Job::new(name, interval, boxed, Arc::downgrade(self));
    self.dep_jobs.insert(job.id(), job.clone());
    debug!(pool_name = %self.pool_name, job_name = %name, "AddLoopJob: registered.");
    job
  }

  /// Snapshot of every worker's telemetry, in worker-index order.
  pub fn admin_infos(&self) -> Vec<TaskSnapshot> {
    self.admin_infos.read().iter().map(|info| info.snapshot()).collect()
  }

  /// Stops the pool: no new submissions, every registered loop-job is
  /// cancelled, in-flight tasks run to completion, then workers and the
  /// dispatcher are joined and the work channel closed. Queued tasks that
  /// never started are dropped.
  pub async fn shutdown(&self) -> Result<(), PoolError> {
    if !self.initialized.load(AtomicOrdering::SeqCst) {
      error!(pool_name = %self.pool_name, "Shutdown: not started.");
      return Err(PoolError::NotStarted);
    }
    if !self.shutdown_token.is_cancelled() {
      info!(pool_name = %self.pool_name, "Shutdown: initiating.");
      self.shutdown_token.cancel();
    } else {
      info!(pool_name = %self.pool_name, "Shutdown: already in progress.");
    }

    let jobs: Vec<Arc<Job>> = self.dep_jobs.iter().map(|entry| entry.value().clone()).collect();
    for job in &jobs {
      job.cancel();
    }
    for job in &jobs {
      job.wait().await;
    }

    let handles: Vec<JoinHandle<()>> = self.join_handles.lock().drain(..).collect();
    for handle in handles {
      if let Err(join_error) = handle.await {
        error!(
          pool_name = %self.pool_name,
          "Shutdown: error joining pool loop: {:?}",
          join_error
        );
      }
    }

    if let Some(work_tx) = self.work_tx.lock().take() {
      let _ = work_tx.close();
    }
    info!(pool_name = %self.pool_name, "Shutdown: finish.");
    Ok(())
  }

  pub(crate) fn handle(&self) -> &TokioHandle {
    &self.handle
  }

  pub(crate) fn add_ready_work(&self, task: &Arc<Task>) {
    self.ready_works.lock().push_back(task.clone());
    self.income_work.notify_one();
  }

  pub(crate) fn add_block_work(&self, task: &Arc<Task>) {
    self.block_works.insert(task.id(), task.clone());
  }

  pub(crate) fn move_work_to_ready(&self, task: &Arc<Task>) {
    self.block_works.remove(&task.id());
    self.ready_works.lock().push_back(task.clone());
    self.income_work.notify_one();
  }

  pub(crate) fn remove_block_work(&self, task: &Arc<Task>) {
    if task.is_cancelled() {
      self.block_works.remove(&task.id());
    }
  }

  pub(crate) fn remove_job(&self, job: &Arc<Job>) {
    self.dep_jobs.remove(&job.id());
  }
}

impl Drop for PoolManager {
  fn drop(&mut self) {
    // Implicit shutdown signal; loops terminate on their own once the
    // token flips and the channel closes. Nothing is joined here.
    if !self.shutdown_token.is_cancelled() {
      debug!(
        pool_name = %*self.pool_name,
        "PoolManager dropped without explicit shutdown; signalling loops to stop."
      );
      self.shutdown_token.cancel();
      if let Some(work_tx) = self.work_tx.lock().take() {
        let _ = work_tx.close();
      }
    }
  }
}

/// Worker loop `which`: waits for dispatched tasks and runs them, one at a
/// time, until shutdown or channel closure.
async fn work_process(
  pool_name: Arc<String>,
  which: usize,
  work_rx: kanal::AsyncReceiver<Arc<Task>>,
  active_works: Arc<AtomicUsize>,
  shutdown_token: CancellationToken,
  info: Arc<TaskInfo>,
) {
  trace!(pool_name = %*pool_name, which, "Worker started.");
  loop {
    tokio::select! {
      biased;

      _ = shutdown_token.cancelled() => {
        break;
      }

      recv_result = work_rx.recv() => {
        match recv_result {
          Ok(task) => {
            active_works.fetch_add(1, AtomicOrdering::Relaxed);
            task.invoke(which, &info).await;
            active_works.fetch_sub(1, AtomicOrdering::Relaxed);
          }
          Err(_) => {
            debug!(pool_name = %*pool_name, which, "Worker: work channel closed.");
            break;
          }
        }
      }
    }
  }
  trace!(pool_name = %*pool_name, which, "Worker stopped.");
}

/// The dispatcher: the only writer to the work channel and the sole gate on
/// `active_works < max_workers`. Woken by the income signal on every
/// submit/unblock; the 1 ms tick is a safety net.
async fn dispatch_process(
  pool_name: Arc<String>,
  work_tx: kanal::AsyncSender<Arc<Task>>,
  ready_works: Arc<Mutex<VecDeque<Arc<Task>>>>,
  active_works: Arc<AtomicUsize>,
  max_workers: usize,
  income_work: Arc<Notify>,
  shutdown_token: CancellationToken,
) {
  trace!(pool_name = %*pool_name, "Dispatcher started.");
  let mut tick = tokio::time::interval(Duration::from_millis(1));
  tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
  loop {
    tokio::select! {
      biased;

      _ = shutdown_token.cancelled() => {
        break;
      }

      _ = income_work.notified() => {}

      _ = tick.tick() => {}
    }
    loop {
      if active_works.load(AtomicOrdering::Relaxed) >= max_workers {
        break;
      }
      let task = ready_works.lock().pop_front();
      let Some(task) = task else {
        break;
      };
      if work_tx.send(task).await.is_err() {
        error!(pool_name = %*pool_name, "Dispatcher: work channel closed.");
        return;
      }
    }
  }
  trace!(pool_name = %*pool_name, "Dispatcher stopped.");
}
