use crate::manager::PoolManager;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

lazy_static::lazy_static! {
  static ref NEXT_JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The per-iteration callback of a loop-job. Invoked once per cycle; the
/// returned future is awaited to completion before the next cycle.
pub type JobHandler =
  Box<dyn FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> + Send + 'static>;

/// Lifecycle states of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
  Idle = 0,
  Run = 1,
  Suspend = 2,
  Cancel = 3,
}

impl JobState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => JobState::Idle,
      1 => JobState::Run,
      2 => JobState::Suspend,
      _ => JobState::Cancel,
    }
  }
}

/// A long-lived, independently scheduled loop with its own
/// suspend/resume/cancel protocol.
///
/// Jobs run outside the worker pool and take no part in barrier
/// coordination; the pool only tracks them so [`PoolManager::shutdown`]
/// can cancel and join every loop it handed out. Created via
/// [`PoolManager::add_loop_job`](crate::PoolManager::add_loop_job), started
/// explicitly with [`run`](Job::run).
pub struct Job {
  id: u64,
  name: String,
  interval: Duration,
  state: AtomicU8,
  handler: Mutex<Option<JobHandler>>,
  resumed: Notify,
  stop: CancellationToken,
  handle: Mutex<Option<JoinHandle<()>>>,
  pool: Weak<PoolManager>,
}

impl Job {
  pub(crate) fn new(
    name: &str,
    interval: Duration,
    handler: JobHandler,
    pool: Weak<PoolManager>,
  ) -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_JOB_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      name: name.to_string(),
      interval,
      state: AtomicU8::new(JobState::Idle as u8),
      handler: Mutex::new(Some(handler)),
      resumed: Notify::new(),
      stop: CancellationToken::new(),
      handle: Mutex::new(None),
      pool,
    })
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn status(&self) -> JobState {
    JobState::from_u8(self.state.load(AtomicOrdering::SeqCst))
  }

  /// Starts the loop, optionally after an initial delay. Must be called
  /// exactly once; any state other than Idle is rejected with an error log.
  pub fn run(self: &Arc<Self>, delay: Option<Duration>) {
    if self
      .state
      .compare_exchange(
        JobState::Idle as u8,
        JobState::Run as u8,
        AtomicOrdering::SeqCst,
        AtomicOrdering::SeqCst,
      )
      .is_err()
    {
      error!(job_name = %self.name, state = ?self.status(), "Job: run in wrong state.");
      return;
    }
    let Some(pool) = self.pool.upgrade() else {
      error!(job_name = %self.name, "Job: run with no live pool.");
      return;
    };
    let Some(handler) = self.handler.lock().take() else {
      error!(job_name = %self.name, "Job: handler already taken.");
      return;
    };
    let job = self.clone();
    let join_handle = pool
      .handle()
      .spawn(async move { job_process(job, handler, delay.unwrap_or(Duration::ZERO)).await });
    *self.handle.lock() = Some(join_handle);
  }

  /// Pauses the loop after the current iteration. Only valid while running.
  pub fn suspend(&self) {
    let _ = self.state.compare_exchange(
      JobState::Run as u8,
      JobState::Suspend as u8,
      AtomicOrdering::SeqCst,
      AtomicOrdering::SeqCst,
    );
  }

  /// Resumes a suspended loop.
  pub fn resume(&self) {
    if self
      .state
      .compare_exchange(
        JobState::Suspend as u8,
        JobState::Run as u8,
        AtomicOrdering::SeqCst,
        AtomicOrdering::SeqCst,
      )
      .is_ok()
    {
      self.resumed.notify_one();
    }
  }

  /// Ends the loop. The current iteration (if any) runs to completion; the
  /// loop observes the state on its next pass, including out of a suspended
  /// wait or an interval sleep.
  pub fn cancel(&self) {
    self.state.store(JobState::Cancel as u8, AtomicOrdering::SeqCst);
    self.stop.cancel();
    self.resumed.notify_one();
  }

  /// Awaits the loop's termination after [`cancel`](Job::cancel). Used by
  /// pool shutdown; a no-op when the job never ran.
  pub(crate) async fn wait(&self) {
    let handle = self.handle.lock().take();
    if let Some(handle) = handle {
      if let Err(join_error) = handle.await {
        error!(job_name = %self.name, "Job: error joining loop: {:?}", join_error);
      }
    }
  }
}

async fn job_process(job: Arc<Job>, mut handler: JobHandler, delay: Duration) {
  if delay > Duration::ZERO {
    tokio::select! {
      biased;
      _ = job.stop.cancelled() => {}
      _ = tokio::time::sleep(delay) => {}
    }
  }
  loop {
    match job.status() {
      JobState::Run => {
        handler().await;
      }
      JobState::Suspend => {
        debug!(job_name = %job.name, "Job: suspended.");
        tokio::select! {
          biased;
          _ = job.stop.cancelled() => {}
          _ = job.resumed.notified() => {}
        }
      }
      JobState::Cancel | JobState::Idle => {
        if let Some(pool) = job.pool.upgrade() {
          pool.remove_job(&job);
        }
        info!(job_name = %job.name, "Job: loop ended.");
        return;
      }
    }
    if job.interval > Duration::ZERO {
      tokio::select! {
        biased;
        _ = job.stop.cancelled() => {}
        _ = tokio::time::sleep(job.interval) => {}
      }
    }
  }
}
