use orderpool::{JobState, PoolManager};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,orderpool=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    sleep(Duration::from_millis(5)).await;
  }
  condition()
}

#[tokio::test]
async fn test_job_runs_on_interval() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_interval", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("ticker", Duration::from_millis(15), move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });

  assert_eq!(job.status(), JobState::Idle);
  job.run(None);
  assert_eq!(job.status(), JobState::Run);

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 3).await);

  job.cancel();
  assert_eq!(job.status(), JobState::Cancel);
  // Let the loop observe the cancel, then verify the counter froze.
  sleep(Duration::from_millis(50)).await;
  let frozen = counter.load(Ordering::SeqCst);
  sleep(Duration::from_millis(60)).await;
  assert_eq!(counter.load(Ordering::SeqCst), frozen, "cancelled job must stop iterating");

  manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_suspend_and_resume() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_suspend", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("suspender", Duration::from_millis(10), move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });
  job.run(None);

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 2).await);

  job.suspend();
  assert_eq!(job.status(), JobState::Suspend);
  // Allow the loop to observe the suspend, then verify the counter froze.
  sleep(Duration::from_millis(50)).await;
  let frozen = counter.load(Ordering::SeqCst);
  sleep(Duration::from_millis(60)).await;
  assert_eq!(counter.load(Ordering::SeqCst), frozen, "suspended job must not iterate");

  job.resume();
  assert_eq!(job.status(), JobState::Run);
  assert!(
    wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) > frozen).await,
    "resumed job must iterate again"
  );

  job.cancel();
  manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_start_delay() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_delay", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("delayed_starter", Duration::from_millis(10), move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });
  job.run(Some(Duration::from_millis(80)));

  sleep(Duration::from_millis(30)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 0, "job must not iterate during its start delay");

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 1).await);

  job.cancel();
  manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_job_run_twice_is_rejected() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_double_run", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("once_only", Duration::from_millis(10), move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });
  job.run(None);
  // Second run is a logged no-op; the loop keeps its original cadence.
  job.run(None);
  assert_eq!(job.status(), JobState::Run);

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 2).await);

  job.cancel();
  manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_wakes_suspended_job() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_cancel_suspended", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let job = manager.add_loop_job("suspended_then_cancelled", Duration::from_millis(5), || async {});
  job.run(None);
  sleep(Duration::from_millis(20)).await;
  job.suspend();
  sleep(Duration::from_millis(20)).await;

  // Shutdown cancels the job; a suspended loop must still terminate.
  manager.shutdown().await.unwrap();
  assert_eq!(job.status(), JobState::Cancel);
}

#[tokio::test]
async fn test_shutdown_cancels_registered_jobs() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_shutdown", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("shutdown_victim", Duration::from_millis(10), move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });
  job.run(None);

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 1).await);

  manager.shutdown().await.unwrap();
  assert_eq!(job.status(), JobState::Cancel);

  let frozen = counter.load(Ordering::SeqCst);
  sleep(Duration::from_millis(60)).await;
  assert_eq!(counter.load(Ordering::SeqCst), frozen, "cancelled job must not iterate after shutdown");
}

#[tokio::test]
async fn test_zero_interval_job_loops_continuously() {
  setup_tracing_for_test();
  let manager = PoolManager::new("test_job_zero_interval", tokio::runtime::Handle::current());
  manager.start(1).unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let counter_clone = counter.clone();
  let job = manager.add_loop_job("spinner", Duration::ZERO, move || {
    let counter = counter_clone.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
      // Pace inside the handler; the loop itself adds no delay.
      sleep(Duration::from_millis(2)).await;
    }
  });
  job.run(None);

  assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) >= 10).await);

  job.cancel();
  manager.shutdown().await.unwrap();
}
