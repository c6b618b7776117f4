use orderpool::{delay_barrier, make_barrier, OrderData, PoolManager};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Delayed Work Example ---");

  let manager = PoolManager::new("delay_pool", Handle::current());
  manager.start(2).unwrap();

  let session = OrderData::new("session");
  let begin = Instant::now();

  // Scheduled for 300ms from now; it only joins the session queue when the
  // timer fires.
  let kick_barrier = delay_barrier(Duration::from_millis(300), &[&session]).unwrap();
  let kick = manager
    .send_work("kick_idle_session", Some(kick_barrier), async move {
      info!("session kicked at t={:?}", begin.elapsed());
    })
    .unwrap();

  // Meanwhile ordinary session work proceeds immediately.
  let ping_barrier = make_barrier(&[&session]).unwrap();
  let ping = manager
    .send_work("session_ping", Some(ping_barrier), async move {
      info!("session ping at t={:?}", begin.elapsed());
    })
    .unwrap();

  // A heartbeat loop-job, registered with the pool for shutdown.
  let beats = Arc::new(AtomicUsize::new(0));
  let beats_clone = beats.clone();
  let heartbeat = manager.add_loop_job("heartbeat", Duration::from_millis(100), move || {
    let beats = beats_clone.clone();
    async move {
      let n = beats.fetch_add(1, Ordering::SeqCst) + 1;
      info!("heartbeat {}", n);
    }
  });
  heartbeat.run(None);

  while !(kick.is_completed() && ping.is_completed()) {
    sleep(Duration::from_millis(10)).await;
  }
  info!("heartbeats so far: {}", beats.load(Ordering::SeqCst));

  // Shutdown cancels the heartbeat and joins every loop.
  manager.shutdown().await.unwrap();
  info!("--- Delayed Work Example End ---");
}
