use orderpool::PoolManager;

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let manager = PoolManager::new("basic_pool", Handle::current());
  manager.start(2).unwrap();

  let mut tasks = Vec::new();
  for i in 0..5 {
    let sleep_ms = 100 + (i as u64 % 3) * 50;
    let task = manager
      .send_work(&format!("task_{}", i), None, async move {
        info!("Task {} starting, will sleep for {}ms", i, sleep_ms);
        sleep(Duration::from_millis(sleep_ms)).await;
        info!("Task {} finished", i);
      })
      .unwrap();
    tasks.push(task);
  }

  info!("All tasks submitted, waiting for completion...");
  while !tasks.iter().all(|t| t.is_completed()) {
    sleep(Duration::from_millis(10)).await;
  }

  for snapshot in manager.admin_infos() {
    info!(
      "Worker {}: total={} last_caller={} last={:?} max={:?} (by {})",
      snapshot.which, snapshot.total, snapshot.caller, snapshot.elapse, snapshot.max_elapse, snapshot.max_caller
    );
  }

  manager.shutdown().await.unwrap();
  info!("--- Basic Usage Example End ---");
}
