use orderpool::{make_barrier, OrderData, PoolManager, Sequenced};

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::info;

/// A resource that wants its tasks sequenced: expose the embedded
/// `OrderData` through the `Sequenced` trait.
struct Player {
  name: &'static str,
  order: Arc<OrderData>,
}

impl Player {
  fn new(name: &'static str) -> Self {
    Self {
      name,
      order: OrderData::new(name),
    }
  }
}

impl Sequenced for Player {
  fn order_data(&self) -> Arc<OrderData> {
    self.order.clone()
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Ordered Resources Example ---");

  let manager = PoolManager::new("ordered_pool", Handle::current());
  manager.start(4).unwrap();

  let alice = Player::new("alice");
  let bob = Player::new("bob");

  let mut tasks = Vec::new();

  // Three updates per player: updates for the same player run one at a
  // time in submission order, while alice's and bob's streams interleave
  // freely across the pool.
  for round in 0..3 {
    for player in [&alice, &bob] {
      let barrier = make_barrier(&[player]).unwrap();
      let name = player.name;
      let task = manager
        .send_work(&format!("update_{}_{}", name, round), Some(barrier), async move {
          info!("update {} round {} begins", name, round);
          sleep(Duration::from_millis(50)).await;
          info!("update {} round {} ends", name, round);
        })
        .unwrap();
      tasks.push(task);
    }
  }

  // A trade touches both players: it waits until it owns the head of both
  // queues, and further per-player updates queue up behind it.
  let trade_barrier = make_barrier(&[&alice, &bob]).unwrap();
  let trade = manager
    .send_work("trade_alice_bob", Some(trade_barrier), async {
      info!("trade begins, both players locked");
      sleep(Duration::from_millis(80)).await;
      info!("trade ends");
    })
    .unwrap();
  tasks.push(trade);

  let post_barrier = make_barrier(&[&alice]).unwrap();
  let post = manager
    .send_work("update_alice_after_trade", Some(post_barrier), async {
      info!("alice update after trade");
    })
    .unwrap();
  tasks.push(post);

  while !tasks.iter().all(|t| t.is_completed()) {
    sleep(Duration::from_millis(10)).await;
  }

  manager.shutdown().await.unwrap();
  info!("--- Ordered Resources Example End ---");
}
