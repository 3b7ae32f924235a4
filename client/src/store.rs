//! The remote table store as seen by the sync layer.

use async_trait::async_trait;
use log::debug;
use shared::{
    ChangeEvent, EntityId, Food, FoodId, NewFood, NewSnake, SnakePatch, SnakeQuery, SnakeRecord,
    StoreError, StoreOp, StoreReply, Tables,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub type SubscriptionId = u32;

/// A live change feed. Dropping the receiver ends delivery.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Row-level operations on the shared snakes and foods tables plus a
/// change feed. Delivery on the feed is at least once and unordered
/// relative to replies of the calls that caused it.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn insert_snake(&self, snake: NewSnake) -> Result<SnakeRecord, StoreError>;
    async fn update_snake(&self, id: EntityId, patch: SnakePatch) -> Result<(), StoreError>;
    async fn delete_snake(&self, id: EntityId) -> Result<(), StoreError>;
    async fn query_snakes(&self, query: SnakeQuery) -> Result<Vec<SnakeRecord>, StoreError>;
    async fn insert_foods(&self, foods: Vec<NewFood>) -> Result<Vec<Food>, StoreError>;
    async fn delete_food(&self, id: FoodId) -> Result<(), StoreError>;
    async fn query_foods(&self) -> Result<Vec<Food>, StoreError>;
    async fn subscribe(&self) -> Result<Subscription, StoreError>;
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

/// Store that keeps the tables in this process.
///
/// Cloning shares the same tables, so several sessions built from clones
/// of one `MemoryStore` play in the same world.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    subscribers: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<ChangeEvent>>>>,
    next_subscription: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: Arc::new(AtomicU32::new(1)),
        }
    }

    async fn execute(&self, op: StoreOp) -> Result<StoreReply, StoreError> {
        let (reply, events) = self.tables.lock().await.execute(op);
        if !events.is_empty() {
            self.publish(events).await;
        }
        reply
    }

    async fn publish(&self, events: Vec<ChangeEvent>) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|id, tx| {
            let open = events.iter().all(|event| tx.send(event.clone()).is_ok());
            if !open {
                debug!("Dropping closed subscription {}", id);
            }
            open
        });
    }

    pub async fn snake_count(&self) -> usize {
        self.tables.lock().await.snake_count()
    }

    pub async fn food_count(&self) -> usize {
        self.tables.lock().await.food_count()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn insert_snake(&self, snake: NewSnake) -> Result<SnakeRecord, StoreError> {
        self.execute(StoreOp::InsertSnake(snake)).await?.into_snake()
    }

    async fn update_snake(&self, id: EntityId, patch: SnakePatch) -> Result<(), StoreError> {
        self.execute(StoreOp::UpdateSnake { id, patch }).await?.into_done()
    }

    async fn delete_snake(&self, id: EntityId) -> Result<(), StoreError> {
        self.execute(StoreOp::DeleteSnake { id }).await?.into_done()
    }

    async fn query_snakes(&self, query: SnakeQuery) -> Result<Vec<SnakeRecord>, StoreError> {
        self.execute(StoreOp::QuerySnakes(query)).await?.into_snakes()
    }

    async fn insert_foods(&self, foods: Vec<NewFood>) -> Result<Vec<Food>, StoreError> {
        self.execute(StoreOp::InsertFoods(foods)).await?.into_foods()
    }

    async fn delete_food(&self, id: FoodId) -> Result<(), StoreError> {
        self.execute(StoreOp::DeleteFood { id }).await?.into_done()
    }

    async fn query_foods(&self) -> Result<Vec<Food>, StoreError> {
        self.execute(StoreOp::QueryFoods).await?.into_foods()
    }

    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.subscribers.lock().await.remove(&id);
        Ok(())
    }
}

/// Inserts random food until the remote table holds at least
/// `min_count` items. Returns the inserted rows.
pub async fn top_up_food<S, F>(
    store: &S,
    min_count: usize,
    mut make: F,
) -> Result<Vec<Food>, StoreError>
where
    S: RemoteStore + ?Sized,
    F: FnMut() -> NewFood,
{
    let current = store.query_foods().await?.len();
    if current >= min_count {
        return Ok(Vec::new());
    }

    let missing = min_count - current;
    let batch: Vec<NewFood> = (0..missing).map(|_| make()).collect();
    let inserted = store.insert_foods(batch).await?;
    debug!("Topped up {} food items", inserted.len());
    Ok(inserted)
}
