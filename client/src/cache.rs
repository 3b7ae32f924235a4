//! Local mirror of the remote snakes and foods tables.
//!
//! The mirror never holds the local snake and never holds a dead snake.
//! Deleted ids are remembered for a while so a late or repeated insert
//! event cannot bring a row back after its delete was observed.

use log::trace;
use shared::{ChangeEvent, ChangeKind, EntityId, Food, FoodId, SnakeRecord};
use std::collections::{HashMap, HashSet, VecDeque};

const TOMBSTONE_CAPACITY: usize = 4096;

/// Bounded set of recently deleted ids; oldest entries are forgotten first.
#[derive(Debug, Default)]
struct Tombstones {
    order: VecDeque<u64>,
    ids: HashSet<u64>,
}

impl Tombstones {
    fn insert(&mut self, id: u64) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > TOMBSTONE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }
}

/// What this client currently believes the remote tables hold.
///
/// Filled by the initial queries, kept current by change events, and
/// overwritten wholesale by the periodic polls. Rows the collision checks
/// and the renderer read come from here, never from the store directly.
#[derive(Debug, Default)]
pub struct RemoteCache {
    local_id: Option<EntityId>,
    snakes: HashMap<EntityId, SnakeRecord>,
    foods: HashMap<FoodId, Food>,
    dead_snakes: Tombstones,
    eaten_foods: Tombstones,
}

impl RemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the local snake's id and evicts any row already cached for it.
    pub fn set_local_id(&mut self, id: EntityId) {
        self.local_id = Some(id);
        self.snakes.remove(&id);
    }

    /// Id of the snake this client owns, once it has been spawned.
    pub fn local_id(&self) -> Option<EntityId> {
        self.local_id
    }

    /// Inserts or replaces a remote snake. Returns false when the row was
    /// rejected (local snake, dead snake, or already deleted).
    pub fn upsert_snake(&mut self, record: SnakeRecord) -> bool {
        if Some(record.id) == self.local_id || self.dead_snakes.contains(record.id) {
            return false;
        }
        if !record.alive {
            self.snakes.remove(&record.id);
            return false;
        }
        self.snakes.insert(record.id, record);
        true
    }

    /// Drops a snake and remembers its id, so later inserts for it are
    /// ignored.
    pub fn remove_snake(&mut self, id: EntityId) -> Option<SnakeRecord> {
        self.dead_snakes.insert(id);
        self.snakes.remove(&id)
    }

    /// Replaces the whole snake set with a fresh peer query result.
    pub fn replace_snakes(&mut self, records: Vec<SnakeRecord>) {
        self.snakes.clear();
        for record in records {
            self.upsert_snake(record);
        }
    }

    /// Caches a food item unless it was already eaten or deleted.
    pub fn insert_food(&mut self, food: Food) -> bool {
        if self.eaten_foods.contains(food.id) {
            return false;
        }
        self.foods.insert(food.id, food);
        true
    }

    /// Drops a food item and remembers its id. Returns the item if it was
    /// cached.
    pub fn remove_food(&mut self, id: FoodId) -> Option<Food> {
        self.eaten_foods.insert(id);
        self.foods.remove(&id)
    }

    /// Replaces the whole food set with a fresh query result.
    pub fn replace_foods(&mut self, foods: Vec<Food>) {
        self.foods.clear();
        for food in foods {
            self.insert_food(food);
        }
    }

    /// Starts deleting a food locally. Returns the item only the first
    /// time, so a food eaten twice in quick succession is deleted once.
    pub fn begin_food_delete(&mut self, id: FoodId) -> Option<Food> {
        self.remove_food(id)
    }

    /// Applies one change-feed event. Returns true when the cache changed.
    pub fn apply_change(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Snake { kind, old, new } => match kind {
                ChangeKind::Insert | ChangeKind::Update => match new {
                    Some(record) => {
                        if record.alive {
                            self.upsert_snake(record.clone())
                        } else {
                            trace!("Snake {} reported dead", record.id);
                            self.snakes.remove(&record.id).is_some()
                        }
                    }
                    None => false,
                },
                ChangeKind::Delete => old
                    .as_ref()
                    .map(|record| self.remove_snake(record.id).is_some())
                    .unwrap_or(false),
            },
            ChangeEvent::Food { kind, old, new } => match kind {
                ChangeKind::Insert | ChangeKind::Update => new
                    .as_ref()
                    .map(|food| self.insert_food(food.clone()))
                    .unwrap_or(false),
                ChangeKind::Delete => old
                    .as_ref()
                    .map(|food| self.remove_food(food.id).is_some())
                    .unwrap_or(false),
            },
        }
    }

    /// Remote live snakes, in no particular order.
    pub fn snakes(&self) -> impl Iterator<Item = &SnakeRecord> {
        self.snakes.values()
    }

    pub fn foods(&self) -> impl Iterator<Item = &Food> {
        self.foods.values()
    }

    pub fn snake(&self, id: EntityId) -> Option<&SnakeRecord> {
        self.snakes.get(&id)
    }

    pub fn food(&self, id: FoodId) -> Option<&Food> {
        self.foods.get(&id)
    }

    pub fn snake_count(&self) -> usize {
        self.snakes.len()
    }

    pub fn food_count(&self) -> usize {
        self.foods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec2;

    fn record(id: EntityId, alive: bool) -> SnakeRecord {
        SnakeRecord {
            id,
            name: format!("s{}", id),
            score: 10.0,
            position: Vec2::new(50.0, 50.0),
            angle: 0.0,
            segments: vec![Vec2::new(50.0, 50.0)],
            alive,
            last_update: 0,
        }
    }

    fn food(id: FoodId) -> Food {
        Food {
            id,
            position: Vec2::new(1.0, 1.0),
            color: "hsl(1, 100%, 50%)".to_string(),
            value: 1.0,
        }
    }

    #[test]
    fn test_local_snake_never_cached() {
        let mut cache = RemoteCache::new();
        cache.upsert_snake(record(7, true));
        cache.set_local_id(7);
        assert_eq!(cache.snake_count(), 0);

        assert!(!cache.upsert_snake(record(7, true)));
        assert!(!cache.apply_change(&ChangeEvent::snake_inserted(record(7, true))));
        cache.replace_snakes(vec![record(7, true), record(8, true)]);
        assert!(cache.snake(7).is_none());
        assert!(cache.snake(8).is_some());
    }

    #[test]
    fn test_dead_snakes_are_evicted() {
        let mut cache = RemoteCache::new();
        cache.upsert_snake(record(3, true));
        assert!(cache.apply_change(&ChangeEvent::snake_updated(record(3, true), record(3, false))));
        assert_eq!(cache.snake_count(), 0);
        assert!(!cache.upsert_snake(record(4, false)));
    }

    #[test]
    fn test_update_for_unknown_snake_inserts() {
        let mut cache = RemoteCache::new();
        assert!(cache.apply_change(&ChangeEvent::snake_updated(record(5, true), record(5, true))));
        assert!(cache.snake(5).is_some());
    }

    #[test]
    fn test_delete_then_late_insert_stays_deleted() {
        let mut cache = RemoteCache::new();
        cache.insert_food(food(1));
        assert!(cache.apply_change(&ChangeEvent::food_deleted(food(1))));
        assert!(!cache.apply_change(&ChangeEvent::food_inserted(food(1))));
        assert!(cache.food(1).is_none());

        cache.upsert_snake(record(2, true));
        cache.apply_change(&ChangeEvent::snake_deleted(record(2, true)));
        assert!(!cache.upsert_snake(record(2, true)));
    }

    #[test]
    fn test_repeated_delete_is_noop() {
        let mut cache = RemoteCache::new();
        cache.insert_food(food(1));
        assert!(cache.apply_change(&ChangeEvent::food_deleted(food(1))));
        assert!(!cache.apply_change(&ChangeEvent::food_deleted(food(1))));
        assert_eq!(cache.food_count(), 0);
    }

    #[test]
    fn test_begin_food_delete_only_once() {
        let mut cache = RemoteCache::new();
        cache.insert_food(food(9));
        assert_eq!(cache.begin_food_delete(9), Some(food(9)));
        assert_eq!(cache.begin_food_delete(9), None);
    }

    #[test]
    fn test_replace_foods_skips_tombstoned() {
        let mut cache = RemoteCache::new();
        cache.insert_food(food(1));
        cache.begin_food_delete(1);
        cache.replace_foods(vec![food(1), food(2), food(3)]);
        assert_eq!(cache.food_count(), 2);
        assert!(cache.food(1).is_none());
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let mut cache = RemoteCache::new();
        for id in 0..(TOMBSTONE_CAPACITY as u64 + 10) {
            cache.remove_food(id);
        }
        // The oldest ids have been forgotten and may be inserted again
        assert!(cache.insert_food(food(0)));
        assert!(!cache.insert_food(food(TOMBSTONE_CAPACITY as u64 + 5)));
    }
}
