//! In-memory semantics of the remote table store.
//!
//! Both the UDP store server and the in-process store run their operations
//! through `Tables`, so every deployment agrees on id assignment, query
//! filters and the change events produced by each mutation.

use crate::error::StoreError;
use crate::model::{
    ChangeEvent, EntityId, Food, FoodId, NewFood, NewSnake, SnakePatch, SnakeQuery, SnakeRecord,
};
use crate::protocol::{StoreOp, StoreReply};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Tables {
    snakes: BTreeMap<EntityId, SnakeRecord>,
    foods: BTreeMap<FoodId, Food>,
    /// Store-side time of the last insert or update of each snake row.
    /// Reaping reads this, never the client-written `last_update`.
    seen: BTreeMap<EntityId, Instant>,
    next_id: u64,
}

impl Tables {
    pub fn new() -> Self {
        Self {
            snakes: BTreeMap::new(),
            foods: BTreeMap::new(),
            seen: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    /// Runs one operation, returning its reply and the changes it caused.
    pub fn execute(&mut self, op: StoreOp) -> (Result<StoreReply, StoreError>, Vec<ChangeEvent>) {
        match op {
            StoreOp::InsertSnake(new) => {
                let (record, event) = self.insert_snake(new);
                (Ok(StoreReply::Snake(record)), vec![event])
            }
            StoreOp::UpdateSnake { id, patch } => match self.update_snake(id, patch) {
                Ok(event) => (Ok(StoreReply::Done), vec![event]),
                Err(e) => (Err(e), Vec::new()),
            },
            StoreOp::DeleteSnake { id } => match self.delete_snake(id) {
                Ok(event) => (Ok(StoreReply::Done), vec![event]),
                Err(e) => (Err(e), Vec::new()),
            },
            StoreOp::QuerySnakes(query) => (Ok(StoreReply::Snakes(self.query_snakes(&query))), Vec::new()),
            StoreOp::InsertFoods(foods) => {
                let (inserted, events) = self.insert_foods(foods);
                (Ok(StoreReply::Foods(inserted)), events)
            }
            StoreOp::DeleteFood { id } => match self.delete_food(id) {
                Ok(event) => (Ok(StoreReply::Done), vec![event]),
                Err(e) => (Err(e), Vec::new()),
            },
            StoreOp::QueryFoods => (Ok(StoreReply::Foods(self.foods())), Vec::new()),
        }
    }

    pub fn insert_snake(&mut self, new: NewSnake) -> (SnakeRecord, ChangeEvent) {
        let id = self.allocate_id();
        let record = new.with_id(id);
        self.snakes.insert(id, record.clone());
        self.seen.insert(id, Instant::now());
        (record.clone(), ChangeEvent::snake_inserted(record))
    }

    pub fn update_snake(&mut self, id: EntityId, patch: SnakePatch) -> Result<ChangeEvent, StoreError> {
        let record = self.snakes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let old = record.clone();
        patch.apply_to(record);
        self.seen.insert(id, Instant::now());
        Ok(ChangeEvent::snake_updated(old, record.clone()))
    }

    pub fn delete_snake(&mut self, id: EntityId) -> Result<ChangeEvent, StoreError> {
        self.seen.remove(&id);
        self.snakes
            .remove(&id)
            .map(ChangeEvent::snake_deleted)
            .ok_or(StoreError::NotFound(id))
    }

    pub fn query_snakes(&self, query: &SnakeQuery) -> Vec<SnakeRecord> {
        let mut rows: Vec<SnakeRecord> = self
            .snakes
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();

        if query.order_by_score_desc {
            rows.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        rows
    }

    pub fn insert_foods(&mut self, foods: Vec<NewFood>) -> (Vec<Food>, Vec<ChangeEvent>) {
        let mut inserted = Vec::with_capacity(foods.len());
        let mut events = Vec::with_capacity(foods.len());
        for new in foods {
            let id = self.allocate_id();
            let food = new.with_id(id);
            self.foods.insert(id, food.clone());
            events.push(ChangeEvent::food_inserted(food.clone()));
            inserted.push(food);
        }
        (inserted, events)
    }

    pub fn delete_food(&mut self, id: FoodId) -> Result<ChangeEvent, StoreError> {
        self.foods
            .remove(&id)
            .map(ChangeEvent::food_deleted)
            .ok_or(StoreError::NotFound(id))
    }

    pub fn foods(&self) -> Vec<Food> {
        self.foods.values().cloned().collect()
    }

    pub fn snake_count(&self) -> usize {
        self.snakes.len()
    }

    pub fn food_count(&self) -> usize {
        self.foods.len()
    }

    /// Deletes snake rows nobody has written for longer than `max_age`.
    pub fn reap_stale_snakes(&mut self, max_age: Duration) -> Vec<ChangeEvent> {
        self.reap_stale_snakes_at(Instant::now(), max_age)
    }

    pub fn reap_stale_snakes_at(&mut self, now: Instant, max_age: Duration) -> Vec<ChangeEvent> {
        let stale: Vec<EntityId> = self
            .seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > max_age)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.delete_snake(id).ok())
            .collect()
    }
}
