//! Rows of the two remote tables and the change events describing them.

use crate::geometry::Vec2;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type EntityId = u64;
pub type FoodId = u64;

/// A snake row as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnakeRecord {
    pub id: EntityId,
    pub name: String,
    pub score: f32,
    pub position: Vec2,
    pub angle: f32,
    /// Head first.
    pub segments: Vec<Vec2>,
    pub alive: bool,
    /// Milliseconds since the unix epoch of the owner's last push.
    pub last_update: u64,
}

/// Insert payload for the snakes table; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnake {
    pub name: String,
    pub score: f32,
    pub position: Vec2,
    pub angle: f32,
    pub segments: Vec<Vec2>,
    pub alive: bool,
    pub last_update: u64,
}

impl NewSnake {
    pub fn with_id(self, id: EntityId) -> SnakeRecord {
        SnakeRecord {
            id,
            name: self.name,
            score: self.score,
            position: self.position,
            angle: self.angle,
            segments: self.segments,
            alive: self.alive,
            last_update: self.last_update,
        }
    }
}

/// Partial update of a snake row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnakePatch {
    pub score: Option<f32>,
    pub position: Option<Vec2>,
    pub angle: Option<f32>,
    pub segments: Option<Vec<Vec2>>,
    pub alive: Option<bool>,
    pub last_update: Option<u64>,
}

impl SnakePatch {
    pub fn apply_to(self, record: &mut SnakeRecord) {
        if let Some(score) = self.score {
            record.score = score;
        }
        if let Some(position) = self.position {
            record.position = position;
        }
        if let Some(angle) = self.angle {
            record.angle = angle;
        }
        if let Some(segments) = self.segments {
            record.segments = segments;
        }
        if let Some(alive) = self.alive {
            record.alive = alive;
        }
        if let Some(last_update) = self.last_update {
            record.last_update = last_update;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Food {
    pub id: FoodId,
    pub position: Vec2,
    pub color: String,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFood {
    pub position: Vec2,
    pub color: String,
    pub value: f32,
}

impl NewFood {
    pub fn with_id(self, id: FoodId) -> Food {
        Food {
            id,
            position: self.position,
            color: self.color,
            value: self.value,
        }
    }
}

/// Filter for reading the snakes table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnakeQuery {
    pub alive_only: bool,
    pub exclude: Option<EntityId>,
    pub order_by_score_desc: bool,
    pub limit: Option<usize>,
}

impl SnakeQuery {
    /// Every live snake except `local_id`.
    pub fn peers(local_id: EntityId) -> Self {
        Self {
            alive_only: true,
            exclude: Some(local_id),
            ..Self::default()
        }
    }

    /// Top `limit` live snakes by score.
    pub fn leaderboard(limit: usize) -> Self {
        Self {
            alive_only: true,
            order_by_score_desc: true,
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &SnakeRecord) -> bool {
        (!self.alive_only || record.alive) && self.exclude != Some(record.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change delivered by the store's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Snake {
        kind: ChangeKind,
        old: Option<SnakeRecord>,
        new: Option<SnakeRecord>,
    },
    Food {
        kind: ChangeKind,
        old: Option<Food>,
        new: Option<Food>,
    },
}

impl ChangeEvent {
    pub fn snake_inserted(record: SnakeRecord) -> Self {
        ChangeEvent::Snake {
            kind: ChangeKind::Insert,
            old: None,
            new: Some(record),
        }
    }

    pub fn snake_updated(old: SnakeRecord, new: SnakeRecord) -> Self {
        ChangeEvent::Snake {
            kind: ChangeKind::Update,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn snake_deleted(old: SnakeRecord) -> Self {
        ChangeEvent::Snake {
            kind: ChangeKind::Delete,
            old: Some(old),
            new: None,
        }
    }

    pub fn food_inserted(food: Food) -> Self {
        ChangeEvent::Food {
            kind: ChangeKind::Insert,
            old: None,
            new: Some(food),
        }
    }

    pub fn food_deleted(food: Food) -> Self {
        ChangeEvent::Food {
            kind: ChangeKind::Delete,
            old: Some(food),
            new: None,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Snake { kind, .. } | ChangeEvent::Food { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: EntityId,
    pub name: String,
    pub score: f32,
}

impl From<&SnakeRecord> for LeaderboardEntry {
    fn from(record: &SnakeRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            score: record.score,
        }
    }
}

/// Current time in milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
