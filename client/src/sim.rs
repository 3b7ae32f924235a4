//! Local simulation of the one snake this client owns.
//!
//! `Snake::step` is the per-frame update. It is plain computation over the
//! snake's own fields and a read-only view of the remote cache; every side
//! effect on the remote store is reported back as `StepEvents` for the
//! session to carry out.

use crate::cache::RemoteCache;
use crate::collision;
use crate::input::InputSnapshot;
use log::trace;
use rand::Rng;
use shared::{
    clamp_to_world, relax_segment, EntityId, FoodId, GameConfig, NewFood, NewSnake, SnakePatch,
    Vec2,
};

/// A food item eaten during a step. The session deletes it remotely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consumed {
    pub food_id: FoodId,
    /// Score the food added.
    pub value: f32,
}

/// What happened during one step.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepEvents {
    /// Foods eaten this step, each listed once.
    pub consumed: Vec<Consumed>,
    /// Replacement food to insert remotely.
    pub spawned: Vec<NewFood>,
    /// Decorative boost trail points, for a renderer.
    pub particles: Vec<Vec2>,
    /// Set on the step the snake dies; the session then scatters its body.
    pub died: bool,
}

/// The locally simulated snake.
///
/// Only this client writes the snake's row. Other clients see it through
/// the throttled pushes and treat it as a read-only remote snake.
#[derive(Debug, Clone, PartialEq)]
pub struct Snake {
    /// Assigned by the remote store once the insert succeeds.
    pub id: Option<EntityId>,
    pub name: String,
    pub score: f32,
    pub position: Vec2,
    pub angle: f32,
    /// Head first; `segments[0]` always equals `position`.
    pub segments: Vec<Vec2>,
    pub alive: bool,
    /// Wall-clock milliseconds of the last push, informational only.
    pub last_update: u64,
}

impl Snake {
    /// Spawns at a random point at least `spawn_margin` away from every wall.
    pub fn initialize<R: Rng + ?Sized>(name: &str, config: &GameConfig, rng: &mut R) -> Self {
        let margin = config.spawn_margin;
        let x = rng.gen_range(margin..=(config.world_width - margin).max(margin));
        let y = rng.gen_range(margin..=(config.world_height - margin).max(margin));
        Self::spawn_at(name, Vec2::new(x, y), config)
    }

    /// Builds the initial chain trailing `position` along the negative x-axis.
    pub fn spawn_at(name: &str, position: Vec2, config: &GameConfig) -> Self {
        let segments = (0..config.initial_length.max(1))
            .map(|i| Vec2::new(position.x - config.segment_spacing * i as f32, position.y))
            .collect();

        Self {
            id: None,
            name: name.to_string(),
            score: config.initial_length as f32,
            position,
            angle: 0.0,
            segments,
            alive: true,
            last_update: 0,
        }
    }

    /// Row to insert when the snake first joins the store.
    pub fn to_new_snake(&self, now_ms: u64) -> NewSnake {
        NewSnake {
            name: self.name.clone(),
            score: self.score,
            position: self.position,
            angle: self.angle,
            segments: self.segments.clone(),
            alive: self.alive,
            last_update: now_ms,
        }
    }

    /// Full-state patch pushed at the throttled cadence.
    pub fn to_patch(&self) -> SnakePatch {
        SnakePatch {
            score: Some(self.score),
            position: Some(self.position),
            angle: Some(self.angle),
            segments: Some(self.segments.clone()),
            alive: Some(self.alive),
            last_update: Some(self.last_update),
        }
    }

    /// Advances the snake by one frame.
    ///
    /// `dt` is normalized so that 1.0 is one nominal frame. Collisions are
    /// evaluated against `cache` exactly as it is passed in.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        input: &InputSnapshot,
        dt: f32,
        cache: &RemoteCache,
        config: &GameConfig,
        rng: &mut R,
    ) -> StepEvents {
        let mut events = StepEvents::default();
        if !self.alive {
            return events;
        }

        self.angle = input.heading();

        let speed = if input.boosting {
            config.boost_speed
        } else {
            config.base_speed
        } * dt;

        let floor = config.initial_length as f32;
        if input.boosting && self.score > floor {
            if chance(rng, config.boost_decay_chance) {
                self.score = (self.score - config.boost_score_cost).max(floor);
            }
            if chance(rng, config.trail_particle_chance) {
                if let Some(tail) = self.segments.last() {
                    events.particles.push(*tail);
                }
            }
        }

        let advanced = self.position.add(&Vec2::from_angle(self.angle).scale(speed));
        let head = clamp_to_world(
            advanced,
            config.world_width,
            config.world_height,
            config.bounds_inset,
        );
        self.relax_chain(head, config.segment_spacing);

        for food in collision::foods_in_reach(self.position, self.score, cache.foods(), config) {
            self.score += food.value;
            events.consumed.push(Consumed {
                food_id: food.id,
                value: food.value,
            });
            if chance(rng, config.food_respawn_chance) {
                events.spawned.push(random_food(config, rng));
            }
        }

        if let Some(other) =
            collision::hits_other_snake(self.position, self.score, cache.snakes(), config)
        {
            trace!("Head hit the body of snake {}", other);
            events.died = true;
        } else if collision::hits_self(self.position, self.score, &self.segments, config) {
            trace!("Head hit its own body");
            events.died = true;
        }

        if events.died {
            self.alive = false;
        } else {
            self.resize_chain(config.segment_target(self.score));
        }

        events
    }

    /// Follow-the-leader rebuild: each point is pulled toward the point
    /// ahead of it only when it has fallen more than `spacing` behind.
    fn relax_chain(&mut self, head: Vec2, spacing: f32) {
        self.position = head;
        if self.segments.is_empty() {
            self.segments.push(head);
            return;
        }

        self.segments[0] = head;
        for i in 1..self.segments.len() {
            self.segments[i] = relax_segment(self.segments[i - 1], self.segments[i], spacing);
        }
    }

    /// Grows by repeating the tail point, shrinks by dropping tail points.
    fn resize_chain(&mut self, target: usize) {
        let tail = self.segments.last().copied().unwrap_or(self.position);
        if self.segments.len() < target {
            self.segments.resize(target, tail);
        } else {
            self.segments.truncate(target.max(1));
        }
    }
}

/// Turns every body point into a food item near where it lay.
pub fn scatter_food<R: Rng + ?Sized>(segments: &[Vec2], config: &GameConfig, rng: &mut R) -> Vec<NewFood> {
    let jitter = config.death_scatter_jitter.max(0.0);
    segments
        .iter()
        .map(|segment| {
            let offset = Vec2::new(
                rng.gen_range(-jitter..=jitter),
                rng.gen_range(-jitter..=jitter),
            );
            NewFood {
                position: clamp_to_world(
                    segment.add(&offset),
                    config.world_width,
                    config.world_height,
                    0.0,
                ),
                color: random_color(rng),
                value: config.food_value,
            }
        })
        .collect()
}

/// A food item at a uniformly random point inside the walls.
pub fn random_food<R: Rng + ?Sized>(config: &GameConfig, rng: &mut R) -> NewFood {
    let inset = config.bounds_inset;
    NewFood {
        position: Vec2::new(
            rng.gen_range(inset..=(config.world_width - inset).max(inset)),
            rng.gen_range(inset..=(config.world_height - inset).max(inset)),
        ),
        color: random_color(rng),
        value: config.food_value,
    }
}

/// Fully saturated color with a random hue, in CSS `hsl()` form.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("hsl({}, 100%, 50%)", rng.gen_range(0..360))
}

fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    probability > 0.0 && rng.gen::<f64>() < probability
}
