//! Circle-overlap checks run once per step against the remote cache.

use shared::{circles_overlap, EntityId, Food, GameConfig, SnakeRecord, Vec2};

/// Foods close enough to the head to be eaten this step.
///
/// The reach is the local head radius at `score` plus the consume radius;
/// a food exactly at the reach distance is not eaten.
pub fn foods_in_reach<'a, I>(head: Vec2, score: f32, foods: I, config: &GameConfig) -> Vec<&'a Food>
where
    I: IntoIterator<Item = &'a Food>,
{
    let reach = config.local_radius(score) + config.consume_radius;
    foods
        .into_iter()
        .filter(|food| head.distance(&food.position) < reach)
        .collect()
}

/// Returns the id of the first remote snake whose body the head overlaps.
///
/// A remote snake's head point (index 0) is not a hazard, only its body.
pub fn hits_other_snake<'a, I>(head: Vec2, score: f32, snakes: I, config: &GameConfig) -> Option<EntityId>
where
    I: IntoIterator<Item = &'a SnakeRecord>,
{
    let head_radius = config.local_radius(score);
    for snake in snakes {
        let body_radius = config.remote_radius(snake.score);
        let hit = snake
            .segments
            .iter()
            .skip(1)
            .any(|segment| circles_overlap(head, head_radius, *segment, body_radius));
        if hit {
            return Some(snake.id);
        }
    }
    None
}

/// True when the head overlaps its own body past the neck tolerance band.
pub fn hits_self(head: Vec2, score: f32, segments: &[Vec2], config: &GameConfig) -> bool {
    let radius = config.local_radius(score);
    segments
        .iter()
        .skip(config.self_collision_skip)
        .any(|segment| circles_overlap(head, radius, *segment, radius))
}
