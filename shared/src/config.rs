//! Tunable game parameters shared by the simulation and the sync layer.

use crate::{
    BASE_SPEED, BOOST_SPEED, HEAD_GROWTH, HEAD_RADIUS_BASE, INITIAL_LENGTH, REMOTE_HEAD_GROWTH,
    SEGMENT_SPACING, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::time::Duration;

/// Every constant the engine and the synchronization layer depend on.
///
/// The defaults are the classic arena tuning. Variants of the game differ
/// only in these numbers, never in the algorithms that consume them.
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub world_width: f32,
    pub world_height: f32,
    /// Distance from each wall the head is clamped to.
    pub bounds_inset: f32,
    /// Spawn points keep at least this distance from every wall.
    pub spawn_margin: f32,

    pub initial_length: usize,
    pub segment_spacing: f32,
    /// World units per nominal frame.
    pub base_speed: f32,
    pub boost_speed: f32,
    /// Wall-clock duration that counts as one unit of delta time.
    pub nominal_frame: Duration,

    pub head_radius_base: f32,
    /// Score multiplier for the local snake's radius.
    pub head_growth: f32,
    /// Score multiplier for remote snakes' radius.
    pub remote_head_growth: f32,
    /// Extra reach added to the head radius when eating.
    pub consume_radius: f32,
    /// Own segments nearest the head that never count as a self hit.
    pub self_collision_skip: usize,

    pub food_value: f32,
    pub food_respawn_chance: f64,
    pub boost_decay_chance: f64,
    pub boost_score_cost: f32,
    pub trail_particle_chance: f64,
    pub death_scatter_jitter: f32,

    pub min_food_count: usize,
    pub leaderboard_limit: usize,
    pub push_interval: Duration,
    pub peer_poll_interval: Duration,
    pub leaderboard_poll_interval: Duration,
    pub food_top_up_interval: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world_width: WORLD_WIDTH,
            world_height: WORLD_HEIGHT,
            bounds_inset: 10.0,
            spawn_margin: 200.0,
            initial_length: INITIAL_LENGTH,
            segment_spacing: SEGMENT_SPACING,
            base_speed: BASE_SPEED,
            boost_speed: BOOST_SPEED,
            nominal_frame: Duration::from_micros(16_667),
            head_radius_base: HEAD_RADIUS_BASE,
            head_growth: HEAD_GROWTH,
            remote_head_growth: REMOTE_HEAD_GROWTH,
            consume_radius: 5.0,
            self_collision_skip: 10,
            food_value: 1.0,
            food_respawn_chance: 0.5,
            boost_decay_chance: 0.3,
            boost_score_cost: 0.2,
            trail_particle_chance: 0.5,
            death_scatter_jitter: 10.0,
            min_food_count: 150,
            leaderboard_limit: 10,
            push_interval: Duration::from_millis(100),
            peer_poll_interval: Duration::from_secs(5),
            leaderboard_poll_interval: Duration::from_secs(2),
            food_top_up_interval: Duration::from_secs(10),
        }
    }
}

impl GameConfig {
    /// Radius of the local snake's circles at `score`.
    pub fn local_radius(&self, score: f32) -> f32 {
        crate::geometry::radius_for_score(self.head_radius_base, self.head_growth, score)
    }

    /// Radius of a remote snake's circles at `score`.
    pub fn remote_radius(&self, score: f32) -> f32 {
        crate::geometry::radius_for_score(self.head_radius_base, self.remote_head_growth, score)
    }

    /// Number of body points a snake with `score` carries.
    pub fn segment_target(&self, score: f32) -> usize {
        (score.max(0.0).floor() as usize).max(self.initial_length)
    }

    /// Converts an elapsed wall-clock interval into normalized delta time.
    pub fn delta_time(&self, elapsed: Duration) -> f32 {
        elapsed.as_secs_f32() / self.nominal_frame.as_secs_f32()
    }
}
