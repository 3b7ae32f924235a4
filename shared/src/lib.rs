pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod protocol;
pub mod tables;

pub use config::GameConfig;
pub use error::StoreError;
pub use geometry::{circles_overlap, clamp_to_world, radius_for_score, relax_segment, Vec2};
pub use model::{
    now_millis, ChangeEvent, ChangeKind, EntityId, Food, FoodId, LeaderboardEntry, NewFood,
    NewSnake, SnakePatch, SnakeQuery, SnakeRecord,
};
pub use protocol::{split_reply, Packet, ReplyAssembler, StoreOp, StoreReply};
pub use tables::Tables;

pub const WORLD_WIDTH: f32 = 3000.0;
pub const WORLD_HEIGHT: f32 = 3000.0;
pub const INITIAL_LENGTH: usize = 10;
pub const SEGMENT_SPACING: f32 = 8.0;
pub const BASE_SPEED: f32 = 3.0;
pub const BOOST_SPEED: f32 = 6.0;
pub const HEAD_RADIUS_BASE: f32 = 10.0;
pub const HEAD_GROWTH: f32 = 0.1;
pub const REMOTE_HEAD_GROWTH: f32 = 0.08;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_fits_spawn_margin() {
        let config = GameConfig::default();
        assert!(config.spawn_margin * 2.0 < WORLD_WIDTH);
        assert!(config.spawn_margin * 2.0 < WORLD_HEIGHT);
        assert!(config.spawn_margin > config.bounds_inset);
    }

    #[test]
    fn test_boost_is_faster() {
        assert!(BOOST_SPEED > BASE_SPEED);
    }

    #[test]
    fn test_remote_growth_is_smaller() {
        assert!(REMOTE_HEAD_GROWTH < HEAD_GROWTH);
    }
}
