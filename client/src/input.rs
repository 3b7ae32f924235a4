//! Steering input: pointer position relative to the viewport center plus a
//! boost flag, sampled once per frame.

use crate::cache::RemoteCache;
use crate::sim::Snake;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{GameConfig, Vec2};
use tokio::sync::watch;

/// One frame's worth of steering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSnapshot {
    pub pointer: Vec2,
    pub viewport_center: Vec2,
    pub boosting: bool,
}

impl InputSnapshot {
    /// The snake heads toward the pointer as seen from the screen center.
    pub fn heading(&self) -> f32 {
        self.pointer.sub(&self.viewport_center).angle()
    }

    pub fn toward(angle: f32, boosting: bool) -> Self {
        Self {
            pointer: Vec2::from_angle(angle).scale(100.0),
            viewport_center: Vec2::ZERO,
            boosting,
        }
    }
}

/// What an input source may look at when deciding the next snapshot.
pub struct FrameView<'a> {
    pub snake: &'a Snake,
    pub cache: &'a RemoteCache,
    pub config: &'a GameConfig,
}

pub trait InputSource {
    fn sample(&mut self, view: &FrameView<'_>) -> InputSnapshot;
}

/// Creates a pointer feed for a viewport of `width` x `height` pixels.
///
/// The feed side is handed to whatever owns the window or terminal; the
/// input side is polled by the game loop.
pub fn pointer_channel(width: f32, height: f32) -> (PointerFeed, PointerInput) {
    let center = Vec2::new(width / 2.0, height / 2.0);
    let (tx, rx) = watch::channel(InputSnapshot {
        pointer: center,
        viewport_center: center,
        boosting: false,
    });
    (PointerFeed { tx }, PointerInput { rx })
}

#[derive(Debug, Clone)]
pub struct PointerFeed {
    tx: watch::Sender<InputSnapshot>,
}

impl PointerFeed {
    pub fn moved(&self, pointer: Vec2) {
        self.tx.send_modify(|snapshot| snapshot.pointer = pointer);
    }

    pub fn pressed(&self, boosting: bool) {
        self.tx.send_modify(|snapshot| snapshot.boosting = boosting);
    }
}

/// Latest pointer state, read without blocking.
#[derive(Debug)]
pub struct PointerInput {
    rx: watch::Receiver<InputSnapshot>,
}

impl InputSource for PointerInput {
    fn sample(&mut self, _view: &FrameView<'_>) -> InputSnapshot {
        *self.rx.borrow()
    }
}

/// Steers toward the nearest food while turning away from walls.
pub struct Autopilot {
    heading: f32,
    max_turn: f32,
    wall_margin: f32,
    boost_chance: f64,
    rng: StdRng,
}

impl Autopilot {
    pub fn new(seed: u64) -> Self {
        Self {
            heading: 0.0,
            max_turn: 0.15,
            wall_margin: 150.0,
            boost_chance: 0.05,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn desired_heading(&self, view: &FrameView<'_>) -> f32 {
        let head = view.snake.position;
        let config = view.config;

        let mut away = Vec2::ZERO;
        if head.x < self.wall_margin {
            away.x += 1.0;
        }
        if head.x > config.world_width - self.wall_margin {
            away.x -= 1.0;
        }
        if head.y < self.wall_margin {
            away.y += 1.0;
        }
        if head.y > config.world_height - self.wall_margin {
            away.y -= 1.0;
        }
        if away != Vec2::ZERO {
            return away.angle();
        }

        view.cache
            .foods()
            .min_by(|a, b| {
                head.distance(&a.position)
                    .total_cmp(&head.distance(&b.position))
            })
            .map(|food| food.position.sub(&head).angle())
            .unwrap_or(self.heading)
    }
}

impl InputSource for Autopilot {
    fn sample(&mut self, view: &FrameView<'_>) -> InputSnapshot {
        let target = self.desired_heading(view);
        let delta = angle_delta(self.heading, target).clamp(-self.max_turn, self.max_turn);
        self.heading += delta;

        let boosting = self.rng.gen::<f64>() < self.boost_chance;
        InputSnapshot::toward(self.heading, boosting)
    }
}

/// Signed shortest rotation from `from` to `to`, in `(-PI, PI]`.
pub fn angle_delta(from: f32, to: f32) -> f32 {
    let tau = std::f32::consts::TAU;
    let mut delta = (to - from) % tau;
    if delta > std::f32::consts::PI {
        delta -= tau;
    } else if delta <= -std::f32::consts::PI {
        delta += tau;
    }
    delta
}
