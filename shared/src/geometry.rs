use serde::{Deserialize, Serialize};

///Represents a point or a vector in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down, matching screen coordinates.
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Unit vector pointing along `angle` (radians).
    pub fn from_angle(angle: f32) -> Vec2 {
        Vec2 {
            x: angle.cos(),
            y: angle.sin(),
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vec2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vec2::ZERO
        } else {
            Vec2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vec2 {
        Vec2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns `self - other`.
    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    ///Euclidean distance between two points.
    pub fn distance(&self, other: &Vec2) -> f32 {
        self.sub(other).magnitude()
    }

    ///Angle of the vector in radians, as `atan2(y, x)`.
    pub fn angle(&self) -> f32 {
        self.y.atan2(self.x)
    }
}

/// Moves `current` so it trails `prev` by at most `spacing`.
///
/// When the two points are already within `spacing` of each other the point
/// stays where it is; otherwise it is pulled along the `prev -> current`
/// direction to exactly `spacing` away from `prev`.
pub fn relax_segment(prev: Vec2, current: Vec2, spacing: f32) -> Vec2 {
    let offset = current.sub(&prev);
    let distance = offset.magnitude();
    if distance <= spacing {
        return current;
    }
    prev.add(&offset.scale(spacing / distance))
}

/// Hard clamp into `[inset, size - inset]` on both axes.
pub fn clamp_to_world(pos: Vec2, width: f32, height: f32, inset: f32) -> Vec2 {
    Vec2 {
        x: pos.x.max(inset).min(width - inset),
        y: pos.y.max(inset).min(height - inset),
    }
}

/// Circle radius for a snake of the given score.
pub fn radius_for_score(base: f32, growth: f32, score: f32) -> f32 {
    base + score * growth
}

/// True when two circles overlap. Touching exactly does not count.
pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
    a.distance(&b) < radius_a + radius_b
}
