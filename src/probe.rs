//! The world queries the movement core needs, expressed as a trait so the same tick can
//! run against Avian in a game and against analytic geometry in tests.

use crate::prelude::*;

/// Upright capsule used for every query. `half_height` includes the hemispherical caps.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct CapsuleShape {
    pub radius: f32,
    pub half_height: f32,
    /// Vertical offset of the capsule center from the character's translation.
    pub offset_y: f32,
}

impl CapsuleShape {
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height,
            offset_y: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.radius > 0.0 && self.half_height >= self.radius && self.offset_y.is_finite()
    }

    pub fn height(&self) -> f32 {
        self.half_height * 2.0
    }

    pub fn center(&self, translation: Vec3) -> Vec3 {
        translation + Vec3::Y * self.offset_y
    }

    pub fn bottom(&self, translation: Vec3) -> f32 {
        self.center(translation).y - self.half_height
    }
}

/// Walkable-or-not surface found below the capsule.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct FloorHit {
    pub normal: Vec3,
    /// Gap between the capsule bottom and the surface.
    pub distance: f32,
    pub entity: Option<Entity>,
}

impl FloorHit {
    pub fn is_walkable(&self, min_walk_cos: f32) -> bool {
        self.normal.y >= min_walk_cos
    }
}

/// First blocking contact of a capsule sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Translation of the character at the moment of contact.
    pub location: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub entity: Option<Entity>,
}

impl SweepHit {
    /// Started the sweep already overlapping something.
    pub fn intersects(&self) -> bool {
        self.distance <= 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrajectoryHit {
    pub location: Vec3,
    pub entity: Option<Entity>,
}

/// Result of a collide-and-slide move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlideMove {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// A world entity tagged as a grappling hook anchor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub entity: Entity,
    pub location: Vec3,
}

/// The cable of a rope actor in world space.
#[derive(Component, Clone, Copy, Reflect, Debug, PartialEq)]
#[reflect(Component)]
pub struct RopeSpan {
    pub start: Vec3,
    pub end: Vec3,
    /// Side of the rope the character hangs on.
    pub normal: Vec3,
}

impl RopeSpan {
    pub fn direction(&self) -> Vec3 {
        (self.end - self.start).normalize_or_zero()
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        let span = self.end - self.start;
        let len_sq = span.length_squared();
        if len_sq <= f32::EPSILON {
            return self.start;
        }
        let t = ((point - self.start).dot(span) / len_sq).clamp(0.0, 1.0);
        self.start + span * t
    }
}

/// Geometry and collision capability consumed by the movement core.
///
/// All positions are character translations; implementations offset them by
/// [`CapsuleShape::offset_y`] themselves. The character itself is always ignored.
pub trait MovementWorld {
    /// Whether the segment hits blocking geometry.
    fn line_probe(&self, start: Vec3, end: Vec3) -> bool;

    /// Sweep `capsule` from `start` to `end`, ignoring `ignore`.
    fn sweep_capsule(
        &self,
        start: Vec3,
        end: Vec3,
        capsule: CapsuleShape,
        ignore: &[Entity],
    ) -> Option<SweepHit>;

    /// Follow a ballistic path from `start` with `launch_velocity` under `gravity`.
    fn predict_trajectory(
        &self,
        start: Vec3,
        launch_velocity: Vec3,
        gravity: f32,
        probe_radius: f32,
    ) -> Option<TrajectoryHit>;

    /// Surface below the capsule within `max_distance`.
    fn find_floor(&self, position: Vec3, capsule: CapsuleShape, max_distance: f32)
    -> Option<FloorHit>;

    /// Move by `velocity * dt`, sliding along whatever is hit.
    fn move_and_slide(
        &self,
        position: Vec3,
        velocity: Vec3,
        dt: f32,
        capsule: CapsuleShape,
        ground_normal: Option<Vec3>,
    ) -> SlideMove;

    /// Offset that pushes the capsule out of penetration.
    fn depenetrate(&self, _position: Vec3, _capsule: CapsuleShape) -> Vec3 {
        Vec3::ZERO
    }

    fn overlaps(&self, position: Vec3, capsule: CapsuleShape) -> bool;

    fn is_submerged(&self, _position: Vec3) -> bool {
        false
    }

    fn hook_anchors(&self) -> Vec<Anchor>;

    fn rope_span(&self, entity: Entity) -> Option<RopeSpan>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_point_clamps_to_segment() {
        let rope = RopeSpan {
            start: Vec3::new(0.0, 5.0, 0.0),
            end: Vec3::new(10.0, 5.0, 0.0),
            normal: Vec3::Z,
        };
        assert_eq!(rope.closest_point(Vec3::new(4.0, 0.0, 3.0)), Vec3::new(4.0, 5.0, 0.0));
        assert_eq!(rope.closest_point(Vec3::new(-4.0, 5.0, 0.0)), rope.start);
        assert_eq!(rope.closest_point(Vec3::new(40.0, 5.0, 0.0)), rope.end);
        assert_eq!(rope.direction(), Vec3::X);
    }

    #[test]
    fn capsule_validity() {
        assert!(CapsuleShape::new(0.4, 0.9).is_valid());
        assert!(!CapsuleShape::new(0.0, 0.9).is_valid());
        assert!(!CapsuleShape::new(0.5, 0.3).is_valid());
        let crouched = CapsuleShape {
            offset_y: -0.3,
            ..CapsuleShape::new(0.4, 0.6)
        };
        assert!(crouched.bottom(Vec3::new(0.0, 0.9, 0.0)).abs() < 1.0e-6);
    }
}
