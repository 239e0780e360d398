//! Analytic geometry and a tick harness so movement can be tested without a physics app.

use crate::{
    CharacterController, CharacterControllerState,
    machine::{self, Tick},
    mode::MovementEvent,
    prelude::*,
    probe::{
        Anchor, CapsuleShape, FloorHit, MovementWorld, RopeSpan, SlideMove, SweepHit,
        TrajectoryHit,
    },
    replication::NetRole,
};

const SWEEP_SAMPLES: usize = 64;
const TRAJECTORY_STEP: f32 = 1.0 / 120.0;
const TRAJECTORY_STEPS: usize = 360;
const ROPE_THICKNESS: f32 = 0.05;
const PENETRATION_SLOP: f32 = 1.0e-4;

/// A horizontal floor plus spherical blockers, hook anchors and rope spans.
pub(crate) struct FlatWorld {
    pub floor_height: f32,
    /// Half size of a square floor centered on the origin. `None` is an endless floor.
    pub floor_extent: Option<f32>,
    pub water_level: Option<f32>,
    blockers: Vec<(Entity, Vec3, f32)>,
    anchors: Vec<Anchor>,
    ropes: Vec<(Entity, RopeSpan)>,
    entities: World,
}

impl Default for FlatWorld {
    fn default() -> Self {
        Self {
            floor_height: 0.0,
            floor_extent: None,
            water_level: None,
            blockers: Vec::new(),
            anchors: Vec::new(),
            ropes: Vec::new(),
            entities: World::new(),
        }
    }
}

impl FlatWorld {
    pub fn add_anchors<const N: usize>(&mut self, locations: [Vec3; N]) -> [Entity; N] {
        locations.map(|location| {
            let entity = self.entities.spawn_empty().id();
            self.anchors.push(Anchor { entity, location });
            entity
        })
    }

    pub fn add_blocker(&mut self, center: Vec3, radius: f32) -> Entity {
        let entity = self.entities.spawn_empty().id();
        self.blockers.push((entity, center, radius));
        entity
    }

    pub fn add_rope(&mut self, span: RopeSpan) -> Entity {
        let entity = self.entities.spawn_empty().id();
        self.ropes.push((entity, span));
        entity
    }

    fn has_floor_at(&self, point: Vec3) -> bool {
        self.floor_extent
            .is_none_or(|extent| point.x.abs() <= extent && point.z.abs() <= extent)
    }

    fn floor_penetration(&self, position: Vec3, capsule: CapsuleShape) -> Option<f32> {
        let depth = self.floor_height - capsule.bottom(position);
        (self.has_floor_at(position) && depth > PENETRATION_SLOP).then_some(depth)
    }

    /// First thing the capsule overlaps at `position`, with the surface normal.
    fn contact(&self, position: Vec3, capsule: CapsuleShape, ignore: &[Entity]) -> Option<(Vec3, Option<Entity>)> {
        if self.floor_penetration(position, capsule).is_some() {
            return Some((Vec3::Y, None));
        }
        let center = capsule.center(position);
        self.blockers
            .iter()
            .filter(|(entity, ..)| !ignore.contains(entity))
            .find_map(|&(entity, blocker, radius)| {
                let closest = axis_point(center, capsule, blocker);
                (blocker.distance(closest) < radius + capsule.radius).then(|| {
                    let normal = (closest - blocker).normalize_or(Vec3::Y);
                    (normal, Some(entity))
                })
            })
    }
}

/// Point on the capsule's inner segment closest to `point`.
fn axis_point(center: Vec3, capsule: CapsuleShape, point: Vec3) -> Vec3 {
    let half_segment = (capsule.half_height - capsule.radius).max(0.0);
    center + Vec3::Y * (point.y - center.y).clamp(-half_segment, half_segment)
}

fn segment_distance(start: Vec3, end: Vec3, point: Vec3) -> f32 {
    let span = end - start;
    let len_sq = span.length_squared();
    if len_sq <= f32::EPSILON {
        return point.distance(start);
    }
    let t = ((point - start).dot(span) / len_sq).clamp(0.0, 1.0);
    point.distance(start + span * t)
}

impl MovementWorld for FlatWorld {
    fn line_probe(&self, start: Vec3, end: Vec3) -> bool {
        let (low, high) = (start.y.min(end.y), start.y.max(end.y));
        if low <= self.floor_height && high >= self.floor_height {
            let t = if (end.y - start.y).abs() <= f32::EPSILON {
                0.0
            } else {
                (self.floor_height - start.y) / (end.y - start.y)
            };
            if self.has_floor_at(start.lerp(end, t)) {
                return true;
            }
        }
        self.blockers
            .iter()
            .any(|&(_, center, radius)| segment_distance(start, end, center) <= radius)
    }

    fn sweep_capsule(
        &self,
        start: Vec3,
        end: Vec3,
        capsule: CapsuleShape,
        ignore: &[Entity],
    ) -> Option<SweepHit> {
        if let Some((normal, entity)) = self.contact(start, capsule, ignore) {
            return Some(SweepHit {
                location: start,
                normal,
                distance: 0.0,
                entity,
            });
        }
        let blocked_at = (1..=SWEEP_SAMPLES)
            .map(|i| i as f32 / SWEEP_SAMPLES as f32)
            .find(|&t| self.contact(start.lerp(end, t), capsule, ignore).is_some())?;

        let (mut free, mut blocked) = (blocked_at - 1.0 / SWEEP_SAMPLES as f32, blocked_at);
        for _ in 0..24 {
            let mid = (free + blocked) * 0.5;
            if self.contact(start.lerp(end, mid), capsule, ignore).is_some() {
                blocked = mid;
            } else {
                free = mid;
            }
        }
        let (normal, entity) = self.contact(start.lerp(end, blocked), capsule, ignore)?;
        Some(SweepHit {
            location: start.lerp(end, free),
            normal,
            distance: start.distance(end) * free,
            entity,
        })
    }

    fn predict_trajectory(
        &self,
        start: Vec3,
        launch_velocity: Vec3,
        gravity: f32,
        probe_radius: f32,
    ) -> Option<TrajectoryHit> {
        (1..=TRAJECTORY_STEPS).find_map(|step| {
            let t = step as f32 * TRAJECTORY_STEP;
            let point = start + launch_velocity * t + Vec3::NEG_Y * 0.5 * gravity * t * t;
            if let Some(&(entity, _)) = self.ropes.iter().find(|(_, span)| {
                segment_distance(span.start, span.end, point) <= probe_radius + ROPE_THICKNESS
            }) {
                return Some(TrajectoryHit {
                    location: point,
                    entity: Some(entity),
                });
            }
            if let Some(&(entity, ..)) = self
                .blockers
                .iter()
                .find(|&&(_, center, radius)| point.distance(center) <= probe_radius + radius)
            {
                return Some(TrajectoryHit {
                    location: point,
                    entity: Some(entity),
                });
            }
            (point.y - probe_radius <= self.floor_height && self.has_floor_at(point)).then_some(
                TrajectoryHit {
                    location: point,
                    entity: None,
                },
            )
        })
    }

    fn find_floor(
        &self,
        position: Vec3,
        capsule: CapsuleShape,
        max_distance: f32,
    ) -> Option<FloorHit> {
        if !self.has_floor_at(position) {
            return None;
        }
        let gap = capsule.bottom(position) - self.floor_height;
        (gap >= -0.05 && gap <= max_distance).then_some(FloorHit {
            normal: Vec3::Y,
            distance: gap.max(0.0),
            entity: None,
        })
    }

    fn move_and_slide(
        &self,
        position: Vec3,
        velocity: Vec3,
        dt: f32,
        capsule: CapsuleShape,
        _ground_normal: Option<Vec3>,
    ) -> SlideMove {
        let mut target = position + velocity * dt;
        let mut velocity = velocity;

        let was_above = capsule.bottom(position) >= self.floor_height - 1.0e-3;
        if was_above && let Some(depth) = self.floor_penetration(target, capsule) {
            target.y += depth;
            velocity.y = velocity.y.max(0.0);
        }

        for &(_, blocker, radius) in &self.blockers {
            let center = capsule.center(target);
            let closest = axis_point(center, capsule, blocker);
            let reach = radius + capsule.radius;
            let distance = closest.distance(blocker);
            if distance >= reach {
                continue;
            }
            let normal = (closest - blocker).normalize_or(Vec3::Y);
            target += normal * (reach - distance);
            velocity -= normal * velocity.dot(normal).min(0.0);
        }

        SlideMove {
            position: target,
            velocity,
        }
    }

    fn depenetrate(&self, position: Vec3, capsule: CapsuleShape) -> Vec3 {
        self.floor_penetration(position, capsule)
            .map_or(Vec3::ZERO, |depth| Vec3::Y * depth)
    }

    fn overlaps(&self, position: Vec3, capsule: CapsuleShape) -> bool {
        self.contact(position, capsule, &[]).is_some()
    }

    fn is_submerged(&self, point: Vec3) -> bool {
        self.water_level.is_some_and(|level| point.y < level)
    }

    fn hook_anchors(&self) -> Vec<Anchor> {
        self.anchors.clone()
    }

    fn rope_span(&self, entity: Entity) -> Option<RopeSpan> {
        self.ropes
            .iter()
            .find_map(|&(rope, span)| (rope == entity).then_some(span))
    }
}

/// One character standing on a [`FlatWorld`].
pub(crate) struct Harness {
    pub transform: Transform,
    pub velocity: Vec3,
    pub state: CharacterControllerState,
    pub cfg: CharacterController,
    pub world: FlatWorld,
    pub role: NetRole,
    /// Every event emitted since the harness was created.
    pub events: Vec<MovementEvent>,
}

impl Harness {
    pub fn walking() -> Self {
        let cfg = CharacterController::default();
        let state = CharacterControllerState {
            grounded: Some(FloorHit {
                normal: Vec3::Y,
                distance: 0.0,
                entity: None,
            }),
            ..default()
        };
        Self {
            transform: Transform::from_xyz(0.0, cfg.standing_half_height, 0.0),
            velocity: Vec3::ZERO,
            state,
            cfg,
            world: FlatWorld::default(),
            role: NetRole::Standalone,
            events: Vec::new(),
        }
    }

    pub fn with_tick<R>(&mut self, f: impl FnOnce(&mut Tick) -> R) -> R {
        self.with_tick_dt(1.0 / 60.0, f)
    }

    pub fn with_tick_dt<R>(&mut self, dt: f32, f: impl FnOnce(&mut Tick) -> R) -> R {
        let mut tick = Tick {
            transform: &mut self.transform,
            velocity: &mut self.velocity,
            state: &mut self.state,
            cfg: &self.cfg,
            world: &self.world,
            role: self.role,
            dt,
            events: &mut self.events,
        };
        f(&mut tick)
    }

    pub fn advance(&mut self, dt: f32) {
        self.with_tick_dt(dt, machine::advance_tick);
    }
}
