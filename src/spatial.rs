//! [`MovementWorld`] backed by Avian's spatial queries and move-and-slide.

use core::time::Duration;

use bevy_ecs::system::SystemParam;

use crate::{
    CharacterControllerState,
    prelude::*,
    probe::{
        Anchor, CapsuleShape, FloorHit, MovementWorld, RopeSpan, SlideMove, SweepHit,
        TrajectoryHit,
    },
    water,
};

/// Marks an entity the grappling hook can latch onto.
#[derive(Component, Clone, Copy, Reflect, Debug, Default)]
#[reflect(Component)]
#[require(Transform, GlobalTransform)]
pub struct HookAnchor;

/// Length of one straight piece of a predicted trajectory, in seconds of flight.
const TRAJECTORY_SEGMENT: f32 = 1.0 / 30.0;
const TRAJECTORY_SEGMENTS: usize = 90;

pub fn capsule_collider(capsule: CapsuleShape) -> Collider {
    Collider::capsule(
        capsule.radius,
        2.0 * (capsule.half_height - capsule.radius).max(0.0),
    )
}

#[derive(SystemParam)]
pub struct ParkourWorld<'w, 's> {
    move_and_slide: MoveAndSlide<'w, 's>,
    anchors: Query<'w, 's, (Entity, &'static GlobalTransform), With<HookAnchor>>,
    ropes: Query<'w, 's, &'static RopeSpan>,
    waters: Query<'w, 's, (&'static Collider, &'static Position, &'static Rotation), With<Water>>,
}

impl<'w, 's> ParkourWorld<'w, 's> {
    /// The world as seen by one character, which never collides with itself.
    pub fn for_character<'a>(
        &'a self,
        cfg: &CharacterController,
        state: &CharacterControllerState,
    ) -> AvianWorld<'a, 'w, 's> {
        AvianWorld {
            world: self,
            standing: state.standing_collider.clone(),
            crouching: state.crouching_collider.clone(),
            standing_half_height: cfg.standing_half_height,
            filter: cfg.filter.clone(),
            config: cfg.move_and_slide.clone(),
        }
    }
}

pub struct AvianWorld<'a, 'w, 's> {
    world: &'a ParkourWorld<'w, 's>,
    standing: Collider,
    crouching: Collider,
    standing_half_height: f32,
    filter: SpatialQueryFilter,
    config: MoveAndSlideConfig,
}

impl AvianWorld<'_, '_, '_> {
    fn collider(&self, capsule: CapsuleShape) -> &Collider {
        if capsule.half_height < self.standing_half_height {
            &self.crouching
        } else {
            &self.standing
        }
    }

    fn filter_without(&self, ignore: &[Entity]) -> SpatialQueryFilter {
        let mut filter = self.filter.clone();
        filter.excluded_entities.extend(ignore.iter().copied());
        filter
    }
}

impl MovementWorld for AvianWorld<'_, '_, '_> {
    fn line_probe(&self, start: Vec3, end: Vec3) -> bool {
        let Ok((direction, length)) = Dir3::new_and_length(end - start) else {
            return false;
        };
        self.world
            .move_and_slide
            .query_pipeline
            .cast_ray(start, direction, length, true, &self.filter)
            .is_some()
    }

    fn sweep_capsule(
        &self,
        start: Vec3,
        end: Vec3,
        capsule: CapsuleShape,
        ignore: &[Entity],
    ) -> Option<SweepHit> {
        let movement = end - start;
        let direction = movement.try_normalize()?;
        let hit = self.world.move_and_slide.cast_move(
            self.collider(capsule),
            capsule.center(start),
            Quat::IDENTITY,
            movement,
            self.config.skin_width,
            &self.filter_without(ignore),
        )?;
        Some(SweepHit {
            location: start + direction * hit.distance,
            normal: hit.normal1,
            distance: hit.distance,
            entity: Some(hit.entity),
        })
    }

    fn predict_trajectory(
        &self,
        start: Vec3,
        launch_velocity: Vec3,
        gravity: f32,
        probe_radius: f32,
    ) -> Option<TrajectoryHit> {
        let probe = Collider::sphere(probe_radius);
        let point_at = |t: f32| start + launch_velocity * t + Vec3::NEG_Y * 0.5 * gravity * t * t;
        (0..TRAJECTORY_SEGMENTS).find_map(|segment| {
            let from = point_at(segment as f32 * TRAJECTORY_SEGMENT);
            let to = point_at((segment + 1) as f32 * TRAJECTORY_SEGMENT);
            let (direction, length) = Dir3::new_and_length(to - from).ok()?;
            let hit = self.world.move_and_slide.query_pipeline.cast_shape(
                &probe,
                from,
                Quat::IDENTITY,
                direction,
                &ShapeCastConfig::from_max_distance(length),
                &self.filter,
            )?;
            Some(TrajectoryHit {
                location: from + direction * hit.distance,
                entity: Some(hit.entity),
            })
        })
    }

    fn find_floor(
        &self,
        position: Vec3,
        capsule: CapsuleShape,
        max_distance: f32,
    ) -> Option<FloorHit> {
        let hit = self.world.move_and_slide.cast_move(
            self.collider(capsule),
            capsule.center(position),
            Quat::IDENTITY,
            Vec3::NEG_Y * max_distance,
            self.config.skin_width,
            &self.filter,
        )?;
        Some(FloorHit {
            normal: hit.normal1,
            distance: hit.distance,
            entity: Some(hit.entity),
        })
    }

    fn move_and_slide(
        &self,
        position: Vec3,
        velocity: Vec3,
        dt: f32,
        capsule: CapsuleShape,
        ground_normal: Option<Vec3>,
    ) -> SlideMove {
        let mut config = self.config.clone();
        if let Some(normal) = ground_normal.and_then(|normal| Dir3::new(normal).ok()) {
            config.planes.push(normal);
        }
        let offset = Vec3::Y * capsule.offset_y;
        let out = self.world.move_and_slide.move_and_slide(
            self.collider(capsule),
            position + offset,
            Quat::IDENTITY,
            velocity,
            Duration::from_secs_f32(dt.max(0.0)),
            &config,
            &self.filter,
            |_| true,
        );
        SlideMove {
            position: out.position - offset,
            velocity: out.projected_velocity,
        }
    }

    fn depenetrate(&self, position: Vec3, capsule: CapsuleShape) -> Vec3 {
        self.world.move_and_slide.depenetrate(
            self.collider(capsule),
            capsule.center(position),
            Quat::IDENTITY,
            &((&self.config).into()),
            &self.filter,
        )
    }

    fn overlaps(&self, position: Vec3, capsule: CapsuleShape) -> bool {
        let mut intersecting = false;
        // No skin width here: a crouched character closer than the skin to a ceiling can
        // still stand up.
        self.world
            .move_and_slide
            .query_pipeline
            .shape_intersections_callback(
                self.collider(capsule),
                capsule.center(position),
                Quat::IDENTITY,
                &self.filter,
                |_| {
                    intersecting = true;
                    false
                },
            );
        intersecting
    }

    fn is_submerged(&self, position: Vec3) -> bool {
        water::contains(&self.world.waters, position)
    }

    fn hook_anchors(&self) -> Vec<Anchor> {
        self.world
            .anchors
            .iter()
            .map(|(entity, transform)| Anchor {
                entity,
                location: transform.translation(),
            })
            .collect()
    }

    fn rope_span(&self, entity: Entity) -> Option<RopeSpan> {
        self.world.ropes.get(entity).ok().copied()
    }
}
