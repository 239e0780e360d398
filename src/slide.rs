//! Crouch sliding.

use tracing::trace;

use crate::{
    kcc,
    machine::{StepOutcome, Tick},
    mode::{self, MovementMode},
    prelude::*,
    probe::FloorHit,
};

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq)]
pub struct SlideState {
    pub active: bool,
    /// Floor under the slide, refreshed every substep.
    pub floor: Option<FloorHit>,
}

pub fn can_slide(tick: &Tick) -> bool {
    if !tick.state.mode.is_moving_on_ground() {
        return false;
    }
    let min_speed = tick.cfg.slide_min_speed;
    if tick.velocity.xz().length_squared() <= min_speed * min_speed {
        return false;
    }
    let capsule = tick.state.capsule(tick.cfg);
    let start = capsule.center(tick.transform.translation);
    let depth = tick.cfg.slide_probe_factor * capsule.half_height;
    tick.world.line_probe(start, start - Vec3::Y * depth)
}

pub(crate) fn enter_slide(tick: &mut Tick) {
    if tick.state.slide.active {
        return;
    }
    tick.state.slide.active = true;
    tick.state.intent.wants_crouch = true;
    tick.state.orient_to_movement = false;

    let along = tick.velocity.with_y(0.0).normalize_or_zero();
    *tick.velocity += along * tick.cfg.slide_enter_impulse;

    let capsule = tick.state.capsule(tick.cfg);
    tick.state.slide.floor = tick
        .world
        .find_floor(tick.transform.translation, capsule, tick.cfg.ground_distance)
        .or(tick.state.grounded);
}

pub(crate) fn finish_slide(tick: &mut Tick) {
    if !tick.state.slide.active {
        return;
    }
    tick.state.slide.active = false;
    tick.state.slide.floor = None;
    tick.state.intent.wants_crouch = false;
    tick.state.orient_to_movement = true;
}

pub(crate) fn phys_slide(tick: &mut Tick, dt: f32) -> StepOutcome {
    if !can_slide(tick) {
        mode::set_mode(tick, MovementMode::Walking);
        return StepOutcome::Refund(dt);
    }

    let floor_normal = tick.state.slide.floor.map_or(Vec3::Y, |floor| floor.normal);
    tick.velocity.y = 0.0;
    let downhill = Vec3::NEG_Y.reject_from(floor_normal);
    *tick.velocity += downhill.with_y(0.0) * tick.cfg.slide_gravity_force * dt;

    // Only steering is allowed while sliding.
    let right = tick.transform.right().with_y(0.0).normalize_or_zero();
    let steer = right * tick.state.acceleration.dot(right);
    let friction_hz = tick.cfg.friction_hz * tick.cfg.slide_friction_factor;
    kcc::friction(tick.velocity, friction_hz, tick.cfg.stop_speed, dt);
    let wish_speed = tick.state.max_speed(tick.cfg, *tick.velocity);
    kcc::ground_accelerate(tick.velocity, steer * wish_speed, tick.cfg.acceleration_hz, dt);
    kcc::validate_velocity(tick.velocity, tick.cfg);

    let delta = *tick.velocity * dt;
    if delta.length_squared() <= f32::EPSILON * f32::EPSILON {
        return StepOutcome::Stop;
    }

    let start = tick.transform.translation;
    let capsule = tick.state.capsule(tick.cfg);
    let moved = tick
        .world
        .move_and_slide(start, *tick.velocity, dt, capsule, Some(floor_normal));
    tick.transform.translation = moved.position;
    kcc::snap_to_ground(tick);

    let position = tick.transform.translation;
    let floor = tick
        .world
        .find_floor(position, capsule, tick.cfg.ground_distance)
        .filter(|floor| floor.is_walkable(tick.cfg.min_walk_cos));
    let submerged = tick.world.is_submerged(capsule.center(position));
    let Some(floor) = floor.filter(|_| !submerged) else {
        trace!("slide left the ground (submerged: {submerged})");
        let travelled = (position - start).length() / delta.length();
        *tick.velocity = moved.velocity;
        tick.state.grounded = None;
        mode::set_mode(tick, MovementMode::Falling);
        return StepOutcome::Refund(dt * (1.0 - travelled.clamp(0.0, 1.0)));
    };
    tick.state.slide.floor = Some(floor);
    tick.state.grounded = Some(floor);

    *tick.velocity = (position - start) / dt;
    if position == start {
        return StepOutcome::Stop;
    }
    StepOutcome::Continue
}
