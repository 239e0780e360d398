//! Rope grabs: finding a rope along the jump arc, the jump to it, and riding it.

use tracing::{debug, warn};

use crate::{
    kcc,
    machine::Tick,
    mode::{self, MovementMode},
    prelude::*,
    probe::RopeSpan,
    travel::{self, Transition, TransitionKind, TravelKind},
};

/// Where a character grabs a rope and where the ride along it ends.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct RopeGrab {
    pub entity: Entity,
    pub span: RopeSpan,
    pub grab_point: Vec3,
    pub rest_point: Vec3,
}

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq)]
pub struct RopeState {
    pub active: bool,
    pub grab: Option<RopeGrab>,
}

/// Probe the arc of a full jump for a rope the character could ride.
pub fn try_rope(tick: &Tick) -> Option<RopeGrab> {
    let cfg = tick.cfg;
    let capsule = tick.state.capsule(cfg);
    let start = tick.transform.translation + Vec3::Y * capsule.half_height;
    let apex = cfg.max_jump_height_with_hold()
        + capsule.height()
        + cfg.rope_jump_additive.clamp(0.0, 1.0);
    let launch = tick.velocity.with_y(0.0) + Vec3::Y * (2.0 * cfg.gravity * apex).sqrt();

    let hit = tick
        .world
        .predict_trajectory(start, launch, cfg.gravity, capsule.radius)?;
    let entity = hit.entity?;
    let span = tick.world.rope_span(entity)?;

    let offset = Vec3::NEG_Y * cfg.rope_grab_height_fraction * capsule.height()
        + span.normal * cfg.rope_rest_offset;
    let grab_point = span.closest_point(hit.location) + offset;
    let rest_point = span.end + offset;
    if rest_point.distance(start) <= cfg.ignore_rope_distance {
        debug!("rope {entity} ends too close to grab");
        return None;
    }
    if tick
        .world
        .sweep_capsule(grab_point, rest_point, capsule, &[entity])
        .is_some()
    {
        debug!("rope {entity} is blocked");
        return None;
    }
    Some(RopeGrab {
        entity,
        span,
        grab_point,
        rest_point,
    })
}

/// Fly to the grab point; the rope mode starts when the transition completes.
pub(crate) fn jump_to_rope(tick: &mut Tick, grab: RopeGrab) {
    let start = tick.transform.translation;
    let distance = start.distance(grab.rest_point);
    let duration = (distance / tick.cfg.jump_to_rope_speed)
        .max(0.1)
        .min(tick.cfg.jump_to_rope_max_duration);
    mode::set_mode(tick, MovementMode::Flying);
    tick.state.transition = Some(Transition::new(
        TransitionKind::JumpToRope,
        start,
        grab.grab_point,
        duration,
    ));
    tick.state.rope.grab = Some(grab);
    tick.state.pulses.find_rope = tick.state.pulses.find_rope.wrapping_add(1);
}

pub(crate) fn enter_rope(tick: &mut Tick) {
    if tick.state.rope.active {
        return;
    }
    tick.state.rope.active = true;
    tick.state.orient_to_movement = false;

    let Some(grab) = tick.state.rope.grab else {
        warn!("entered the rope mode without a rope");
        return;
    };
    travel::prepare_travel(
        tick,
        TravelKind::Rope,
        grab.rest_point,
        tick.cfg.rope_release_tolerance,
        grab.span.direction(),
        tick.cfg.max_rope_speed,
        None,
    );
    travel::apply_travel(tick);
}

pub(crate) fn finish_rope(tick: &mut Tick) {
    if !tick.state.rope.active {
        return;
    }
    tick.state.rope.active = false;
    tick.state.rope.grab = None;
    tick.state.reached_destination = false;
    travel::clear_travel(tick);
    tick.state.orient_to_movement = true;
}

/// Let go of the rope with a fresh jump.
pub(crate) fn jump_off(tick: &mut Tick) {
    mode::set_mode(tick, MovementMode::Falling);
    tick.state.jump_count = 0;
    kcc::launch_jump(tick);
}
