//! Grappling hook: anchor selection, the hook mode, and the stop after letting go.

use tracing::{debug, warn};

use crate::{
    machine::Tick,
    mode::{MovementEvent, MovementMode},
    prelude::*,
    travel::{self, TravelKind},
};

/// Non-owning reference to the anchor the character is hooked to.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct HookTarget {
    pub entity: Entity,
    pub location: Vec3,
}

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq)]
pub struct HookState {
    pub active: bool,
    pub target: Option<HookTarget>,
    /// Set on leaving the hook mode; the post-movement step stops or brakes the character.
    pub pending_completion: bool,
}

/// Best anchor in front of the character: in range, inside the facing cone and reachable.
/// The nearest wins, ties go to the most centered one.
pub fn try_hook(tick: &Tick) -> Option<HookTarget> {
    if !matches!(
        tick.state.mode,
        MovementMode::Walking | MovementMode::Falling
    ) {
        return None;
    }
    let position = tick.transform.translation;
    let capsule = tick.state.capsule(tick.cfg);
    let facing = tick.transform.forward().with_y(0.0).normalize_or_zero();
    let max_distance_sq = tick.cfg.max_hook_distance * tick.cfg.max_hook_distance;

    let mut best: Option<(HookTarget, f32, f32)> = None;
    for anchor in tick.world.hook_anchors() {
        let to_anchor = anchor.location - position;
        let distance_sq = to_anchor.length_squared();
        if distance_sq > max_distance_sq {
            continue;
        }
        let dot = facing.dot(to_anchor.with_y(0.0).normalize_or_zero());
        if dot.is_nan() || dot < tick.cfg.hook_cone_cos {
            continue;
        }
        if tick
            .world
            .sweep_capsule(position, anchor.location, capsule, &[anchor.entity])
            .is_some()
        {
            continue;
        }
        let better = best.is_none_or(|(_, best_distance_sq, best_dot)| {
            distance_sq < best_distance_sq || (distance_sq == best_distance_sq && dot > best_dot)
        });
        if better {
            let target = HookTarget {
                entity: anchor.entity,
                location: anchor.location,
            };
            best = Some((target, distance_sq, dot));
        }
    }
    best.map(|(target, ..)| target)
}

pub(crate) fn enter_hook(tick: &mut Tick) {
    if tick.state.hook.active {
        return;
    }
    tick.state.hook.active = true;
    tick.state.orient_to_movement = false;

    let Some(target) = tick.state.hook.target else {
        warn!("entered the hook mode without an anchor");
        return;
    };
    travel::prepare_travel(
        tick,
        TravelKind::Hook,
        target.location,
        tick.cfg.release_hook_tolerance,
        Vec3::ZERO,
        tick.cfg.max_hook_speed,
        tick.cfg.hook_curve.clone(),
    );
    travel::apply_travel(tick);
    if tick.cfg.handle_cable {
        tick.events.push(MovementEvent::CableAttached {
            anchor: target.location,
        });
    }
}

pub(crate) fn finish_hook(tick: &mut Tick) {
    if !tick.state.hook.active {
        return;
    }
    tick.state.hook.active = false;
    tick.state.intent.wants_hook = false;
    travel::clear_travel(tick);
    tick.state.orient_to_movement = true;
    tick.state.hook.target = None;
    if tick.cfg.handle_cable {
        tick.events.push(MovementEvent::CableDetached);
    }
    tick.state.hook.pending_completion = true;
}

/// Hard stop when the anchor was reached, otherwise shed part of the velocity.
pub(crate) fn complete_hook(tick: &mut Tick) {
    if !tick.state.hook.pending_completion {
        return;
    }
    tick.state.hook.pending_completion = false;
    if tick.state.reached_destination {
        debug!("hook reached its anchor");
        *tick.velocity = Vec3::ZERO;
    } else {
        let divisor = 1.0 + (1.0 - tick.cfg.hook_braking_factor);
        *tick.velocity -= *tick.velocity / divisor;
    }
    tick.state.reached_destination = false;
}
