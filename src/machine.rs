//! The per-tick movement state machine.
//!
//! [`advance_tick`] is deterministic: the same state, transform, velocity, config, world and
//! delta always produce the same result, which is what makes client replays line up with
//! the server.

use tracing::{trace, warn};

use crate::{
    CharacterController, CharacterControllerState, dive, hook, kcc,
    mode::{self, CustomMode, MovementEvent, MovementMode},
    prelude::*,
    probe::MovementWorld,
    replication::NetRole,
    rope, slide, travel,
};

/// Substeps shorter than this are dropped.
pub const MIN_TICK_TIME: f32 = 1.0e-6;

/// Everything one character tick reads and writes.
pub struct Tick<'a> {
    pub transform: &'a mut Transform,
    pub velocity: &'a mut Vec3,
    pub state: &'a mut CharacterControllerState,
    pub cfg: &'a CharacterController,
    pub world: &'a dyn MovementWorld,
    pub role: NetRole,
    pub dt: f32,
    pub events: &'a mut Vec<MovementEvent>,
}

/// What the integrator wants the substep loop to do next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    Continue,
    /// Nothing left to integrate this tick.
    Stop,
    /// The mode changed part way; hand these seconds back to the loop.
    Refund(f32),
}

pub fn advance_tick(tick: &mut Tick) {
    let capsule = tick.state.capsule(tick.cfg);
    if !capsule.is_valid() {
        warn!("invalid capsule {capsule:?}, skipping tick");
        return;
    }
    if !tick.dt.is_finite() || tick.dt < 0.0 {
        warn!("invalid tick length {}, skipping tick", tick.dt);
        return;
    }
    update_before_movement(tick);
    run_substeps(tick);
    update_after_movement(tick);
}

/// Intents, mode entry and exit, dives, hook and rope acquisition, finished actions.
pub fn update_before_movement(tick: &mut Tick) {
    if tick.velocity.length_squared() < 1.0e-4 {
        tick.state.intent.wants_sprint = false;
    }
    kcc::depenetrate(tick);
    kcc::update_crouch(tick);

    if tick.state.mode == MovementMode::SLIDE && !tick.state.intent.wants_crouch {
        mode::set_mode(tick, MovementMode::Walking);
    } else if tick.state.intent.wants_crouch
        && !tick.state.is_diving()
        && slide::can_slide(tick)
    {
        mode::set_mode(tick, MovementMode::SLIDE);
    }

    if tick.state.intent.wants_dive && dive::can_dive(tick.state) {
        dive::perform_dive(tick);
    }
    tick.state.intent.wants_dive = false;

    if tick.role.acquires_targets() {
        update_hook(tick);
        if tick.state.intent.custom_jump_pressed {
            handle_jump_press(tick);
        }
    }
    tick.state.intent.custom_jump_pressed = false;

    dive::finish_elapsed_action(tick);
}

fn update_hook(tick: &mut Tick) {
    let hooking = tick.state.is_hooking();
    if tick.state.intent.wants_hook && !hooking {
        let Some(target) = hook::try_hook(tick) else {
            return;
        };
        tick.state.hook.target = Some(target);
        tick.state.pulses.find_hook = tick.state.pulses.find_hook.wrapping_add(1);
        mode::set_mode(tick, MovementMode::HOOK);
    } else if !tick.state.intent.wants_hook && hooking {
        mode::set_mode(tick, MovementMode::Falling);
    }
}

fn handle_jump_press(tick: &mut Tick) {
    if tick.state.is_on_rope() {
        rope::jump_off(tick);
        return;
    }
    if tick.state.transition.is_none()
        && let Some(grab) = rope::try_rope(tick)
    {
        rope::jump_to_rope(tick, grab);
        return;
    }
    kcc::do_jump(tick);
    tick.state.orient_to_movement = true;
}

fn run_substeps(tick: &mut Tick) {
    let max_timestep = tick.cfg.max_timestep;
    let mut remaining = tick.dt;
    let mut iterations = 0;
    while remaining >= MIN_TICK_TIME && iterations < tick.cfg.max_iterations {
        iterations += 1;
        let step = if remaining > max_timestep {
            max_timestep.min(remaining * 0.5)
        } else {
            remaining
        };
        remaining -= step;

        let outcome = integrate(tick, step);
        trace!("{:?} substep {step} -> {outcome:?}", tick.state.mode);
        match outcome {
            StepOutcome::Continue => {}
            StepOutcome::Stop => break,
            StepOutcome::Refund(time) => remaining += time.clamp(0.0, step),
        }
    }
}

fn integrate(tick: &mut Tick, dt: f32) -> StepOutcome {
    match tick.state.mode {
        MovementMode::Walking => kcc::phys_walking(tick, dt),
        MovementMode::Falling => kcc::phys_falling(tick, dt),
        MovementMode::Flying => kcc::phys_flying(tick, dt),
        MovementMode::Custom(CustomMode::Slide) => slide::phys_slide(tick, dt),
        MovementMode::Custom(CustomMode::Hook | CustomMode::Rope) => travel::phys_travel(tick, dt),
        MovementMode::Custom(CustomMode::Dive) => {
            panic!("the dive mode has no integrator")
        }
    }
}

/// Transition completion, hook completion, action timers, facing and ground time.
pub fn update_after_movement(tick: &mut Tick) {
    travel::complete_transition(tick);
    hook::complete_hook(tick);
    dive::advance_action(tick.state, tick.dt);
    if tick.state.orient_to_movement {
        kcc::rotate_toward_acceleration(tick);
    }
    if tick.state.mode.is_moving_on_ground() {
        tick.state.last_ground = core::time::Duration::ZERO;
    } else {
        tick.state.last_ground = tick
            .state
            .last_ground
            .saturating_add(core::time::Duration::from_secs_f32(tick.dt));
    }
}
