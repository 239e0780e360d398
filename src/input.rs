use bevy_time::Stopwatch;

use crate::{CharacterControllerState, prelude::*};

pub(super) fn plugin(app: &mut App) {
    app.init_resource::<DidFixedTimestepRunThisFrame>()
        .add_observer(apply_movement)
        .add_observer(apply_jump)
        .add_observer(apply_crouch)
        .add_observer(start_sprint)
        .add_observer(stop_sprint)
        .add_observer(apply_dive)
        .add_observer(start_hook)
        .add_observer(stop_hook)
        .add_systems(PreUpdate, clear_fixed_timestep_flag)
        .add_systems(FixedPreUpdate, set_fixed_timestep_flag)
        .add_systems(
            RunFixedMainLoop,
            clear_accumulated_input
                .run_if(did_fixed_timestep_run_this_frame)
                .in_set(RunFixedMainLoopSystems::AfterFixedMainLoop),
        )
        .add_systems(PreUpdate, tick_timers.in_set(EnhancedInputSystems::Update));
}

#[derive(Debug, InputAction)]
#[action_output(Vec2)]
pub struct Movement;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Jump;

/// Toggles the crouch intent, which also starts a slide when running fast enough.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Crouch;

/// Held to sprint.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Sprint;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Dive;

/// Held to stay on the grappling hook.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Hook;

#[derive(Debug, InputAction)]
#[action_output(Vec2)]
pub struct RotateCamera;

/// Input accumulated since the last fixed update loop. Is cleared after every fixed update loop.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct AccumulatedInput {
    // The last non-zero move that was input since the last fixed update loop
    pub last_movement: Option<Vec2>,
    // Time since the last jump input. Will be `None` once the jump was processed.
    pub jumped: Option<Stopwatch>,
}

/// Whether the fixed timestep ran this frame.
#[derive(Resource, Debug, Deref, DerefMut, Default)]
pub(crate) struct DidFixedTimestepRunThisFrame(bool);

fn clear_fixed_timestep_flag(mut did_run: ResMut<DidFixedTimestepRunThisFrame>) {
    did_run.0 = false;
}

fn set_fixed_timestep_flag(mut did_run: ResMut<DidFixedTimestepRunThisFrame>) {
    did_run.0 = true;
}

pub(crate) fn did_fixed_timestep_run_this_frame(did_run: Res<DidFixedTimestepRunThisFrame>) -> bool {
    did_run.0
}

fn apply_movement(
    movement: On<Fire<Movement>>,
    mut accumulated_inputs: Query<&mut AccumulatedInput>,
) {
    if let Ok(mut accumulated_inputs) = accumulated_inputs.get_mut(movement.context) {
        accumulated_inputs.last_movement = Some(movement.value);
    }
}

fn apply_jump(jump: On<Fire<Jump>>, mut accumulated_inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut accumulated_inputs) = accumulated_inputs.get_mut(jump.context) {
        accumulated_inputs.jumped = Some(Stopwatch::new());
    }
}

fn apply_crouch(crouch: On<Start<Crouch>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(crouch.context) {
        state.toggle_crouch();
    }
}

fn start_sprint(sprint: On<Start<Sprint>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(sprint.context) {
        state.request_sprint();
    }
}

fn stop_sprint(sprint: On<Complete<Sprint>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(sprint.context) {
        state.finish_sprint();
    }
}

fn apply_dive(dive: On<Start<Dive>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(dive.context) {
        state.request_dive();
    }
}

fn start_hook(hook: On<Start<Hook>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(hook.context) {
        state.request_hook();
    }
}

fn stop_hook(hook: On<Complete<Hook>>, mut states: Query<&mut CharacterControllerState>) {
    if let Ok(mut state) = states.get_mut(hook.context) {
        state.release_hook();
    }
}

fn clear_accumulated_input(mut accumulated_inputs: Query<&mut AccumulatedInput>) {
    for mut accumulated_input in &mut accumulated_inputs {
        accumulated_input.last_movement = None;
    }
}

fn tick_timers(mut inputs: Query<&mut AccumulatedInput>, time: Res<Time>) {
    for mut input in inputs.iter_mut() {
        if let Some(jumped) = input.jumped.as_mut() {
            jumped.tick(time.delta());
        }
    }
}
