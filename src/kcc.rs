use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::warn;

use crate::{
    CharacterControllerState,
    input::AccumulatedInput,
    machine::{self, StepOutcome, Tick},
    mode::{self, MovementEvent, MovementMode},
    prediction::{ClientPrediction, OutgoingMove, RemoteMoves, SavedMove},
    prelude::*,
    replication::CharacterEvent,
    spatial::ParkourWorld,
    travel,
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(schedule, run_kcc.in_set(ParkourSystems::MoveCharacters));
    }
}

fn run_kcc(
    mut kccs: Query<
        (
            Entity,
            &CharacterController,
            &mut CharacterControllerState,
            &mut AccumulatedInput,
            &mut Transform,
            &mut LinearVelocity,
            &NetRole,
            Option<&CharacterControllerCamera>,
            Option<&mut ClientPrediction>,
            Option<&mut ReplicatedPulses>,
        ),
        Without<RemoteMoves>,
    >,
    cams: Query<&Transform, Without<CharacterController>>,
    world: ParkourWorld,
    time: Res<Time>,
    mut character_events: MessageWriter<CharacterEvent>,
    mut outgoing: MessageWriter<OutgoingMove>,
) {
    let dt = time.delta_secs();
    for (
        entity,
        cfg,
        mut state,
        mut input,
        mut transform,
        mut velocity,
        role,
        cam,
        prediction,
        pulses,
    ) in &mut kccs
    {
        if *role == NetRole::SimulatedProxy {
            continue;
        }
        let orientation = cam
            .and_then(|e| cams.get(e.get()).copied().ok())
            .unwrap_or(*transform);
        apply_input(&mut input, &mut state, &orientation, cfg);

        let saved = prediction.as_ref().map(|prediction| {
            SavedMove::set_move_for(
                prediction.next_move_id(),
                time.elapsed_secs(),
                dt,
                &state,
                control_yaw(&orientation),
            )
        });

        let avian = world.for_character(cfg, &state);
        let mut events = Vec::new();
        let mut tick = Tick {
            transform: &mut transform,
            velocity: &mut velocity.0,
            state: &mut state,
            cfg,
            world: &avian,
            role: *role,
            dt,
            events: &mut events,
        };
        machine::advance_tick(&mut tick);

        if let Some(mut pulses) = pulses {
            pulses.0 = state.pulses;
        }
        if let (Some(mut prediction), Some(mut saved)) = (prediction, saved) {
            saved.finalize(&transform, velocity.0);
            if let Some(sent) = prediction.record(saved) {
                outgoing.write(OutgoingMove {
                    entity,
                    server_move: sent.to_server_move(),
                });
            }
        }
        character_events.write_batch(
            events
                .into_iter()
                .map(|event| CharacterEvent { entity, event }),
        );
    }
}

/// Consume the accumulated input into intents and a world space acceleration.
fn apply_input(
    input: &mut AccumulatedInput,
    state: &mut CharacterControllerState,
    orientation: &Transform,
    cfg: &CharacterController,
) {
    state.acceleration = calculate_wish_direction(input.last_movement, orientation);
    if let Some(jump_time) = input.jumped.take()
        && jump_time.elapsed() <= cfg.jump_input_buffer
    {
        state.press_jump();
    }
}

fn calculate_wish_direction(movement: Option<Vec2>, orientation: &Transform) -> Vec3 {
    let movement = movement.unwrap_or_default();
    let mut forward = Vec3::from(orientation.forward());
    forward.y = 0.0;
    forward = forward.normalize_or_zero();
    let mut right = Vec3::from(orientation.right());
    right.y = 0.0;
    right = right.normalize_or_zero();

    let wish_vel = movement.y * forward + movement.x * right;
    wish_vel.normalize_or_zero()
}

fn control_yaw(orientation: &Transform) -> f32 {
    orientation.rotation.to_euler(EulerRot::YXZ).0
}

pub(crate) fn depenetrate(tick: &mut Tick) {
    let capsule = tick.state.capsule(tick.cfg);
    tick.transform.translation += tick.world.depenetrate(tick.transform.translation, capsule);
}

pub(crate) fn update_crouch(tick: &mut Tick) {
    if tick.state.intent.wants_crouch {
        tick.state.crouching = true;
    } else if tick.state.crouching {
        // try to stand up
        let standing = tick.cfg.standing_capsule();
        tick.state.crouching = tick.world.overlaps(tick.transform.translation, standing);
    }
}

pub(crate) fn phys_walking(tick: &mut Tick, dt: f32) -> StepOutcome {
    let old_grounded = tick.state.grounded;

    friction(tick.velocity, tick.cfg.friction_hz, tick.cfg.stop_speed, dt);
    let wish_velocity = wish_velocity(tick);
    tick.velocity.y = 0.0;
    ground_accelerate(tick.velocity, wish_velocity, tick.cfg.acceleration_hz, dt);
    tick.velocity.y = 0.0;
    validate_velocity(tick.velocity, tick.cfg);

    if tick.velocity.length() < 0.01 {
        *tick.velocity = Vec3::ZERO;
        update_grounded(tick);
        if tick.state.grounded.is_none() {
            mode::set_mode(tick, MovementMode::Falling);
            return StepOutcome::Refund(dt);
        }
        return StepOutcome::Stop;
    }

    let movement = tick.velocity.with_y(0.0) * dt;
    let capsule = tick.state.capsule(tick.cfg);
    let position = tick.transform.translation;
    let hit = tick
        .world
        .sweep_capsule(position, position + movement, capsule, &[]);

    if hit.is_none() {
        tick.transform.translation += movement;
        depenetrate(tick);
        snap_to_ground(tick);
    } else if old_grounded.is_some() || tick.cfg.step_from_air {
        step_move(tick, dt);
        snap_to_ground(tick);
    }

    update_grounded(tick);
    if tick.state.grounded.is_none() {
        mode::set_mode(tick, MovementMode::Falling);
    }
    StepOutcome::Continue
}

pub(crate) fn phys_falling(tick: &mut Tick, dt: f32) -> StepOutcome {
    start_gravity(tick, dt);

    let wish_velocity = wish_velocity(tick);
    air_accelerate(
        tick.velocity,
        wish_velocity,
        tick.cfg.air_acceleration_hz,
        tick.cfg.max_air_speed,
        dt,
    );

    if tick.cfg.step_from_air {
        step_move(tick, dt);
    } else {
        move_character(tick, dt);
    }

    finish_gravity(tick, dt);
    update_grounded(tick);

    if tick.state.grounded.is_some() && tick.velocity.y <= 0.0 {
        tick.velocity.y = 0.0;
        mode::set_mode(tick, MovementMode::Walking);
    }
    StepOutcome::Continue
}

/// No gravity. Follows an armed transition, otherwise keeps its momentum.
pub(crate) fn phys_flying(tick: &mut Tick, dt: f32) -> StepOutcome {
    if tick.state.transition.is_some() {
        return travel::phys_transition(tick, dt);
    }
    validate_velocity(tick.velocity, tick.cfg);
    if (*tick.velocity * dt).length_squared() <= f32::EPSILON * f32::EPSILON {
        return StepOutcome::Stop;
    }
    move_character(tick, dt);
    StepOutcome::Continue
}

fn wish_velocity(tick: &Tick) -> Vec3 {
    tick.state.acceleration * tick.state.max_speed(tick.cfg, *tick.velocity)
}

pub(crate) fn ground_accelerate(velocity: &mut Vec3, wish_velocity: Vec3, acceleration_hz: f32, dt: f32) {
    let Ok((wish_dir, wish_speed)) = Dir3::new_and_length(wish_velocity) else {
        return;
    };
    let current_speed = velocity.dot(*wish_dir);
    let add_speed = wish_speed - current_speed;

    if add_speed <= 0.0 {
        return;
    }

    let accel_speed = wish_speed * acceleration_hz * dt;
    let accel_speed = f32::min(accel_speed, add_speed);

    *velocity += accel_speed * wish_dir;
}

fn air_accelerate(
    velocity: &mut Vec3,
    wish_velocity: Vec3,
    acceleration_hz: f32,
    max_air_speed: f32,
    dt: f32,
) {
    let Ok((wish_dir, wish_speed)) = Dir3::new_and_length(wish_velocity) else {
        return;
    };
    let wishspd = f32::min(wish_speed, max_air_speed);
    let current_speed = velocity.dot(*wish_dir);

    let add_speed = wishspd - current_speed;

    if add_speed <= 0.0 {
        return;
    }

    let accel_speed = wish_speed * acceleration_hz * dt;
    let accel_speed = f32::min(accel_speed, add_speed);

    *velocity += accel_speed * wish_dir;
}

fn step_move(tick: &mut Tick, dt: f32) {
    let original_position = tick.transform.translation;
    let original_velocity = *tick.velocity;
    let capsule = tick.state.capsule(tick.cfg);
    let step_size = tick.cfg.step_size;

    // Slide the direct path
    move_character(tick, dt);

    let down_position = tick.transform.translation;
    let down_velocity = *tick.velocity;

    tick.transform.translation = original_position;
    *tick.velocity = original_velocity;

    // step up
    let start = tick.transform.translation;
    let hit = tick
        .world
        .sweep_capsule(start, start + Vec3::Y * step_size, capsule, &[]);
    let dist = hit.map_or(step_size, |hit| hit.distance);
    tick.transform.translation += Vec3::Y * dist;

    // try to slide from upstairs
    move_character(tick, dt);

    let start = tick.transform.translation;
    let hit = tick
        .world
        .sweep_capsule(start, start - Vec3::Y * step_size, capsule, &[]);

    // If we either fall or slide, use the direct slide instead
    let Some(hit) = hit.filter(|h| h.normal.y >= tick.cfg.min_walk_cos || tick.cfg.step_into_air)
    else {
        tick.transform.translation = down_position;
        *tick.velocity = down_velocity;
        return;
    };
    tick.transform.translation = start - Vec3::Y * hit.distance;
    depenetrate(tick);

    let up_position = tick.transform.translation;

    // use the one that went further
    let down_dist = down_position.xz().distance_squared(original_position.xz());
    let up_dist = up_position.xz().distance_squared(original_position.xz());
    if down_dist >= up_dist {
        tick.transform.translation = down_position;
        *tick.velocity = down_velocity;
    } else {
        tick.velocity.y = down_velocity.y;
    }
}

fn move_character(tick: &mut Tick, dt: f32) {
    let capsule = tick.state.capsule(tick.cfg);
    let ground_normal = tick.state.grounded.map(|grounded| grounded.normal);
    let out = tick.world.move_and_slide(
        tick.transform.translation,
        *tick.velocity,
        dt,
        capsule,
        ground_normal,
    );
    tick.transform.translation = out.position;
    *tick.velocity = out.velocity;
}

pub(crate) fn snap_to_ground(tick: &mut Tick) {
    let capsule = tick.state.capsule(tick.cfg);
    let ground_distance = tick.cfg.ground_distance;
    let position = tick.transform.translation;

    let hit = tick
        .world
        .sweep_capsule(position, position + Vec3::Y * ground_distance, capsule, &[]);
    let up_dist = hit.map_or(ground_distance, |h| h.distance);
    let start = position + Vec3::Y * up_dist;
    let cast_len = up_dist + tick.cfg.step_size;

    let Some(hit) = tick
        .world
        .sweep_capsule(start, start - Vec3::Y * cast_len, capsule, &[])
    else {
        return;
    };
    if hit.intersects()
        || hit.normal.y < tick.cfg.min_walk_cos
        || hit.distance <= ground_distance
    {
        return;
    }
    tick.transform.translation = start - Vec3::Y * hit.distance;
    depenetrate(tick);
}

fn update_grounded(tick: &mut Tick) {
    let moving_up_rapidly = tick.velocity.y > tick.cfg.unground_speed;
    if moving_up_rapidly {
        tick.state.grounded = None;
        return;
    }
    let capsule = tick.state.capsule(tick.cfg);
    tick.state.grounded = tick
        .world
        .find_floor(tick.transform.translation, capsule, tick.cfg.ground_distance)
        .filter(|floor| floor.is_walkable(tick.cfg.min_walk_cos));
}

pub(crate) fn friction(velocity: &mut Vec3, friction_hz: f32, stop_speed: f32, dt: f32) {
    let speed = velocity.length();
    if speed < 0.001 {
        return;
    }

    let control = f32::max(speed, stop_speed);
    let drop = control * friction_hz * dt;

    let mut new_speed = (speed - drop).max(0.0);
    if new_speed != speed {
        new_speed /= speed;
        *velocity *= new_speed;
    }
}

/// Jump if the character is on the ground, inside coyote time or has jumps left.
pub(crate) fn do_jump(tick: &mut Tick) -> bool {
    let on_ground = tick.state.mode.is_moving_on_ground()
        || (tick.state.jump_count == 0 && tick.state.last_ground < tick.cfg.coyote_time);
    if !on_ground && tick.state.jump_count == 0 {
        // Walked off a ledge: the ground jump is gone.
        tick.state.jump_count = 1;
    }
    if tick.state.jump_count >= tick.cfg.max_jump_count {
        return false;
    }
    launch_jump(tick);
    true
}

pub(crate) fn launch_jump(tick: &mut Tick) {
    tick.state.jump_count = tick.state.jump_count.saturating_add(1);
    tick.state.grounded = None;
    tick.state.last_ground = tick.cfg.coyote_time;
    tick.velocity.y = tick.cfg.jump_speed();
    mode::set_mode(tick, MovementMode::Falling);

    let count = tick.state.jump_count;
    if count > 1 {
        crate::dive::play_action(tick, Montage::JumpExtra);
        tick.state.pulses.jump_extra = tick.state.pulses.jump_extra.wrapping_add(1);
    }
    tick.events.push(MovementEvent::Jumped { count });
}

fn start_gravity(tick: &mut Tick, dt: f32) {
    tick.velocity.y -= tick.cfg.gravity * 0.5 * dt;
    validate_velocity(tick.velocity, tick.cfg);
}

fn finish_gravity(tick: &mut Tick, dt: f32) {
    tick.velocity.y -= tick.cfg.gravity * 0.5 * dt;
    validate_velocity(tick.velocity, tick.cfg);
}

pub(crate) fn validate_velocity(velocity: &mut Vec3, cfg: &CharacterController) {
    for i in 0..3 {
        if !velocity[i].is_finite() {
            warn!("velocity[{i}] is not finite: {}, setting to 0", velocity[i]);
            velocity[i] = 0.0;
        }
    }
    *velocity = velocity.clamp_length(0.0, cfg.max_speed);
}

/// Yaw toward the acceleration at `rotation_rate`.
pub(crate) fn rotate_toward_acceleration(tick: &mut Tick) {
    let direction = tick.state.acceleration.with_y(0.0).normalize_or_zero();
    if direction == Vec3::ZERO {
        return;
    }
    let target = f32::atan2(-direction.x, -direction.z);
    let (current, _, _) = tick.transform.rotation.to_euler(EulerRot::YXZ);
    let mut delta = (target - current) % core::f32::consts::TAU;
    if delta > core::f32::consts::PI {
        delta -= core::f32::consts::TAU;
    } else if delta < -core::f32::consts::PI {
        delta += core::f32::consts::TAU;
    }
    let max_step = tick.cfg.rotation_rate * tick.dt;
    let yaw = current + delta.clamp(-max_step, max_step);
    tick.transform.rotation = Quat::from_rotation_y(yaw);
}
