#![doc = include_str!("../readme.md")]

/// Everything you need to get started with `bevy_parkour`
pub mod prelude {
    pub(crate) use {
        avian3d::prelude::*,
        bevy_app::prelude::*,
        bevy_derive::{Deref, DerefMut},
        bevy_ecs::prelude::*,
        bevy_enhanced_input::prelude::*,
        bevy_math::prelude::*,
        bevy_reflect::prelude::*,
        bevy_time::prelude::*,
        bevy_transform::prelude::*,
        bevy_utils::prelude::*,
    };

    pub use crate::{
        CharacterController, CharacterControllerState, ParkourPlugin, ParkourSystems,
        camera::{CharacterControllerCamera, CharacterControllerCameraOf, ViewHeight},
        dive::{ActionDurations, DiveOutcome, Montage},
        input::{Crouch, Dive, Hook, Jump, Movement, RotateCamera, Sprint},
        mode::{CustomMode, MovementEvent, MovementMode},
        prediction::{
            ClientPrediction, IncomingMove, OutgoingMove, RemoteMoves, SavedMove, ServerCorrection,
            ServerMove, Snapshot,
        },
        probe::{CapsuleShape, MovementWorld, RopeSpan},
        replication::{CharacterEvent, Cue, NetRole, PulseCue, PulseObserver, ReplicatedPulses},
        spatial::HookAnchor,
        travel::SpeedCurve,
        water::Water,
    };
}

use crate::{
    dive::DiveState,
    hook::HookState,
    input::AccumulatedInput,
    prelude::*,
    probe::FloorHit,
    replication::EventPulses,
    rope::RopeState,
    slide::SlideState,
    travel::{Transition, TravelData},
};
use bevy_ecs::{
    intern::Interned, lifecycle::HookContext,
    relationship::RelationshipSourceCollection as _, schedule::ScheduleLabel, world::DeferredWorld,
};
use core::time::Duration;

pub mod camera;
pub mod dive;
pub mod flags;
pub mod hook;
pub mod input;
mod kcc;
pub mod machine;
pub mod mode;
pub mod prediction;
pub mod probe;
pub mod replication;
pub mod rope;
pub mod slide;
pub mod spatial;
#[cfg(test)]
mod testing;
pub mod travel;
pub mod water;

/// Also requires you to add [`PhysicsPlugins`] and [`EnhancedInputPlugin`] to work properly.
pub struct ParkourPlugin {
    schedule: Interned<dyn ScheduleLabel>,
}

impl ParkourPlugin {
    /// Create a new plugin in the given schedule. The default is [`FixedPostUpdate`].
    pub fn new(schedule: impl ScheduleLabel) -> Self {
        Self {
            schedule: schedule.intern(),
        }
    }
}

impl Default for ParkourPlugin {
    fn default() -> Self {
        Self {
            schedule: FixedPostUpdate.intern(),
        }
    }
}

impl Plugin for ParkourPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            self.schedule,
            (ParkourSystems::ApplyNetwork, ParkourSystems::MoveCharacters)
                .chain()
                .in_set(PhysicsSystems::First),
        )
        .add_plugins((
            camera::plugin,
            input::plugin,
            kcc::plugin(self.schedule),
            prediction::plugin(self.schedule),
            replication::plugin,
        ));
    }
}

/// System sets used by all systems of `bevy_parkour`.
#[derive(SystemSet, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ParkourSystems {
    /// Server moves and client corrections coming from the transport.
    ApplyNetwork,
    MoveCharacters,
}

/// Tunables of a parkour character. Speeds are in m/s, accelerations in m/s², times in seconds.
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
#[require(
    AccumulatedInput,
    CharacterControllerState,
    NetRole,
    ReplicatedPulses,
    TranslationInterpolation,
    RigidBody = RigidBody::Kinematic,
    Collider = Collider::capsule(0.35, 1.1),
    CustomPositionIntegration,
    Transform,
    SpeculativeMargin::ZERO,
)]
#[component(on_add=CharacterController::on_add)]
pub struct CharacterController {
    pub radius: f32,
    pub standing_half_height: f32,
    pub crouched_half_height: f32,
    pub filter: SpatialQueryFilter,
    pub standing_view_height: f32,
    pub crouch_view_height: f32,
    pub crouch_blend_duration: f32,
    pub ground_distance: f32,
    pub min_walk_cos: f32,
    pub stop_speed: f32,
    pub friction_hz: f32,
    pub acceleration_hz: f32,
    pub air_acceleration_hz: f32,
    pub gravity: f32,
    pub step_size: f32,
    pub crouch_speed_scale: f32,
    pub speed: f32,
    pub sprint_speed: f32,
    pub sprint_crouched_speed: f32,
    pub move_and_slide: MoveAndSlideConfig,
    pub max_speed: f32,
    pub max_air_speed: f32,
    pub unground_speed: f32,
    /// Yaw speed in rad/s when the character turns toward its acceleration.
    pub rotation_rate: f32,
    pub jump_height: f32,
    /// Extra time the jump keeps its launch speed while held; used to predict rope grabs.
    pub jump_hold_time: f32,
    pub max_jump_count: u8,
    pub coyote_time: Duration,
    pub jump_input_buffer: Duration,
    pub step_from_air: bool,
    pub step_into_air: bool,
    pub max_timestep: f32,
    pub max_iterations: u32,
    pub slide_min_speed: f32,
    pub slide_enter_impulse: f32,
    pub slide_gravity_force: f32,
    pub slide_friction_factor: f32,
    /// Depth of the slide floor probe as a multiple of the capsule half height.
    pub slide_probe_factor: f32,
    pub dive_min_speed: f32,
    pub dive_impulse: f32,
    pub flying_dive_impulse: f32,
    pub dodge_back_impulse: f32,
    pub actions: ActionDurations,
    pub max_hook_distance: f32,
    /// Minimum dot product between facing and the direction to an anchor.
    pub hook_cone_cos: f32,
    pub release_hook_tolerance: f32,
    pub max_hook_speed: f32,
    pub hook_braking_factor: f32,
    pub hook_curve: Option<SpeedCurve>,
    pub handle_cable: bool,
    pub rope_jump_additive: f32,
    pub rope_grab_height_fraction: f32,
    pub rope_rest_offset: f32,
    pub ignore_rope_distance: f32,
    pub rope_release_tolerance: f32,
    pub max_rope_speed: f32,
    pub jump_to_rope_speed: f32,
    pub jump_to_rope_max_duration: f32,
}

impl Default for CharacterController {
    fn default() -> Self {
        Self {
            radius: 0.35,
            standing_half_height: 0.9,
            crouched_half_height: 0.6,
            filter: SpatialQueryFilter::default(),
            standing_view_height: 1.7,
            crouch_view_height: 1.1,
            crouch_blend_duration: 0.2,
            ground_distance: 0.05,
            min_walk_cos: 0.766,
            stop_speed: 1.0,
            friction_hz: 6.0,
            acceleration_hz: 8.0,
            air_acceleration_hz: 4.0,
            gravity: 9.81,
            step_size: 0.45,
            crouch_speed_scale: 0.54,
            speed: 5.0,
            sprint_speed: 7.5,
            sprint_crouched_speed: 4.0,
            move_and_slide: MoveAndSlideConfig {
                skin_width: 0.0075,
                ..default()
            },
            max_speed: 60.0,
            max_air_speed: 2.5,
            unground_speed: 10.0,
            rotation_rate: 9.4,
            jump_height: 1.2,
            jump_hold_time: 0.15,
            max_jump_count: 2,
            coyote_time: Duration::from_millis(150),
            jump_input_buffer: Duration::from_millis(150),
            step_from_air: false,
            step_into_air: false,
            max_timestep: 0.05,
            max_iterations: 8,
            slide_min_speed: 3.5,
            slide_enter_impulse: 5.0,
            slide_gravity_force: 40.0,
            slide_friction_factor: 0.06,
            slide_probe_factor: 2.5,
            dive_min_speed: 4.0,
            dive_impulse: 9.0,
            flying_dive_impulse: 12.0,
            dodge_back_impulse: 6.0,
            actions: ActionDurations::default(),
            max_hook_distance: 25.0,
            hook_cone_cos: 0.8,
            release_hook_tolerance: 1.0,
            max_hook_speed: 20.0,
            hook_braking_factor: 0.5,
            hook_curve: None,
            handle_cable: true,
            rope_jump_additive: 0.3,
            rope_grab_height_fraction: 0.5,
            rope_rest_offset: 0.45,
            ignore_rope_distance: 2.0,
            rope_release_tolerance: 0.5,
            max_rope_speed: 6.0,
            jump_to_rope_speed: 5.0,
            jump_to_rope_max_duration: 0.6,
        }
    }
}

impl CharacterController {
    pub fn on_add(mut world: DeferredWorld, ctx: HookContext) {
        {
            let Some(mut kcc) = world.get_mut::<Self>(ctx.entity) else {
                return;
            };
            kcc.filter.excluded_entities.add(ctx.entity);
        }

        let (standing, crouching) = {
            let Some(kcc) = world.get::<Self>(ctx.entity) else {
                return;
            };
            (kcc.standing_capsule(), kcc.crouched_capsule())
        };
        if !standing.is_valid() || !crouching.is_valid() {
            tracing::warn!(
                "{:?} has an invalid capsule ({standing:?} / {crouching:?}), it will not move",
                ctx.entity
            );
        }

        let Some(mut state) = world.get_mut::<CharacterControllerState>(ctx.entity) else {
            return;
        };
        state.standing_collider = spatial::capsule_collider(standing);
        state.crouching_collider = spatial::capsule_collider(crouching);
    }

    pub fn standing_capsule(&self) -> CapsuleShape {
        CapsuleShape::new(self.radius, self.standing_half_height)
    }

    /// The crouched capsule keeps its bottom where the standing capsule's bottom is.
    pub fn crouched_capsule(&self) -> CapsuleShape {
        CapsuleShape {
            offset_y: self.crouched_half_height - self.standing_half_height,
            ..CapsuleShape::new(self.radius, self.crouched_half_height)
        }
    }

    pub fn crouched_half_height(&self) -> f32 {
        self.crouched_half_height
    }

    pub fn initial_capsule_half_height(&self) -> f32 {
        self.standing_half_height
    }

    /// Vertical launch speed of a jump reaching `jump_height`.
    pub fn jump_speed(&self) -> f32 {
        (2.0 * self.gravity * self.jump_height).sqrt()
    }

    /// Apex of a jump whose launch speed is held for `jump_hold_time`.
    pub fn max_jump_height_with_hold(&self) -> f32 {
        self.jump_speed() * self.jump_hold_time + self.jump_height
    }
}

/// The intents written by input and captured into every saved move.
#[derive(Clone, Copy, Reflect, Default, Debug, PartialEq, Eq, Hash)]
pub struct MoveIntent {
    pub wants_sprint: bool,
    pub wants_dive: bool,
    pub wants_hook: bool,
    pub wants_crouch: bool,
    pub custom_jump_pressed: bool,
}

#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
pub struct CharacterControllerState {
    pub mode: MovementMode,
    pub intent: MoveIntent,
    /// Input direction in world space, unit length or zero.
    pub acceleration: Vec3,
    #[reflect(ignore)]
    pub standing_collider: Collider,
    #[reflect(ignore)]
    pub crouching_collider: Collider,
    pub grounded: Option<FloorHit>,
    pub crouching: bool,
    pub orient_to_movement: bool,
    pub last_ground: Duration,
    pub jump_count: u8,
    pub reached_destination: bool,
    pub slide: SlideState,
    pub dive: DiveState,
    pub hook: HookState,
    pub rope: RopeState,
    pub travel: Option<TravelData>,
    pub transition: Option<Transition>,
    pub pulses: EventPulses,
}

impl Default for CharacterControllerState {
    fn default() -> Self {
        Self {
            mode: MovementMode::default(),
            intent: MoveIntent::default(),
            acceleration: Vec3::ZERO,
            standing_collider: Collider::default(),
            crouching_collider: Collider::default(),
            grounded: None,
            crouching: false,
            orient_to_movement: true,
            last_ground: Duration::ZERO,
            jump_count: 0,
            reached_destination: false,
            slide: SlideState::default(),
            dive: DiveState::default(),
            hook: HookState::default(),
            rope: RopeState::default(),
            travel: None,
            transition: None,
            pulses: EventPulses::default(),
        }
    }
}

impl CharacterControllerState {
    pub fn collider(&self) -> &Collider {
        if self.crouching {
            &self.crouching_collider
        } else {
            &self.standing_collider
        }
    }

    pub fn capsule(&self, cfg: &CharacterController) -> CapsuleShape {
        if self.crouching {
            cfg.crouched_capsule()
        } else {
            cfg.standing_capsule()
        }
    }

    pub fn toggle_crouch(&mut self) {
        self.intent.wants_crouch = !self.intent.wants_crouch;
    }

    pub fn toggle_sprint(&mut self) {
        self.intent.wants_sprint = !self.intent.wants_sprint;
    }

    pub fn request_sprint(&mut self) {
        self.intent.wants_sprint = true;
    }

    pub fn finish_sprint(&mut self) {
        self.intent.wants_sprint = false;
    }

    pub fn request_dive(&mut self) {
        self.intent.wants_dive = true;
    }

    pub fn request_hook(&mut self) {
        self.intent.wants_hook = true;
    }

    pub fn release_hook(&mut self) {
        self.intent.wants_hook = false;
    }

    pub fn toggle_hook(&mut self) {
        self.intent.wants_hook = !self.intent.wants_hook;
    }

    pub fn press_jump(&mut self) {
        self.intent.custom_jump_pressed = true;
    }

    pub fn is_crouching(&self) -> bool {
        self.crouching
    }

    pub fn is_walking(&self) -> bool {
        self.mode == MovementMode::Walking
    }

    pub fn is_falling(&self) -> bool {
        self.mode == MovementMode::Falling
    }

    pub fn is_sliding(&self) -> bool {
        self.mode == MovementMode::SLIDE
    }

    pub fn is_hooking(&self) -> bool {
        self.mode == MovementMode::HOOK
    }

    pub fn is_on_rope(&self) -> bool {
        self.mode == MovementMode::ROPE
    }

    pub fn is_diving(&self) -> bool {
        self.dive.current_action() == Some(Montage::Dive)
    }

    pub fn can_sprint(&self, velocity: Vec3) -> bool {
        self.is_walking() && velocity.xz().length_squared() > 0.0
    }

    pub fn is_sprinting(&self, velocity: Vec3) -> bool {
        self.intent.wants_sprint && self.can_sprint(velocity)
    }

    /// Speed cap for input-driven movement in the current mode.
    pub fn max_speed(&self, cfg: &CharacterController, velocity: Vec3) -> f32 {
        if self.is_sprinting(velocity) {
            return if self.crouching {
                cfg.sprint_crouched_speed
            } else {
                cfg.sprint_speed
            };
        }
        match self.mode {
            MovementMode::HOOK => cfg.max_hook_speed,
            MovementMode::ROPE => cfg.max_rope_speed,
            _ if self.crouching => cfg.speed * cfg.crouch_speed_scale,
            _ => cfg.speed,
        }
    }
}
