//! Locomotion modes and the mode-change hook.

use tracing::debug;

use crate::{
    CharacterControllerState, hook, machine::Tick, prelude::*, rope, slide, travel::Transition,
};

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq, Eq, Hash)]
pub enum MovementMode {
    #[default]
    Walking,
    Falling,
    Flying,
    Custom(CustomMode),
}

#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum CustomMode {
    Slide,
    /// Tag only: diving is an impulse plus a busy action and has no integrator.
    Dive,
    Hook,
    Rope,
}

impl MovementMode {
    pub const SLIDE: Self = Self::Custom(CustomMode::Slide);
    pub const HOOK: Self = Self::Custom(CustomMode::Hook);
    pub const ROPE: Self = Self::Custom(CustomMode::Rope);

    pub fn is_custom(self, mode: CustomMode) -> bool {
        self == Self::Custom(mode)
    }

    /// Ground-classified modes: walking and sliding.
    pub fn is_moving_on_ground(self) -> bool {
        matches!(self, Self::Walking | Self::SLIDE)
    }
}

/// Switch to `next`, running exit logic for the current mode and entry logic for `next`.
/// Does nothing if `next` is already active.
pub(crate) fn set_mode(tick: &mut Tick, next: MovementMode) {
    let previous = tick.state.mode;
    if previous == next {
        return;
    }
    debug!("movement mode {previous:?} -> {next:?}");
    tick.state.mode = next;
    on_mode_changed(tick, previous, next);
}

fn on_mode_changed(tick: &mut Tick, previous: MovementMode, next: MovementMode) {
    if previous == MovementMode::SLIDE {
        slide::finish_slide(tick);
    }
    if next == MovementMode::SLIDE {
        slide::enter_slide(tick);
    }

    if previous == MovementMode::Falling && next.is_moving_on_ground() {
        tick.state.dive.flying_dive_count = 0;
        tick.state.jump_count = 0;
    }

    if previous == MovementMode::Flying && next != MovementMode::Flying {
        // A snap transition only runs while flying; completion may be what moved us out.
        if let Some(Transition { kind, .. }) = tick.state.transition.take() {
            debug!("dropping {kind:?} transition on leaving flying");
        }
    }

    if previous == MovementMode::HOOK {
        hook::finish_hook(tick);
    }
    if next == MovementMode::HOOK {
        hook::enter_hook(tick);
    }

    if previous == MovementMode::ROPE {
        rope::finish_rope(tick);
    }
    if next == MovementMode::ROPE {
        rope::enter_rope(tick);
    }

    tick.events.push(MovementEvent::ModeChanged { previous, next });
}

/// Things that happened during a tick that collaborators (animation, camera, effects)
/// may react to. Replays discard them.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub enum MovementEvent {
    ModeChanged {
        previous: MovementMode,
        next: MovementMode,
    },
    PlayMontage(crate::dive::Montage),
    Dived,
    Jumped {
        count: u8,
    },
    CableAttached {
        anchor: Vec3,
    },
    CableDetached,
}
