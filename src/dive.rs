//! Dives, flying dives and dodges, plus the busy actions (montages) they play.

use core::time::Duration;
use tracing::debug;

use crate::{
    CharacterControllerState,
    machine::Tick,
    mode::{self, MovementEvent, MovementMode},
    prelude::*,
};

/// Animation tokens. The movement only tracks how long each one keeps the character busy.
#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum Montage {
    Dive,
    FlyingDive,
    DodgeBack,
    JumpExtra,
}

#[derive(Clone, Reflect, Debug, PartialEq)]
pub struct ActionDurations {
    pub dive: Duration,
    pub flying_dive: Duration,
    pub dodge_back: Duration,
    pub jump_extra: Duration,
}

impl Default for ActionDurations {
    fn default() -> Self {
        Self {
            dive: Duration::from_millis(800),
            flying_dive: Duration::from_millis(500),
            dodge_back: Duration::from_millis(450),
            jump_extra: Duration::from_millis(400),
        }
    }
}

impl ActionDurations {
    pub fn get(&self, montage: Montage) -> Duration {
        match montage {
            Montage::Dive => self.dive,
            Montage::FlyingDive => self.flying_dive,
            Montage::DodgeBack => self.dodge_back,
            Montage::JumpExtra => self.jump_extra,
        }
    }
}

#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct ActionState {
    pub montage: Montage,
    pub remaining: Duration,
}

#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq)]
pub struct DiveState {
    /// Flying dives since the character last landed.
    pub flying_dive_count: u8,
    pub action: Option<ActionState>,
}

impl DiveState {
    pub fn current_action(&self) -> Option<Montage> {
        self.action.map(|action| action.montage)
    }
}

/// Which dive was performed last, as replicated to observers in two bits.
#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DiveOutcome {
    #[default]
    None = 0,
    Dive = 1,
    FlyingDive = 2,
    DodgeBack = 3,
}

impl DiveOutcome {
    /// Grounded and fast dives forward, falling dives in the air, anything else dodges back.
    pub fn select(grounded_fast: bool, falling: bool) -> Self {
        if grounded_fast {
            Self::Dive
        } else if falling {
            Self::FlyingDive
        } else {
            Self::DodgeBack
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::Dive,
            2 => Self::FlyingDive,
            3 => Self::DodgeBack,
            _ => Self::None,
        }
    }

    pub fn montage(self) -> Option<Montage> {
        match self {
            Self::None => None,
            Self::Dive => Some(Montage::Dive),
            Self::FlyingDive => Some(Montage::FlyingDive),
            Self::DodgeBack => Some(Montage::DodgeBack),
        }
    }
}

pub fn can_dive(state: &CharacterControllerState) -> bool {
    (state.mode == MovementMode::Walking && !state.crouching)
        || (state.mode == MovementMode::Falling && state.dive.flying_dive_count == 0)
}

pub(crate) fn perform_dive(tick: &mut Tick) {
    let horizontal_speed = tick.velocity.xz().length();
    let grounded_fast =
        tick.state.mode == MovementMode::Walking && horizontal_speed > tick.cfg.dive_min_speed;
    let falling = tick.state.mode == MovementMode::Falling;
    let outcome = DiveOutcome::select(grounded_fast, falling);

    let mut direction = tick.state.acceleration.with_y(0.0).normalize_or_zero();
    if direction == Vec3::ZERO {
        direction = tick.transform.forward().with_y(0.0).normalize_or_zero();
    }

    let (impulse, montage) = match outcome {
        DiveOutcome::Dive => {
            tick.state.intent.wants_crouch = true;
            tick.events.push(MovementEvent::Dived);
            (tick.cfg.dive_impulse, Montage::Dive)
        }
        DiveOutcome::FlyingDive => {
            mode::set_mode(tick, MovementMode::Flying);
            tick.state.dive.flying_dive_count = tick.state.dive.flying_dive_count.saturating_add(1);
            (tick.cfg.flying_dive_impulse, Montage::FlyingDive)
        }
        DiveOutcome::DodgeBack => {
            direction = -direction;
            tick.state.orient_to_movement = false;
            (tick.cfg.dodge_back_impulse, Montage::DodgeBack)
        }
        DiveOutcome::None => return,
    };
    debug!("{outcome:?} with impulse {impulse}");

    *tick.velocity = direction * impulse + Vec3::Y * tick.velocity.y;
    play_action(tick, montage);
    tick.state.pulses.record_dive(outcome);
}

/// Start `montage` as the busy action. Restarting the running montage does nothing; a
/// different running montage is finished first.
pub(crate) fn play_action(tick: &mut Tick, montage: Montage) {
    if let Some(current) = tick.state.dive.action {
        if current.montage == montage {
            return;
        }
        finish_action(tick);
    }
    tick.state.dive.action = Some(ActionState {
        montage,
        remaining: tick.cfg.actions.get(montage),
    });
    tick.events.push(MovementEvent::PlayMontage(montage));
}

/// End the busy action and run its on-finish transition.
pub(crate) fn finish_action(tick: &mut Tick) {
    let Some(action) = tick.state.dive.action.take() else {
        return;
    };
    debug!("{:?} finished", action.montage);
    match action.montage {
        Montage::Dive => tick.state.intent.wants_crouch = false,
        Montage::DodgeBack => tick.state.orient_to_movement = true,
        Montage::FlyingDive => {
            if tick.state.mode == MovementMode::Flying && tick.state.transition.is_none() {
                mode::set_mode(tick, MovementMode::Falling);
            }
        }
        Montage::JumpExtra => {}
    }
}

pub(crate) fn finish_elapsed_action(tick: &mut Tick) {
    if tick
        .state
        .dive
        .action
        .is_some_and(|action| action.remaining.is_zero())
    {
        finish_action(tick);
    }
}

pub(crate) fn advance_action(state: &mut CharacterControllerState, dt: f32) {
    if let Some(action) = state.dive.action.as_mut() {
        action.remaining = action.remaining.saturating_sub(Duration::from_secs_f32(dt));
    }
}
