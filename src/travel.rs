//! Travel toward a destination (hook and rope traversal) and timed snap transitions.

use tracing::{debug, trace};

use crate::{
    machine::{StepOutcome, Tick},
    mode::{self, MovementMode},
    prelude::*,
};

#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum TravelKind {
    Hook,
    Rope,
}

/// Piecewise linear speed multiplier over travel time. Keys are `(seconds, multiplier)`.
#[derive(Clone, Reflect, Debug, Default, PartialEq)]
pub struct SpeedCurve {
    keys: Vec<Vec2>,
}

impl SpeedCurve {
    pub fn new(keys: impl IntoIterator<Item = Vec2>) -> Self {
        let mut keys: Vec<Vec2> = keys.into_iter().collect();
        keys.sort_by(|a, b| a.x.total_cmp(&b.x));
        Self { keys }
    }

    pub fn sample(&self, time: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 1.0;
        };
        if time <= first.x {
            return first.y;
        }
        if time >= last.x {
            return last.y;
        }
        self.keys
            .windows(2)
            .find(|pair| time <= pair[1].x)
            .map_or(last.y, |pair| {
                let span = pair[1].x - pair[0].x;
                if span <= f32::EPSILON {
                    return pair[1].y;
                }
                pair[0].y + (pair[1].y - pair[0].y) * (time - pair[0].x) / span
            })
    }
}

/// The single active travel of a character.
#[derive(Clone, Reflect, Debug, PartialEq)]
pub struct TravelData {
    pub kind: TravelKind,
    pub destination: Vec3,
    /// Arrival distance. Zero never arrives.
    pub tolerance: f32,
    /// Velocity is projected onto this axis unless it is zero.
    pub axis: Vec3,
    pub speed: f32,
    pub curve: Option<SpeedCurve>,
    /// The pull only acts inside this distance of the destination.
    pub radius: f32,
    pub elapsed: f32,
}

impl TravelData {
    pub fn has_arrived(&self, position: Vec3) -> bool {
        self.tolerance > 0.0 && position.distance(self.destination) <= self.tolerance
    }
}

/// Store a new travel, replacing any previous one.
pub(crate) fn prepare_travel(
    tick: &mut Tick,
    kind: TravelKind,
    destination: Vec3,
    tolerance: f32,
    axis: Vec3,
    speed: f32,
    curve: Option<SpeedCurve>,
) {
    tick.state.travel = Some(TravelData {
        kind,
        destination,
        tolerance,
        axis,
        speed,
        curve,
        radius: 0.0,
        elapsed: 0.0,
    });
    tick.state.reached_destination = false;
}

/// Start pulling: the pull radius covers the current distance and velocity restarts from rest.
pub(crate) fn apply_travel(tick: &mut Tick) {
    let position = tick.transform.translation;
    if let Some(travel) = tick.state.travel.as_mut() {
        travel.radius = position.distance(travel.destination) + 1.0;
    }
    *tick.velocity = Vec3::ZERO;
}

pub(crate) fn clear_travel(tick: &mut Tick) {
    tick.state.travel = None;
}

fn arrive(tick: &mut Tick) {
    debug!("travel arrived at its destination");
    tick.state.reached_destination = true;
    mode::set_mode(tick, MovementMode::Falling);
}

/// Integrator shared by the hook and rope modes.
pub(crate) fn phys_travel(tick: &mut Tick, dt: f32) -> StepOutcome {
    let position = tick.transform.translation;
    let Some(travel) = tick.state.travel.as_mut() else {
        *tick.velocity = Vec3::ZERO;
        return StepOutcome::Stop;
    };
    if travel.has_arrived(position) {
        arrive(tick);
        return StepOutcome::Refund(dt);
    }

    travel.elapsed += dt;
    let to_destination = travel.destination - position;
    let distance = to_destination.length();
    let mut pull = Vec3::ZERO;
    if distance > 0.0 && distance <= travel.radius {
        let multiplier = travel.curve.as_ref().map_or(1.0, |c| c.sample(travel.elapsed));
        let speed = (travel.speed * multiplier).min(distance / dt);
        pull = to_destination / distance * speed;
    }
    if let Ok(axis) = Dir3::new(travel.axis) {
        pull = *axis * pull.dot(*axis);
    }
    let destination = travel.destination;

    *tick.velocity = pull;
    if (pull * dt).length_squared() <= f32::EPSILON * f32::EPSILON {
        return StepOutcome::Stop;
    }

    let capsule = tick.state.capsule(tick.cfg);
    let moved = tick.world.move_and_slide(position, pull, dt, capsule, None);
    tick.transform.translation = moved.position;
    *tick.velocity = (moved.position - position) / dt;
    trace!("travel step {position} -> {}", moved.position);

    face_toward(tick.transform, destination - moved.position);

    if moved.position == position {
        return StepOutcome::Stop;
    }
    if tick
        .state
        .travel
        .as_ref()
        .is_some_and(|travel| travel.has_arrived(moved.position))
    {
        arrive(tick);
    }
    StepOutcome::Continue
}

/// Yaw the character so its forward (-Z) points along `direction`'s horizontal part.
pub(crate) fn face_toward(transform: &mut Transform, direction: Vec3) {
    let horizontal = direction.with_y(0.0);
    if horizontal.length_squared() <= f32::EPSILON {
        return;
    }
    transform.rotation = Quat::from_rotation_y(f32::atan2(-horizontal.x, -horizontal.z));
}

#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// Flying toward a rope grab point; completion attaches to the rope.
    JumpToRope,
}

/// A timed straight-line move run by the flying integrator.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub start: Vec3,
    pub target: Vec3,
    pub duration: f32,
    pub elapsed: f32,
}

impl Transition {
    pub fn new(kind: TransitionKind, start: Vec3, target: Vec3, duration: f32) -> Self {
        Self {
            kind,
            start,
            target,
            duration,
            elapsed: 0.0,
        }
    }

    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.duration).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.progress() >= 1.0
    }

    pub fn position(&self) -> Vec3 {
        self.start.lerp(self.target, self.progress())
    }
}

/// Flying substep while a transition is armed.
pub(crate) fn phys_transition(tick: &mut Tick, dt: f32) -> StepOutcome {
    let Some(transition) = tick.state.transition.as_mut() else {
        return StepOutcome::Continue;
    };
    transition.elapsed = (transition.elapsed + dt).min(transition.duration);
    let next = transition.position();
    let complete = transition.is_complete();
    *tick.velocity = (next - tick.transform.translation) / dt;
    tick.transform.translation = next;
    if complete {
        StepOutcome::Stop
    } else {
        StepOutcome::Continue
    }
}

/// Post-movement completion of a finished transition.
pub(crate) fn complete_transition(tick: &mut Tick) {
    let Some(transition) = tick.state.transition else {
        return;
    };
    if !transition.is_complete() {
        return;
    }
    tick.state.transition = None;
    match transition.kind {
        TransitionKind::JumpToRope => {
            tick.transform.translation = transition.target;
            *tick.velocity = Vec3::ZERO;
            mode::set_mode(tick, MovementMode::ROPE);
        }
    }
}
