//! Network roles and the event pulses that replicate one-shot movement events.
//!
//! The authority bumps a wrapping counter per event kind. Observers diff the counters they
//! last saw against the replicated ones and replay that many cues, so several events
//! between two replications are not coalesced into one. A counter still aliases once more
//! than 255 events of one kind happen between two replications.

use tracing::trace;

use crate::{dive::DiveOutcome, mode::MovementEvent, prelude::*};

pub(super) fn plugin(app: &mut App) {
    app.add_message::<CharacterEvent>()
        .add_message::<PulseCue>()
        .add_systems(Update, observe_pulses);
}

/// How this process relates to a character.
#[derive(Component, Clone, Copy, Reflect, Debug, Default, PartialEq, Eq, Hash)]
#[reflect(Component)]
pub enum NetRole {
    /// No networking: simulate everything locally.
    #[default]
    Standalone,
    /// The server's copy.
    Authority,
    /// The locally controlled, predicted copy on a client.
    AutonomousProxy,
    /// Someone else's character on a client. Only replays replicated state.
    SimulatedProxy,
}

impl NetRole {
    /// Whether this role may acquire hook anchors and ropes.
    pub fn acquires_targets(self) -> bool {
        self != Self::SimulatedProxy
    }
}

/// Wrapping counters per event kind plus the tag of the last dive.
#[derive(Clone, Copy, Reflect, Debug, Default, PartialEq, Eq, Hash)]
pub struct EventPulses {
    pub find_hook: u8,
    pub find_rope: u8,
    pub dive: u8,
    pub jump_extra: u8,
    pub dive_outcome: DiveOutcome,
}

impl EventPulses {
    pub fn record_dive(&mut self, outcome: DiveOutcome) {
        self.dive = self.dive.wrapping_add(1);
        self.dive_outcome = outcome;
    }

    /// Cues for every event counted since `previous`.
    pub fn cues_since(&self, previous: &EventPulses) -> impl Iterator<Item = Cue> + use<> {
        let count = |now: u8, before: u8| usize::from(now.wrapping_sub(before));
        let outcome = self.dive_outcome;
        core::iter::repeat_n(Cue::FoundHook, count(self.find_hook, previous.find_hook))
            .chain(core::iter::repeat_n(
                Cue::FoundRope,
                count(self.find_rope, previous.find_rope),
            ))
            .chain(core::iter::repeat_n(
                Cue::Dived(outcome),
                count(self.dive, previous.dive),
            ))
            .chain(core::iter::repeat_n(
                Cue::JumpExtra,
                count(self.jump_extra, previous.jump_extra),
            ))
    }
}

/// The pulses as last written by the authority. Replicate this component.
#[derive(Component, Clone, Copy, Reflect, Debug, Default, PartialEq, Deref, DerefMut)]
#[reflect(Component)]
pub struct ReplicatedPulses(pub EventPulses);

/// Put on characters whose pulses arrive over the network to turn them into [`PulseCue`]s.
#[derive(Component, Clone, Copy, Reflect, Debug, Default)]
#[reflect(Component)]
#[require(ReplicatedPulses)]
pub struct PulseObserver {
    pub last_seen: EventPulses,
}

impl PulseObserver {
    pub fn observe(&mut self, current: EventPulses) -> Vec<Cue> {
        let cues = current.cues_since(&self.last_seen).collect();
        self.last_seen = current;
        cues
    }
}

/// A one-shot event reconstructed from pulses.
#[derive(Clone, Copy, Reflect, Debug, PartialEq, Eq)]
pub enum Cue {
    FoundHook,
    FoundRope,
    /// Every dive cue carries the latest outcome, older ones are not replicated.
    Dived(DiveOutcome),
    JumpExtra,
}

impl Cue {
    /// The action an observer should play for this cue, if any.
    pub fn montage(self) -> Option<Montage> {
        match self {
            Cue::Dived(outcome) => outcome.montage(),
            Cue::JumpExtra => Some(Montage::JumpExtra),
            Cue::FoundHook | Cue::FoundRope => None,
        }
    }
}

#[derive(Message, Clone, Copy, Debug, PartialEq)]
pub struct PulseCue {
    pub entity: Entity,
    pub cue: Cue,
}

/// A movement event emitted while ticking a character.
#[derive(Message, Clone, Copy, Debug, PartialEq)]
pub struct CharacterEvent {
    pub entity: Entity,
    pub event: MovementEvent,
}

fn observe_pulses(
    mut observers: Query<(Entity, &mut PulseObserver, &ReplicatedPulses), Changed<ReplicatedPulses>>,
    mut cues: MessageWriter<PulseCue>,
) {
    for (entity, mut observer, pulses) in &mut observers {
        let observed = observer.observe(pulses.0);
        if !observed.is_empty() {
            trace!("{entity}: {} cues from pulses", observed.len());
        }
        cues.write_batch(observed.into_iter().map(|cue| PulseCue { entity, cue }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::message::Messages;

    #[test]
    fn simulated_proxies_do_not_acquire() {
        assert!(NetRole::Standalone.acquires_targets());
        assert!(NetRole::Authority.acquires_targets());
        assert!(NetRole::AutonomousProxy.acquires_targets());
        assert!(!NetRole::SimulatedProxy.acquires_targets());
    }

    #[test]
    fn counts_every_event_between_replications() {
        let mut observer = PulseObserver::default();
        let mut pulses = EventPulses::default();
        pulses.find_hook = pulses.find_hook.wrapping_add(2);
        pulses.record_dive(DiveOutcome::Dive);
        pulses.record_dive(DiveOutcome::DodgeBack);

        let cues = observer.observe(pulses);
        assert_eq!(
            cues,
            vec![
                Cue::FoundHook,
                Cue::FoundHook,
                Cue::Dived(DiveOutcome::DodgeBack),
                Cue::Dived(DiveOutcome::DodgeBack),
            ]
        );
        assert!(observer.observe(pulses).is_empty());
    }

    #[test]
    fn counters_wrap() {
        let mut observer = PulseObserver {
            last_seen: EventPulses {
                jump_extra: 254,
                ..default()
            },
        };
        let pulses = EventPulses {
            jump_extra: 1,
            ..default()
        };
        assert_eq!(observer.observe(pulses), vec![Cue::JumpExtra; 3]);
    }

    #[test]
    fn cue_montages() {
        assert_eq!(Cue::Dived(DiveOutcome::FlyingDive).montage(), Some(Montage::FlyingDive));
        assert_eq!(Cue::Dived(DiveOutcome::None).montage(), None);
        assert_eq!(Cue::JumpExtra.montage(), Some(Montage::JumpExtra));
        assert_eq!(Cue::FoundRope.montage(), None);
    }

    #[test]
    fn observer_system_writes_cues() {
        let mut app = App::new();
        app.add_message::<PulseCue>()
            .add_systems(Update, observe_pulses);
        let entity = app.world_mut().spawn(PulseObserver::default()).id();
        app.world_mut()
            .entity_mut(entity)
            .insert(ReplicatedPulses(EventPulses {
                find_rope: 1,
                ..default()
            }));
        app.update();

        let messages = app.world().resource::<Messages<PulseCue>>();
        let mut cursor = messages.get_cursor();
        let cues: Vec<_> = cursor.read(messages).copied().collect();
        assert_eq!(
            cues,
            vec![PulseCue {
                entity,
                cue: Cue::FoundRope
            }]
        );
    }
}
