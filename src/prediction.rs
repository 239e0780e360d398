//! Client side prediction and server reconciliation.
//!
//! The owning client records a [`SavedMove`] per tick, merges runs of identical moves,
//! and sends each finished move as a [`ServerMove`]. The server re-simulates it and either
//! acknowledges it or answers with a [`Snapshot`]; the client then restores the snapshot
//! and replays every move the server has not acknowledged yet.

use std::collections::VecDeque;

use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::{debug, warn};

use crate::{
    CharacterControllerState, MoveIntent,
    flags::{CompressedFlags, MoveFlag},
    machine::{self, Tick},
    mode::{MovementEvent, MovementMode},
    prelude::*,
    probe::MovementWorld,
    spatial::ParkourWorld,
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_message::<OutgoingMove>()
            .add_message::<IncomingMove>()
            .add_message::<ServerCorrection>()
            .add_systems(
                schedule,
                (simulate_remote_moves, apply_corrections)
                    .chain()
                    .in_set(ParkourSystems::ApplyNetwork),
            );
    }
}

impl MoveIntent {
    pub fn compressed(&self) -> CompressedFlags {
        let mut flags = CompressedFlags::default();
        flags.set(MoveFlag::WantsSprint, self.wants_sprint);
        flags.set(MoveFlag::WantsDive, self.wants_dive);
        flags.set(MoveFlag::WantsHook, self.wants_hook);
        flags.set(MoveFlag::JumpPressed, self.custom_jump_pressed);
        flags.set(MoveFlag::WantsCrouch, self.wants_crouch);
        flags
    }

    /// Unknown bits are ignored.
    pub fn from_compressed(flags: CompressedFlags) -> Self {
        Self {
            wants_sprint: flags.has(MoveFlag::WantsSprint),
            wants_dive: flags.has(MoveFlag::WantsDive),
            wants_hook: flags.has(MoveFlag::WantsHook),
            wants_crouch: flags.has(MoveFlag::WantsCrouch),
            custom_jump_pressed: flags.has(MoveFlag::JumpPressed),
        }
    }
}

/// Overwrite the intents of `state` with the ones carried by a wire flag byte.
pub fn update_from_compressed_flags(state: &mut CharacterControllerState, flags: u8) {
    state.intent = MoveIntent::from_compressed(CompressedFlags::new(flags));
}

/// Everything needed to replay one or more identical ticks.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct SavedMove {
    pub id: u32,
    pub timestamp: f32,
    /// Length of every merged tick.
    pub delta_time: f32,
    /// Number of merged ticks.
    pub ticks: u16,
    pub acceleration: Vec3,
    pub control_yaw: f32,
    pub start_mode: MovementMode,
    pub intent: MoveIntent,
    pub flying_dive_count: u8,
    pub reached_destination: bool,
    pub end_position: Vec3,
    pub end_velocity: Vec3,
    pub acknowledged: bool,
}

impl SavedMove {
    /// Capture the inputs of the tick that is about to run.
    pub fn set_move_for(
        id: u32,
        timestamp: f32,
        delta_time: f32,
        state: &CharacterControllerState,
        control_yaw: f32,
    ) -> Self {
        Self {
            id,
            timestamp,
            delta_time,
            ticks: 1,
            acceleration: state.acceleration,
            control_yaw,
            start_mode: state.mode,
            intent: state.intent,
            flying_dive_count: state.dive.flying_dive_count,
            reached_destination: state.reached_destination,
            end_position: Vec3::ZERO,
            end_velocity: Vec3::ZERO,
            acknowledged: false,
        }
    }

    /// Record where the tick ended.
    pub fn finalize(&mut self, transform: &Transform, velocity: Vec3) {
        self.end_position = transform.translation;
        self.end_velocity = velocity;
    }

    /// Put the recorded inputs back before a replayed tick.
    pub fn prep_move_for(&self, state: &mut CharacterControllerState) {
        state.intent = self.intent;
        state.acceleration = self.acceleration;
    }

    pub fn duration(&self) -> f32 {
        f32::from(self.ticks) * self.delta_time
    }

    pub fn compressed_flags(&self) -> CompressedFlags {
        self.intent.compressed()
    }

    /// Whether `newer`, recorded right after this move, can be folded into it without
    /// changing the outcome of a replay.
    pub fn can_combine_with(&self, newer: &SavedMove, max_duration: f32) -> bool {
        if self.acknowledged || newer.acknowledged {
            return false;
        }
        if self.intent != newer.intent
            || self.flying_dive_count != newer.flying_dive_count
            || self.reached_destination != newer.reached_destination
        {
            return false;
        }
        if self.delta_time != newer.delta_time
            || self.acceleration != newer.acceleration
            || self.control_yaw != newer.control_yaw
            || self.start_mode != newer.start_mode
        {
            return false;
        }
        let Some(ticks) = self.ticks.checked_add(newer.ticks) else {
            return false;
        };
        f32::from(ticks) * self.delta_time <= max_duration
    }

    pub fn combine_with(&mut self, newer: &SavedMove) {
        self.ticks = self.ticks.saturating_add(newer.ticks);
        self.end_position = newer.end_position;
        self.end_velocity = newer.end_velocity;
    }

    pub fn to_server_move(&self) -> ServerMove {
        ServerMove {
            id: self.id,
            timestamp: self.timestamp,
            delta_time: self.delta_time,
            ticks: self.ticks,
            acceleration: self.acceleration,
            control_yaw: self.control_yaw,
            flags: self.compressed_flags().bits,
            client_position: self.end_position,
        }
    }
}

/// A saved move as it travels from the client to the server.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct ServerMove {
    pub id: u32,
    pub timestamp: f32,
    pub delta_time: f32,
    pub ticks: u16,
    pub acceleration: Vec3,
    pub control_yaw: f32,
    pub flags: u8,
    /// Where the client predicted the move would end.
    pub client_position: Vec3,
}

/// Authoritative character state sent with a correction.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub transform: Transform,
    pub velocity: Vec3,
    pub state: CharacterControllerState,
}

impl Snapshot {
    pub fn capture(transform: &Transform, velocity: Vec3, state: &CharacterControllerState) -> Self {
        Self {
            transform: *transform,
            velocity,
            state: state.clone(),
        }
    }

    /// Overwrite the local state. The local colliders are kept.
    pub fn restore(
        &self,
        transform: &mut Transform,
        velocity: &mut Vec3,
        state: &mut CharacterControllerState,
    ) {
        let standing = core::mem::take(&mut state.standing_collider);
        let crouching = core::mem::take(&mut state.crouching_collider);
        *state = self.state.clone();
        state.standing_collider = standing;
        state.crouching_collider = crouching;
        *transform = self.transform;
        *velocity = self.velocity;
    }
}

/// Saved moves of a locally controlled character on a client.
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
pub struct ClientPrediction {
    /// Sent to the server and not acknowledged yet, oldest first.
    pub saved_moves: VecDeque<SavedMove>,
    /// The newest move, held back while later identical moves are merged into it.
    pub pending: Option<SavedMove>,
    pub max_saved_moves: usize,
    /// Longest span of time a merged move may cover, in seconds.
    pub max_combine_duration: f32,
    next_id: u32,
}

impl Default for ClientPrediction {
    fn default() -> Self {
        Self {
            saved_moves: VecDeque::new(),
            pending: None,
            max_saved_moves: 96,
            max_combine_duration: 0.1,
            next_id: 1,
        }
    }
}

impl ClientPrediction {
    /// Id for the next recorded move. Stays the same while moves are merged.
    pub fn next_move_id(&self) -> u32 {
        self.next_id
    }

    /// Add a finished move. Returns the previously pending move once it can no longer
    /// grow; that move is now waiting for an acknowledgement and should be sent.
    pub fn record(&mut self, saved: SavedMove) -> Option<SavedMove> {
        if let Some(pending) = self.pending.as_mut()
            && pending.can_combine_with(&saved, self.max_combine_duration)
        {
            pending.combine_with(&saved);
            return None;
        }
        self.next_id = saved.id.wrapping_add(1);
        let flushed = self.pending.replace(saved)?;
        self.push_saved(flushed);
        Some(flushed)
    }

    /// Send the pending move now instead of waiting for it to stop growing.
    pub fn flush(&mut self) -> Option<SavedMove> {
        let flushed = self.pending.take()?;
        self.push_saved(flushed);
        Some(flushed)
    }

    fn push_saved(&mut self, saved: SavedMove) {
        if self.saved_moves.len() >= self.max_saved_moves {
            warn!(
                "more than {} unacknowledged moves, dropping the oldest",
                self.max_saved_moves
            );
            self.saved_moves.pop_front();
        }
        self.saved_moves.push_back(saved);
    }

    /// The server has processed every move up to `move_id`.
    pub fn acknowledge(&mut self, move_id: u32) {
        for saved in self.saved_moves.iter_mut().filter(|m| m.id <= move_id) {
            saved.acknowledged = true;
        }
        self.saved_moves.retain(|m| !m.acknowledged);
    }

    pub fn unacknowledged(&self) -> impl Iterator<Item = &SavedMove> {
        self.saved_moves.iter().chain(self.pending.iter())
    }

    /// Re-simulate every unacknowledged move on top of the current state.
    pub fn replay(
        &mut self,
        transform: &mut Transform,
        velocity: &mut Vec3,
        state: &mut CharacterControllerState,
        cfg: &CharacterController,
        world: &dyn MovementWorld,
        role: NetRole,
    ) {
        let moves = self.saved_moves.iter_mut().chain(self.pending.iter_mut());
        for saved in moves {
            for _ in 0..saved.ticks {
                saved.prep_move_for(state);
                // replays do not repeat events
                let mut events = Vec::new();
                step(
                    transform,
                    velocity,
                    state,
                    cfg,
                    world,
                    role,
                    saved.delta_time,
                    &mut events,
                );
            }
            saved.finalize(transform, *velocity);
        }
    }

    /// Restore the server's `snapshot` and replay every unacknowledged move on top of it.
    /// The live intent survives, since input may have changed after the last recorded move.
    pub fn correct(
        &mut self,
        snapshot: &Snapshot,
        transform: &mut Transform,
        velocity: &mut Vec3,
        state: &mut CharacterControllerState,
        cfg: &CharacterController,
        world: &dyn MovementWorld,
        role: NetRole,
    ) {
        let live_intent = state.intent;
        snapshot.restore(transform, velocity, state);
        self.replay(transform, velocity, state, cfg, world, role);
        state.intent = live_intent;
    }

    /// Whether the server's position is too far from what this client predicted.
    pub fn needs_correction(predicted: Vec3, authoritative: Vec3, max_error: f32) -> bool {
        predicted.distance_squared(authoritative) > max_error * max_error
    }
}

fn step(
    transform: &mut Transform,
    velocity: &mut Vec3,
    state: &mut CharacterControllerState,
    cfg: &CharacterController,
    world: &dyn MovementWorld,
    role: NetRole,
    dt: f32,
    events: &mut Vec<MovementEvent>,
) {
    let mut tick = Tick {
        transform,
        velocity,
        state,
        cfg,
        world,
        role,
        dt,
        events,
    };
    machine::advance_tick(&mut tick);
}

/// Moves received from a client, waiting to be simulated by the server.
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
pub struct RemoteMoves {
    pub queue: VecDeque<ServerMove>,
    pub last_processed: Option<u32>,
    /// Larger prediction errors are answered with a snapshot instead of an ack.
    pub correction_distance: f32,
    pub max_delta_time: f32,
    pub max_ticks: u16,
    /// Latest view yaw sent by the client.
    pub control_yaw: f32,
}

impl Default for RemoteMoves {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last_processed: None,
            correction_distance: 0.05,
            max_delta_time: 0.1,
            max_ticks: 16,
            control_yaw: 0.0,
        }
    }
}

impl RemoteMoves {
    /// Queue `server_move` unless it was already processed or queued.
    pub fn push(&mut self, server_move: ServerMove) -> bool {
        let newest = self
            .queue
            .back()
            .map(|m| m.id)
            .or(self.last_processed);
        if newest.is_some_and(|newest| server_move.id <= newest) {
            debug!("dropping stale move {}", server_move.id);
            return false;
        }
        self.queue.push_back(server_move);
        true
    }

    /// Run one client move on the server and tell whether the client predicted it right.
    pub fn simulate(
        &mut self,
        server_move: &ServerMove,
        transform: &mut Transform,
        velocity: &mut Vec3,
        state: &mut CharacterControllerState,
        cfg: &CharacterController,
        world: &dyn MovementWorld,
        role: NetRole,
        events: &mut Vec<MovementEvent>,
    ) -> Option<Snapshot> {
        if !server_move.delta_time.is_finite() || !server_move.acceleration.is_finite() {
            warn!(
                "move {} is not finite ({}s, {}), correcting the client",
                server_move.id, server_move.delta_time, server_move.acceleration
            );
            self.last_processed = Some(server_move.id);
            return Some(Snapshot::capture(transform, *velocity, state));
        }
        let delta_time = server_move.delta_time.clamp(0.0, self.max_delta_time);
        let ticks = server_move.ticks.min(self.max_ticks);
        if delta_time != server_move.delta_time || ticks != server_move.ticks {
            warn!(
                "move {} clamped to {ticks} x {delta_time}s",
                server_move.id
            );
        }
        let acceleration = server_move.acceleration.clamp_length_max(1.0);
        for _ in 0..ticks {
            update_from_compressed_flags(state, server_move.flags);
            state.acceleration = acceleration;
            step(transform, velocity, state, cfg, world, role, delta_time, events);
        }
        self.last_processed = Some(server_move.id);
        self.control_yaw = server_move.control_yaw;

        ClientPrediction::needs_correction(
            server_move.client_position,
            transform.translation,
            self.correction_distance,
        )
        .then(|| Snapshot::capture(transform, *velocity, state))
    }
}

/// A finished move for the transport to deliver to the server.
#[derive(Message, Clone, Debug)]
pub struct OutgoingMove {
    pub entity: Entity,
    pub server_move: ServerMove,
}

/// A client move delivered by the transport to the server's copy of `entity`.
#[derive(Message, Clone, Debug)]
pub struct IncomingMove {
    pub entity: Entity,
    pub server_move: ServerMove,
}

/// The server's answer to a move. `None` acknowledges the prediction.
#[derive(Message, Clone, Debug)]
pub struct ServerCorrection {
    pub entity: Entity,
    pub move_id: u32,
    pub snapshot: Option<Box<Snapshot>>,
}

fn simulate_remote_moves(
    mut incoming: MessageReader<IncomingMove>,
    mut kccs: Query<(
        Entity,
        &CharacterController,
        &mut CharacterControllerState,
        &mut Transform,
        &mut LinearVelocity,
        &NetRole,
        &mut RemoteMoves,
        Option<&mut ReplicatedPulses>,
    )>,
    world: ParkourWorld,
    mut corrections: MessageWriter<ServerCorrection>,
    mut character_events: MessageWriter<CharacterEvent>,
) {
    for received in incoming.read() {
        let Ok((.., mut remote, _)) = kccs.get_mut(received.entity) else {
            debug!("move for unknown character {}", received.entity);
            continue;
        };
        remote.push(received.server_move);
    }

    for (entity, cfg, mut state, mut transform, mut velocity, role, mut remote, pulses) in
        &mut kccs
    {
        if remote.queue.is_empty() {
            continue;
        }
        let avian = world.for_character(cfg, &state);
        let mut events = Vec::new();
        while let Some(server_move) = remote.queue.pop_front() {
            let snapshot = remote.simulate(
                &server_move,
                &mut transform,
                &mut velocity.0,
                &mut state,
                cfg,
                &avian,
                *role,
                &mut events,
            );
            if snapshot.is_some() {
                debug!("correcting {entity} after move {}", server_move.id);
            }
            corrections.write(ServerCorrection {
                entity,
                move_id: server_move.id,
                snapshot: snapshot.map(Box::new),
            });
        }
        if let Some(mut pulses) = pulses {
            pulses.0 = state.pulses;
        }
        character_events.write_batch(
            events
                .into_iter()
                .map(|event| CharacterEvent { entity, event }),
        );
    }
}

fn apply_corrections(
    mut corrections: MessageReader<ServerCorrection>,
    mut kccs: Query<(
        &CharacterController,
        &mut CharacterControllerState,
        &mut Transform,
        &mut LinearVelocity,
        &NetRole,
        &mut ClientPrediction,
    )>,
    world: ParkourWorld,
) {
    for correction in corrections.read() {
        let Ok((cfg, mut state, mut transform, mut velocity, role, mut prediction)) =
            kccs.get_mut(correction.entity)
        else {
            continue;
        };
        prediction.acknowledge(correction.move_id);
        let Some(snapshot) = &correction.snapshot else {
            continue;
        };
        debug!(
            "{} corrected at move {}, replaying {} moves",
            correction.entity,
            correction.move_id,
            prediction.unacknowledged().count()
        );
        let avian = world.for_character(cfg, &state);
        prediction.correct(
            snapshot,
            &mut transform,
            &mut velocity.0,
            &mut state,
            cfg,
            &avian,
            *role,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use proptest::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    /// Run one live tick the way the character system does and record it.
    fn live_tick(harness: &mut Harness, prediction: &mut ClientPrediction, intent: MoveIntent, acceleration: Vec3) {
        harness.state.intent = intent;
        harness.state.acceleration = acceleration;
        let mut saved = SavedMove::set_move_for(
            prediction.next_move_id(),
            0.0,
            DT,
            &harness.state,
            0.0,
        );
        harness.advance(DT);
        saved.finalize(&harness.transform, harness.velocity);
        prediction.record(saved);
    }

    fn replay(harness: &mut Harness, prediction: &mut ClientPrediction) {
        prediction.replay(
            &mut harness.transform,
            &mut harness.velocity,
            &mut harness.state,
            &harness.cfg,
            &harness.world,
            harness.role,
        );
    }

    fn moving(direction: Vec3) -> (MoveIntent, Vec3) {
        (MoveIntent::default(), direction)
    }

    #[test]
    fn flags_recover_the_custom_intents() {
        let intent = MoveIntent {
            wants_sprint: true,
            wants_dive: false,
            wants_hook: true,
            wants_crouch: true,
            custom_jump_pressed: false,
        };
        let flags = intent.compressed();
        assert_eq!(flags.custom_bits(), 0b101);
        assert_eq!(flags.bits, 0b10_0101);

        let mut state = CharacterControllerState::default();
        update_from_compressed_flags(&mut state, flags.bits | 0b1100_1000);
        assert_eq!(state.intent, intent);
    }

    #[test]
    fn identical_moves_combine() {
        let mut harness = Harness::walking();
        let mut prediction = ClientPrediction::default();
        let (intent, acceleration) = moving(Vec3::NEG_Z);
        for _ in 0..3 {
            live_tick(&mut harness, &mut prediction, intent, acceleration);
        }
        assert!(prediction.saved_moves.is_empty());
        let pending = prediction.pending.unwrap();
        assert_eq!(pending.ticks, 3);
        assert_eq!(pending.id, 1);
        assert_eq!(pending.end_position, harness.transform.translation);
        assert_eq!(prediction.next_move_id(), 2);
    }

    #[test]
    fn different_intents_flush() {
        let mut harness = Harness::walking();
        let mut prediction = ClientPrediction::default();
        let (intent, acceleration) = moving(Vec3::NEG_Z);
        live_tick(&mut harness, &mut prediction, intent, acceleration);
        let sprinting = MoveIntent {
            wants_sprint: true,
            ..intent
        };
        live_tick(&mut harness, &mut prediction, sprinting, acceleration);

        assert_eq!(prediction.saved_moves.len(), 1);
        assert_eq!(prediction.saved_moves[0].id, 1);
        assert_eq!(prediction.pending.map(|m| m.id), Some(2));
        let sent = prediction.saved_moves[0].to_server_move();
        assert_eq!(sent.flags, 0);
        assert_eq!(sent.ticks, 1);
    }

    #[test]
    fn combine_window_and_acks_are_respected() {
        let base = SavedMove::set_move_for(1, 0.0, DT, &CharacterControllerState::default(), 0.0);
        let newer = SavedMove { id: 2, ..base };
        assert!(base.can_combine_with(&newer, 0.1));
        let long = SavedMove { ticks: 6, ..base };
        assert!(!long.can_combine_with(&newer, 0.1));
        let acked = SavedMove {
            acknowledged: true,
            ..base
        };
        assert!(!acked.can_combine_with(&newer, 0.1));
        let turned = SavedMove {
            control_yaw: 1.0,
            ..newer
        };
        assert!(!base.can_combine_with(&turned, 0.1));
        let counted = SavedMove {
            flying_dive_count: 1,
            ..newer
        };
        assert!(!base.can_combine_with(&counted, 0.1));
    }

    #[test]
    fn queue_is_bounded() {
        let mut prediction = ClientPrediction {
            max_saved_moves: 2,
            ..default()
        };
        let state = CharacterControllerState::default();
        for id in 1..=5 {
            let yaw = id as f32;
            prediction.record(SavedMove::set_move_for(id, 0.0, DT, &state, yaw));
        }
        let ids: Vec<_> = prediction.saved_moves.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(prediction.pending.map(|m| m.id), Some(5));
    }

    #[test]
    fn flush_respects_the_bound() {
        let mut prediction = ClientPrediction {
            max_saved_moves: 2,
            ..default()
        };
        let state = CharacterControllerState::default();
        for id in 1..=4 {
            prediction.record(SavedMove::set_move_for(id, 0.0, DT, &state, id as f32));
            prediction.flush();
        }
        let ids: Vec<_> = prediction.saved_moves.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(prediction.pending.is_none());
    }

    #[test]
    fn acknowledge_drops_processed_moves() {
        let mut prediction = ClientPrediction::default();
        let state = CharacterControllerState::default();
        for id in 1..=4 {
            prediction.record(SavedMove::set_move_for(id, 0.0, DT, &state, id as f32));
        }
        prediction.acknowledge(2);
        let ids: Vec<_> = prediction.unacknowledged().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(prediction.flush().map(|m| m.id), Some(4));
        assert!(prediction.pending.is_none());
    }

    #[test]
    fn correction_replays_on_top_of_the_snapshot() {
        let mut harness = Harness::walking();
        let mut prediction = ClientPrediction::default();
        let start = Snapshot::capture(&harness.transform, harness.velocity, &harness.state);
        for step in 0..20 {
            let direction = if step < 10 { Vec3::NEG_Z } else { Vec3::X };
            live_tick(&mut harness, &mut prediction, MoveIntent::default(), direction);
        }
        let predicted = harness.transform.translation;

        // The server saw the character one meter further left when the first move began.
        let mut authoritative = start.clone();
        authoritative.transform.translation.x -= 1.0;
        authoritative.restore(&mut harness.transform, &mut harness.velocity, &mut harness.state);
        replay(&mut harness, &mut prediction);

        let corrected = harness.transform.translation;
        assert!((corrected - (predicted - Vec3::X)).length() < 1.0e-4);
        let last = prediction.unacknowledged().last().copied().unwrap();
        assert_eq!(last.end_position, corrected);
    }

    #[test]
    fn correction_keeps_input_newer_than_the_last_move() {
        let mut harness = Harness::walking();
        let anchor = harness.transform.translation + Vec3::new(0.0, 4.0, -15.0);
        harness.world.add_anchors([anchor]);
        let mut prediction = ClientPrediction::default();
        let start = Snapshot::capture(&harness.transform, harness.velocity, &harness.state);
        let hooking = MoveIntent {
            wants_hook: true,
            ..default()
        };
        for _ in 0..5 {
            live_tick(&mut harness, &mut prediction, hooking, Vec3::ZERO);
        }
        assert_eq!(harness.state.mode, MovementMode::HOOK);

        // Released after the last recorded tick, then corrected before the next one.
        harness.state.release_hook();
        prediction.correct(
            &start,
            &mut harness.transform,
            &mut harness.velocity,
            &mut harness.state,
            &harness.cfg,
            &harness.world,
            harness.role,
        );
        assert_eq!(harness.state.mode, MovementMode::HOOK);
        assert!(!harness.state.intent.wants_hook);

        harness.advance(DT);
        assert_eq!(harness.state.mode, MovementMode::Falling);
        assert!(!harness.state.is_hooking());
    }

    #[test]
    fn server_corrects_non_finite_moves_without_simulating() {
        let mut server = Harness::walking();
        server.state.mode = MovementMode::Falling;
        server.state.grounded = None;
        server.velocity = Vec3::new(0.0, -2.0, 0.0);
        let before = server.transform;
        let mut remote = RemoteMoves::default();
        let malformed = [
            (f32::NAN, Vec3::NEG_Z),
            (DT, Vec3::new(f32::NAN, 0.0, 0.0)),
            (f32::INFINITY, Vec3::ZERO),
        ];
        for (id, (delta_time, acceleration)) in (1..).zip(malformed) {
            let server_move = ServerMove {
                id,
                timestamp: 0.0,
                delta_time,
                ticks: 1,
                acceleration,
                control_yaw: 0.0,
                flags: 0,
                client_position: before.translation,
            };
            assert!(remote.push(server_move));
            let server_move = remote.queue.pop_front().unwrap();
            let snapshot = remote.simulate(
                &server_move,
                &mut server.transform,
                &mut server.velocity,
                &mut server.state,
                &server.cfg,
                &server.world,
                server.role,
                &mut server.events,
            );
            let snapshot = snapshot.unwrap();
            assert_eq!(snapshot.transform, before);
            assert_eq!(remote.last_processed, Some(id));
        }
        assert_eq!(server.transform, before);
        assert_eq!(server.velocity, Vec3::new(0.0, -2.0, 0.0));
        assert_eq!(server.state.mode, MovementMode::Falling);
        assert!(server.state.last_ground.is_zero());
        assert_eq!(server.state.acceleration, Vec3::ZERO);
        assert!(server.events.is_empty());
    }

    #[test]
    fn server_acks_a_good_prediction_and_corrects_a_bad_one() {
        let mut client = Harness::walking();
        let mut server = Harness::walking();
        server.role = NetRole::Authority;
        let mut prediction = ClientPrediction::default();
        let mut remote = RemoteMoves::default();

        live_tick(&mut client, &mut prediction, MoveIntent::default(), Vec3::NEG_Z);
        let good = prediction.flush().unwrap().to_server_move();
        assert!(remote.push(good));
        assert!(!remote.push(good));
        let server_move = remote.queue.pop_front().unwrap();
        let snapshot = remote.simulate(
            &server_move,
            &mut server.transform,
            &mut server.velocity,
            &mut server.state,
            &server.cfg,
            &server.world,
            server.role,
            &mut server.events,
        );
        assert!(snapshot.is_none());
        assert_eq!(server.transform.translation, client.transform.translation);

        let mut bad = good;
        bad.id = 2;
        bad.client_position += Vec3::X;
        let snapshot = remote.simulate(
            &bad,
            &mut server.transform,
            &mut server.velocity,
            &mut server.state,
            &server.cfg,
            &server.world,
            server.role,
            &mut server.events,
        );
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.transform, server.transform);
        assert_eq!(remote.last_processed, Some(2));
    }

    #[test]
    fn server_clamps_oversized_moves() {
        let mut server = Harness::walking();
        let mut remote = RemoteMoves::default();
        let server_move = ServerMove {
            id: 1,
            timestamp: 0.0,
            delta_time: 10.0,
            ticks: 1,
            acceleration: Vec3::NEG_Z * 50.0,
            control_yaw: 0.0,
            flags: 0,
            client_position: Vec3::ZERO,
        };
        remote.simulate(
            &server_move,
            &mut server.transform,
            &mut server.velocity,
            &mut server.state,
            &server.cfg,
            &server.world,
            server.role,
            &mut server.events,
        );
        assert!(server.velocity.length() <= server.cfg.speed + 1.0e-4);
        assert_eq!(server.state.acceleration, Vec3::NEG_Z);
    }

    fn intent_strategy() -> impl Strategy<Value = MoveIntent> {
        (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(wants_sprint, wants_dive, wants_crouch, custom_jump_pressed)| MoveIntent {
                wants_sprint,
                wants_dive,
                wants_hook: false,
                wants_crouch,
                custom_jump_pressed,
            },
        )
    }

    proptest! {
        /// Replaying merged moves ends exactly where the live simulation ended.
        #[test]
        fn combined_moves_replay_exactly(
            segments in prop::collection::vec(
                (intent_strategy(), 0.0f32..core::f32::consts::TAU, 1usize..8),
                1..6,
            ),
        ) {
            let mut harness = Harness::walking();
            let mut prediction = ClientPrediction::default();
            let start = Snapshot::capture(&harness.transform, harness.velocity, &harness.state);

            let mut live_ticks = 0;
            for (intent, angle, ticks) in segments {
                let acceleration = Vec3::new(angle.sin(), 0.0, angle.cos());
                for _ in 0..ticks {
                    live_tick(&mut harness, &mut prediction, intent, acceleration);
                    live_ticks += 1;
                }
            }
            let live_position = harness.transform.translation;
            let live_velocity = harness.velocity;
            let live_mode = harness.state.mode;

            let replayed_ticks: usize = prediction.unacknowledged().map(|m| usize::from(m.ticks)).sum();
            prop_assert_eq!(replayed_ticks, live_ticks);
            prop_assert!(prediction.unacknowledged().count() <= live_ticks);

            start.restore(&mut harness.transform, &mut harness.velocity, &mut harness.state);
            replay(&mut harness, &mut prediction);
            prop_assert_eq!(harness.transform.translation, live_position);
            prop_assert_eq!(harness.velocity, live_velocity);
            prop_assert_eq!(harness.state.mode, live_mode);
        }
    }
}
