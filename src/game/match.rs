//! Match state and authoritative tick loop

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::util::time::{
    secs_to_ticks, ticks_to_secs, unix_millis, SIMULATION_TPS, SNAPSHOT_TPS, TICK_DURATION_MICROS,
};
use crate::ws::protocol::{ClientMsg, GameEvent, MatchStats, ParticipantInfo, ServerMsg};

use super::combat::CombatResolver;
use super::gateway::{ActionGateway, RejectReason};
use super::launch::{LaunchController, LaunchTuning};
use super::physics::{ArenaPhysics, PhysicsBackend, Vec3};
use super::round::{RoundCoordinator, RoundTransition};
use super::roster::{ResetReport, RosterError, TeamRoster};
use super::snapshot::SnapshotBuilder;
use super::turn::{MatchError, MatchStatus, Outcome, TurnChangeCause, TurnMatchState, TurnSnapshot};
use super::{ParticipantInput, SessionContext, Slot, UnitId};

#[derive(Debug, Clone, Copy, Default)]
struct MatchCounters {
    launches: u32,
    hits: u32,
}

/// What one simulation tick produced
#[derive(Debug, Default)]
pub struct TickReport {
    pub events: Vec<GameEvent>,
    /// Observers should see this tick without waiting for the interval
    pub important: bool,
    /// Set on the tick the match finished
    pub finished: Option<Outcome>,
}

/// Authoritative match simulation (owned by the match task)
pub struct MatchState {
    pub ctx: SessionContext,
    pub seed: u64,
    pub tick: u64,
    pub roster: TeamRoster,
    pub turn: TurnMatchState,
    pub launcher: LaunchController,
    pub rounds: RoundCoordinator,
    physics: Box<dyn PhysicsBackend>,
    rng: ChaCha8Rng,
    counters: MatchCounters,
    started_at_tick: Option<u64>,
}

impl MatchState {
    /// Match on the built-in arena engine with the configured teams
    pub fn new(ctx: SessionContext, seed: u64, config: &MatchConfig) -> Result<Self, RosterError> {
        let roster = TeamRoster::from_config(config)?;
        let mut arena = ArenaPhysics::default();
        for unit in roster.units() {
            arena.spawn(unit.id, unit.initial_pose, unit.stats.radius);
        }
        Ok(Self::with_physics(ctx, seed, config, roster, Box::new(arena)))
    }

    pub fn with_physics(
        ctx: SessionContext,
        seed: u64,
        config: &MatchConfig,
        roster: TeamRoster,
        physics: Box<dyn PhysicsBackend>,
    ) -> Self {
        Self {
            ctx,
            seed,
            tick: 0,
            roster,
            turn: TurnMatchState::new(ctx.role, config.turn_duration_secs),
            launcher: LaunchController::new(LaunchTuning::from_config(config)),
            rounds: RoundCoordinator::new(config.post_settle_grace),
            physics,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counters: MatchCounters::default(),
            started_at_tick: None,
        }
    }

    pub fn physics(&self) -> &dyn PhysicsBackend {
        self.physics.as_ref()
    }

    fn gateway(&mut self) -> ActionGateway<'_> {
        ActionGateway {
            ctx: &self.ctx,
            roster: &mut self.roster,
            turn: &mut self.turn,
            launcher: &mut self.launcher,
            rounds: &mut self.rounds,
            physics: self.physics.as_mut(),
        }
    }

    /// Begin round one with a random starting slot
    pub fn start(&mut self) -> Result<Slot, MatchError> {
        let slot = self.turn.start_match_random(&mut self.rng, self.tick)?;
        self.roster.prepare_new_round();
        self.started_at_tick = Some(self.tick);
        Ok(slot)
    }

    /// Put every unit back and start over
    pub fn rematch(&mut self) -> Result<(Slot, ResetReport), MatchError> {
        if !self.ctx.is_authority() {
            return Err(MatchError::NotAuthority);
        }
        self.launcher
            .cancel_all(&mut self.roster, self.physics.as_mut());
        self.rounds.reset();
        let report = self.roster.reset_to_initial_state(self.physics.as_mut());
        self.roster.reset_round_counter();
        self.counters = MatchCounters::default();
        let slot = self.start()?;
        Ok((slot, report))
    }

    /// Launch request from a participant holding `requester`
    pub fn launch(
        &mut self,
        requester: Option<Slot>,
        unit_id: UnitId,
        direction: Vec3,
        power: f32,
    ) -> Result<GameEvent, RejectReason> {
        let receipt = self
            .gateway()
            .handle_launch(requester, unit_id, direction, power)?;
        self.counters.launches += 1;
        Ok(GameEvent::Launched {
            unit_id,
            slot: self.turn.active_slot(),
            direction: receipt.direction,
            power: receipt.power,
            impulse: receipt.impulse,
        })
    }

    pub fn set_yaw(&mut self, unit_id: UnitId, yaw: f32) -> Result<(), RejectReason> {
        self.gateway().handle_yaw(unit_id, yaw)
    }

    /// One authoritative step: physics, combat, settle checks, match end,
    /// round completion, then the turn timer.
    pub fn run_tick(&mut self) -> TickReport {
        self.tick += 1;
        let mut report = TickReport::default();
        if !self.turn.is_started() || self.turn.is_finished() {
            return report;
        }
        let tick = self.tick;

        for contact in self.physics.step() {
            for hit in CombatResolver::resolve_contact(&mut self.roster, contact.a, contact.b) {
                self.counters.hits += 1;
                report.events.push(GameEvent::Hit {
                    attacker_id: hit.attacker_id,
                    defender_id: hit.defender_id,
                    damage: hit.damage,
                    remaining_hp: hit.remaining_hp,
                    point: contact.point,
                });
                if hit.defender_killed {
                    self.on_unit_defeated(hit.defender_id, &mut report);
                }
            }
        }

        for unit_id in self
            .launcher
            .advance(&mut self.roster, self.physics.as_mut())
        {
            self.rounds.on_settled(unit_id);
            report.events.push(GameEvent::Settled { unit_id });
        }

        // A match-ending collision wins over any turn change this tick
        if let Some(outcome) = self.turn.check_for_game_end(&self.roster) {
            self.rounds.reset();
            report.events.push(GameEvent::MatchFinished { outcome });
            report.important = true;
            report.finished = Some(outcome);
            return report;
        }

        match self.rounds.on_tick(&mut self.roster, &mut self.turn, tick) {
            Some(RoundTransition::TurnAdvanced { active_slot }) => {
                report.events.push(GameEvent::TurnChanged {
                    active_slot,
                    cause: TurnChangeCause::Settled,
                });
                report.important = true;
            }
            Some(RoundTransition::RoundStarted { round, active_slot }) => {
                report.events.push(GameEvent::RoundStarted { round });
                report.events.push(GameEvent::TurnChanged {
                    active_slot,
                    cause: TurnChangeCause::RoundStart,
                });
                report.important = true;
            }
            None => {}
        }

        if self.turn.check_turn_timer(tick) {
            let active_slot = self.turn.active_slot();
            info!(match_id = %self.ctx.match_id, active_slot = %active_slot, "Turn timed out");
            report.events.push(GameEvent::TurnChanged {
                active_slot,
                cause: TurnChangeCause::Timer,
            });
            report.important = true;
        }

        report
    }

    fn on_unit_defeated(&mut self, unit_id: UnitId, report: &mut TickReport) {
        let Some(unit) = self.roster.unit_mut(unit_id) else {
            return;
        };
        let slot = unit.slot;
        self.launcher.cancel(unit, self.physics.as_mut());
        if let Err(e) = self.physics.set_active(unit_id, false) {
            error!(match_id = %self.ctx.match_id, unit_id = %unit_id, error = %e, "Could not deactivate body");
        }
        info!(match_id = %self.ctx.match_id, unit_id = %unit_id, slot = %slot, "Unit defeated");
        report.events.push(GameEvent::UnitDefeated { unit_id, slot });
        report.important = true;
    }

    pub fn turn_snapshot(&self) -> TurnSnapshot {
        self.turn.snapshot(self.tick, self.roster.current_round())
    }

    pub fn stats(&self) -> MatchStats {
        let elapsed = self
            .started_at_tick
            .map(|start| self.tick.saturating_sub(start))
            .unwrap_or(0);
        MatchStats {
            duration_secs: ticks_to_secs(elapsed) as u32,
            rounds: self.roster.current_round(),
            launches: self.counters.launches,
            hits: self.counters.hits,
            units_remaining: [
                self.roster.alive_count(Slot::First),
                self.roster.alive_count(Slot::Second),
            ],
        }
    }
}

/// Latest published view of a match, readable outside the match task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub status: MatchStatus,
    pub tick: u64,
    pub round: u32,
    pub active_slot: Slot,
    pub time_left_secs: f32,
    pub outcome: Option<Outcome>,
    pub participants: usize,
}

/// Handle to a running match
#[derive(Clone, Debug)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<ParticipantInput>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    participant_count: Arc<AtomicUsize>,
    summary: Arc<RwLock<MatchSummary>>,
}

impl MatchHandle {
    pub fn participant_count(&self) -> usize {
        self.participant_count.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> MatchSummary {
        self.summary.read().clone()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_participants(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().participant_count())
            .sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match task
pub struct GameMatch {
    state: MatchState,
    input_rx: mpsc::Receiver<ParticipantInput>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    participants: HashMap<Uuid, Slot>,
    rematch_votes: HashSet<Uuid>,
    pending_events: Vec<GameEvent>,
    finished_at_tick: Option<u64>,
    rematch_window_ticks: u64,
    participant_count: Arc<AtomicUsize>,
    summary: Arc<RwLock<MatchSummary>>,
}

impl GameMatch {
    /// Create a new match
    pub fn new(
        id: Uuid,
        seed: u64,
        config: &MatchConfig,
    ) -> Result<(Self, MatchHandle), RosterError> {
        let state = MatchState::new(SessionContext::authority(id), seed, config)?;
        Ok(Self::from_state(state, config))
    }

    /// Wrap an already built simulation in a match task
    pub fn from_state(state: MatchState, config: &MatchConfig) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(64);
        let participant_count = Arc::new(AtomicUsize::new(0));
        let summary = Arc::new(RwLock::new(MatchSummary {
            match_id: state.ctx.match_id,
            status: state.turn.status(),
            tick: state.tick,
            round: state.roster.current_round(),
            active_slot: state.turn.active_slot(),
            time_left_secs: 0.0,
            outcome: None,
            participants: 0,
        }));

        let handle = MatchHandle {
            id: state.ctx.match_id,
            input_tx,
            snapshot_tx: snapshot_tx.clone(),
            participant_count: participant_count.clone(),
            summary: summary.clone(),
        };

        let snapshot_interval = SIMULATION_TPS / SNAPSHOT_TPS;
        let game_match = Self {
            state,
            input_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            participants: HashMap::new(),
            rematch_votes: HashSet::new(),
            pending_events: Vec::new(),
            finished_at_tick: None,
            rematch_window_ticks: secs_to_ticks(config.rematch_window_secs),
            participant_count,
            summary,
        };

        (game_match, handle)
    }

    fn match_id(&self) -> Uuid {
        self.state.ctx.match_id
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(match_id = %self.match_id(), seed = self.state.seed, "Match task running");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            if !self.step() {
                break;
            }
        }

        info!(match_id = %self.match_id(), tick = self.state.tick, "Match task stopped");
    }

    /// Drain inputs, simulate one tick and publish. False once the task should stop.
    pub fn step(&mut self) -> bool {
        self.process_inputs();

        let report = self.state.run_tick();
        self.pending_events.extend(report.events);
        if report.important {
            self.snapshot_builder.force_next();
        }

        if self.snapshot_builder.should_send() {
            self.broadcast_snapshot();
        }

        if let Some(outcome) = report.finished {
            self.on_finished(outcome);
        }

        self.should_continue()
    }

    fn should_continue(&self) -> bool {
        if self.state.turn.is_started() && self.participants.is_empty() {
            info!(match_id = %self.match_id(), "All participants left, ending match");
            return false;
        }
        if let Some(finished) = self.finished_at_tick {
            if self.state.tick.saturating_sub(finished) >= self.rematch_window_ticks {
                info!(match_id = %self.match_id(), "Rematch window closed");
                return false;
            }
        }
        true
    }

    fn send(&self, msg: ServerMsg) {
        // No receivers is fine, nobody is connected yet
        let _ = self.snapshot_tx.send(msg);
    }

    fn broadcast_snapshot(&mut self) {
        let events = std::mem::take(&mut self.pending_events);
        let snapshot = self.snapshot_builder.build(
            self.state.tick,
            self.state.turn_snapshot(),
            &self.state.roster,
            self.state.physics(),
            events,
        );
        self.send(snapshot);
        self.publish_summary();
    }

    fn publish_summary(&self) {
        let turn = self.state.turn_snapshot();
        *self.summary.write() = MatchSummary {
            match_id: self.match_id(),
            status: turn.status,
            tick: self.state.tick,
            round: turn.round,
            active_slot: turn.active_slot,
            time_left_secs: turn.time_left_secs,
            outcome: turn.outcome,
            participants: self.participants.len(),
        };
    }

    /// Process all pending inputs from participants
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            let participant_id = input.participant_id;
            debug!(
                match_id = %self.match_id(),
                participant_id = %participant_id,
                queued_ms = unix_millis().saturating_sub(input.received_at),
                "Input dequeued"
            );
            match input.msg {
                ClientMsg::JoinMatch { .. } => self.handle_join(participant_id),
                ClientMsg::Launch {
                    unit_id,
                    direction,
                    power,
                } => self.handle_launch(participant_id, unit_id, direction, power),
                ClientMsg::SetYaw { unit_id, yaw } => {
                    if let Err(reason) = self.state.set_yaw(unit_id, yaw) {
                        self.send(ServerMsg::ActionRejected {
                            participant_id,
                            unit_id: Some(unit_id),
                            reason,
                        });
                    }
                }
                ClientMsg::RequestRematch => self.handle_rematch(participant_id),
                ClientMsg::Ping { t } => {
                    self.send(ServerMsg::Pong { participant_id, t });
                }
                ClientMsg::LeaveMatch => self.handle_leave(participant_id),
            }
        }
    }

    /// Seat a participant in the lowest free slot
    fn handle_join(&mut self, participant_id: Uuid) {
        let slot = match self.participants.get(&participant_id) {
            Some(slot) => {
                warn!(match_id = %self.match_id(), participant_id = %participant_id, "Participant already in match");
                *slot
            }
            None => {
                let free = Slot::ALL
                    .into_iter()
                    .find(|s| !self.participants.values().any(|taken| taken == s));
                let Some(slot) = free else {
                    self.send(ServerMsg::Error {
                        participant_id: Some(participant_id),
                        code: "match_full".to_string(),
                        message: "Both slots are taken".to_string(),
                    });
                    return;
                };
                self.participants.insert(participant_id, slot);
                self.participant_count
                    .store(self.participants.len(), Ordering::Relaxed);

                self.send(ServerMsg::ParticipantJoined {
                    participant: ParticipantInfo {
                        participant_id,
                        slot,
                    },
                });
                info!(
                    match_id = %self.match_id(),
                    participant_id = %participant_id,
                    slot = %slot,
                    participant_count = self.participants.len(),
                    "Participant joined match"
                );
                slot
            }
        };

        let participants = self
            .participants
            .iter()
            .map(|(id, slot)| ParticipantInfo {
                participant_id: *id,
                slot: *slot,
            })
            .collect();
        self.send(ServerMsg::MatchJoined {
            participant_id,
            match_id: self.match_id(),
            slot,
            seed: self.state.seed,
            tick_rate: SIMULATION_TPS,
            participants,
        });

        if self.participants.len() == Slot::ALL.len() && !self.state.turn.is_started() {
            match self.state.start() {
                Ok(active_slot) => self.announce_start(active_slot),
                Err(e) => error!(match_id = %self.match_id(), error = %e, "Match start refused"),
            }
        }
        self.publish_summary();
    }

    fn announce_start(&mut self, active_slot: Slot) {
        self.send(ServerMsg::MatchStarted {
            tick: self.state.tick,
            active_slot,
        });
        self.pending_events.push(GameEvent::RoundStarted {
            round: self.state.roster.current_round(),
        });
        self.pending_events.push(GameEvent::TurnChanged {
            active_slot,
            cause: TurnChangeCause::RoundStart,
        });
        self.snapshot_builder.force_next();
    }

    fn handle_launch(&mut self, participant_id: Uuid, unit_id: UnitId, direction: Vec3, power: f32) {
        let requester = self.participants.get(&participant_id).copied();
        match self.state.launch(requester, unit_id, direction, power) {
            Ok(event) => {
                self.pending_events.push(event);
                self.snapshot_builder.force_next();
            }
            Err(reason) => self.send(ServerMsg::ActionRejected {
                participant_id,
                unit_id: Some(unit_id),
                reason,
            }),
        }
    }

    fn handle_leave(&mut self, participant_id: Uuid) {
        let Some(slot) = self.participants.remove(&participant_id) else {
            return;
        };
        self.rematch_votes.remove(&participant_id);
        self.participant_count
            .store(self.participants.len(), Ordering::Relaxed);

        self.send(ServerMsg::ParticipantLeft {
            participant_id,
            slot,
            reason: "left".to_string(),
        });
        info!(
            match_id = %self.match_id(),
            participant_id = %participant_id,
            slot = %slot,
            "Participant left match"
        );
        self.publish_summary();
    }

    fn handle_rematch(&mut self, participant_id: Uuid) {
        if !self.state.turn.is_finished() {
            self.send(ServerMsg::Error {
                participant_id: Some(participant_id),
                code: "match_not_finished".to_string(),
                message: "Rematch is only possible after the match ends".to_string(),
            });
            return;
        }
        if !self.participants.contains_key(&participant_id) {
            self.send(ServerMsg::Error {
                participant_id: Some(participant_id),
                code: "no_slot".to_string(),
                message: "Only seated participants can ask for a rematch".to_string(),
            });
            return;
        }

        self.rematch_votes.insert(participant_id);
        self.send(ServerMsg::RematchRequested {
            participant_id,
            votes: self.rematch_votes.len(),
        });

        let everyone_agreed = self.participants.len() == Slot::ALL.len()
            && self
                .participants
                .keys()
                .all(|id| self.rematch_votes.contains(id));
        if !everyone_agreed {
            return;
        }

        match self.state.rematch() {
            Ok((active_slot, report)) => {
                if !report.is_clean() {
                    warn!(
                        match_id = %self.match_id(),
                        failed_units = report.failures().count(),
                        "Rematch reset was incomplete"
                    );
                }
                self.rematch_votes.clear();
                self.finished_at_tick = None;
                info!(match_id = %self.match_id(), "Rematch started");
                self.announce_start(active_slot);
            }
            Err(e) => error!(match_id = %self.match_id(), error = %e, "Rematch refused"),
        }
    }

    fn on_finished(&mut self, outcome: Outcome) {
        self.finished_at_tick = Some(self.state.tick);
        self.rematch_votes.clear();

        let winner_participant_id = match outcome {
            Outcome::Winner(slot) => self
                .participants
                .iter()
                .find(|(_, s)| **s == slot)
                .map(|(id, _)| *id),
            Outcome::Draw => None,
        };

        self.send(ServerMsg::MatchEnd {
            outcome,
            winner_slot: outcome.winner_slot(),
            winner_participant_id,
            stats: self.state.stats(),
        });
        debug!(match_id = %self.match_id(), finished_at = unix_millis(), "Match end sent");
    }
}
