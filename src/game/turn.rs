//! Turn and match state machine
//!
//! `NotStarted -> InProgress -> Finished`. Only the authority mutates this;
//! observers hold a replica fed from snapshots. At most one turn change
//! happens per tick, guarded by `last_turn_change_tick`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::roster::TeamRoster;
use super::{Role, Slot};
use crate::config::MIN_TURN_DURATION_SECS;
use crate::util::time::{secs_to_ticks, ticks_to_secs};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    Finished,
}

/// How a finished match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "slot", rename_all = "snake_case")]
pub enum Outcome {
    Winner(Slot),
    Draw,
}

impl Outcome {
    /// Decide the result from each team's living unit count, `None` while both remain
    pub fn from_alive_counts(first: usize, second: usize) -> Option<Outcome> {
        match (first, second) {
            (0, 0) => Some(Outcome::Draw),
            (0, _) => Some(Outcome::Winner(Slot::Second)),
            (_, 0) => Some(Outcome::Winner(Slot::First)),
            _ => None,
        }
    }

    /// Numeric form used by clients: slot index, or -1 for a draw
    pub fn winner_slot(self) -> i8 {
        match self {
            Outcome::Winner(slot) => slot.index() as i8,
            Outcome::Draw => -1,
        }
    }
}

/// Why the turn moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnChangeCause {
    Timer,
    Settled,
    RoundStart,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("only the authority may change match state")]
    NotAuthority,
}

/// Replicated view of the turn state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub status: MatchStatus,
    pub active_slot: Slot,
    pub turn_deadline: Option<u64>,
    pub time_left_secs: f32,
    pub match_started: bool,
    pub match_finished: bool,
    pub outcome: Option<Outcome>,
    pub round: u32,
}

#[derive(Debug, Clone)]
pub struct TurnMatchState {
    role: Role,
    turn_duration_ticks: u64,
    active_slot: Slot,
    turn_deadline: Option<u64>,
    match_started: bool,
    match_finished: bool,
    outcome: Option<Outcome>,
    last_turn_change_tick: Option<u64>,
}

impl TurnMatchState {
    pub fn new(role: Role, turn_duration_secs: f32) -> Self {
        Self {
            role,
            turn_duration_ticks: secs_to_ticks(turn_duration_secs.max(MIN_TURN_DURATION_SECS)),
            active_slot: Slot::First,
            turn_deadline: None,
            match_started: false,
            match_finished: false,
            outcome: None,
            last_turn_change_tick: None,
        }
    }

    pub fn status(&self) -> MatchStatus {
        if self.match_finished {
            MatchStatus::Finished
        } else if self.match_started {
            MatchStatus::InProgress
        } else {
            MatchStatus::NotStarted
        }
    }

    pub fn active_slot(&self) -> Slot {
        self.active_slot
    }

    #[cfg(test)]
    pub fn turn_deadline(&self) -> Option<u64> {
        self.turn_deadline
    }

    pub fn is_started(&self) -> bool {
        self.match_started
    }

    pub fn is_finished(&self) -> bool {
        self.match_finished
    }

    /// Only meaningful once finished
    pub fn outcome(&self) -> Option<Outcome> {
        if self.match_finished {
            self.outcome
        } else {
            None
        }
    }

    pub fn is_my_turn(&self, slot: Slot) -> bool {
        slot == self.active_slot
    }

    fn can_mutate(&self) -> bool {
        self.role == Role::Authority
    }

    fn in_progress(&self) -> bool {
        self.match_started && !self.match_finished
    }

    /// Start (or restart) with a uniformly random starting slot
    pub fn start_match_random<R: Rng>(&mut self, rng: &mut R, tick: u64) -> Result<Slot, MatchError> {
        let slot = if rng.gen_bool(0.5) {
            Slot::First
        } else {
            Slot::Second
        };
        self.start_match(slot, tick)?;
        Ok(slot)
    }

    /// Start (or restart) with a given starting slot
    pub fn start_match(&mut self, slot: Slot, tick: u64) -> Result<(), MatchError> {
        if !self.can_mutate() {
            return Err(MatchError::NotAuthority);
        }
        self.active_slot = slot;
        self.turn_deadline = Some(tick + self.turn_duration_ticks);
        self.match_started = true;
        self.match_finished = false;
        self.outcome = None;
        self.last_turn_change_tick = Some(tick);
        info!(active_slot = %slot, "Match started");
        Ok(())
    }

    fn change_turn(&mut self, slot: Slot, tick: u64) -> bool {
        if !self.can_mutate() || !self.in_progress() {
            return false;
        }
        if self.last_turn_change_tick == Some(tick) {
            return false;
        }
        self.active_slot = slot;
        self.turn_deadline = Some(tick + self.turn_duration_ticks);
        self.last_turn_change_tick = Some(tick);
        true
    }

    /// Flip to the other slot. False when suppressed (same tick, not in progress).
    pub fn force_next_turn(&mut self, tick: u64) -> bool {
        self.change_turn(self.active_slot.other(), tick)
    }

    /// Hand the turn to a specific slot (round start)
    pub fn set_turn_slot(&mut self, slot: Slot, tick: u64) -> bool {
        let changed = self.change_turn(slot, tick);
        if changed {
            info!(active_slot = %slot, "Turn forced");
        }
        changed
    }

    /// Stop the turn timer while a launch plays out
    pub fn suspend_timer(&mut self) {
        if self.can_mutate() {
            self.turn_deadline = None;
        }
    }

    pub fn time_left_secs(&self, tick: u64) -> f32 {
        match self.turn_deadline {
            Some(deadline) if self.in_progress() => ticks_to_secs(deadline.saturating_sub(tick)),
            _ => 0.0,
        }
    }

    /// Advance the turn if the timer ran out this tick
    pub fn check_turn_timer(&mut self, tick: u64) -> bool {
        if !self.can_mutate() || !self.in_progress() {
            return false;
        }
        match self.turn_deadline {
            Some(deadline) if tick >= deadline => self.force_next_turn(tick),
            _ => false,
        }
    }

    /// Finish the match once a team has no living units
    pub fn check_for_game_end(&mut self, roster: &TeamRoster) -> Option<Outcome> {
        if !self.can_mutate() || !self.in_progress() {
            return None;
        }
        let outcome = Outcome::from_alive_counts(
            roster.alive_count(Slot::First),
            roster.alive_count(Slot::Second),
        )?;
        self.match_finished = true;
        self.outcome = Some(outcome);
        self.turn_deadline = None;
        info!(winner_slot = outcome.winner_slot(), "Match finished");
        Some(outcome)
    }

    pub fn snapshot(&self, tick: u64, round: u32) -> TurnSnapshot {
        TurnSnapshot {
            status: self.status(),
            active_slot: self.active_slot,
            turn_deadline: self.turn_deadline,
            time_left_secs: self.time_left_secs(tick),
            match_started: self.match_started,
            match_finished: self.match_finished,
            outcome: self.outcome(),
            round,
        }
    }

    /// Observer side: take the authority's values as-is
    pub fn apply_snapshot(&mut self, snapshot: &TurnSnapshot) {
        if self.can_mutate() {
            warn!("Authority ignored a replicated turn snapshot");
            return;
        }
        self.active_slot = snapshot.active_slot;
        self.turn_deadline = snapshot.turn_deadline;
        self.match_started = snapshot.match_started;
        self.match_finished = snapshot.match_finished;
        self.outcome = snapshot.outcome;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tokio_test::{assert_err, assert_ok};

    fn started(slot: Slot) -> TurnMatchState {
        let mut t = TurnMatchState::new(Role::Authority, 10.0);
        assert_ok!(t.start_match(slot, 0));
        t
    }

    #[test]
    fn test_outcome_table() {
        assert_eq!(Outcome::from_alive_counts(2, 0), Some(Outcome::Winner(Slot::First)));
        assert_eq!(Outcome::from_alive_counts(0, 1), Some(Outcome::Winner(Slot::Second)));
        assert_eq!(Outcome::from_alive_counts(0, 0), Some(Outcome::Draw));
        assert_eq!(Outcome::from_alive_counts(1, 3), None);
        assert_eq!(Outcome::Draw.winner_slot(), -1);
    }

    #[test]
    fn test_start_sets_deadline_and_status() {
        let mut t = TurnMatchState::new(Role::Authority, 10.0);
        assert_eq!(t.status(), MatchStatus::NotStarted);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let slot = assert_ok!(t.start_match_random(&mut rng, 5));
        assert_eq!(t.active_slot(), slot);
        assert_eq!(t.turn_deadline(), Some(305));
        assert_eq!(t.status(), MatchStatus::InProgress);
        assert_eq!(t.outcome(), None);
    }

    #[test]
    fn test_random_start_uses_both_slots() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut seen = [false; 2];
        for _ in 0..64 {
            let mut t = TurnMatchState::new(Role::Authority, 10.0);
            let slot = t.start_match_random(&mut rng, 0).unwrap();
            seen[slot.index()] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn test_turn_duration_floor() {
        let mut t = TurnMatchState::new(Role::Authority, 0.01);
        t.start_match(Slot::First, 0).unwrap();
        assert_eq!(t.turn_deadline(), Some(15));
    }

    #[test]
    fn test_at_most_one_change_per_tick() {
        let mut t = started(Slot::First);
        assert!(t.force_next_turn(3));
        assert!(!t.force_next_turn(3));
        assert!(!t.set_turn_slot(Slot::First, 3));
        assert_eq!(t.active_slot(), Slot::Second);
        assert!(t.force_next_turn(4));
        assert_eq!(t.active_slot(), Slot::First);
    }

    #[test]
    fn test_timer_expiry_flips_exactly_once() {
        let mut t = started(Slot::First);
        let mut flips = 0;
        for tick in 1..=300 {
            if t.check_turn_timer(tick) {
                flips += 1;
            }
        }
        assert_eq!(flips, 1);
        assert_eq!(t.active_slot(), Slot::Second);
        for tick in 301..600 {
            assert!(!t.check_turn_timer(tick));
        }
        assert!(t.check_turn_timer(600));
    }

    #[test]
    fn test_suspended_timer_never_expires() {
        let mut t = started(Slot::First);
        t.suspend_timer();
        assert_eq!(t.time_left_secs(10), 0.0);
        for tick in 1..1000 {
            assert!(!t.check_turn_timer(tick));
        }
        assert!(t.force_next_turn(1000));
        assert_eq!(t.turn_deadline(), Some(1300));
    }

    #[test]
    fn test_time_left() {
        let t = started(Slot::First);
        assert!((t.time_left_secs(150) - 5.0).abs() < 1e-5);
        assert_eq!(t.time_left_secs(400), 0.0);
    }

    #[test]
    fn test_game_end_is_terminal() {
        let config = MatchConfig {
            team_size: 1,
            ..MatchConfig::default()
        };
        let mut roster = TeamRoster::from_config(&config).unwrap();
        let mut t = started(Slot::First);

        assert_eq!(t.check_for_game_end(&roster), None);
        roster.unit_mut(crate::game::UnitId(1)).unwrap().take_damage(100);
        assert_eq!(
            t.check_for_game_end(&roster),
            Some(Outcome::Winner(Slot::First))
        );
        assert_eq!(t.status(), MatchStatus::Finished);
        assert_eq!(t.outcome(), Some(Outcome::Winner(Slot::First)));
        assert!(!t.force_next_turn(50));
        assert!(!t.check_turn_timer(10_000));
        // Already finished, no second evaluation
        assert_eq!(t.check_for_game_end(&roster), None);
    }

    #[test]
    fn test_observer_cannot_mutate() {
        let mut t = TurnMatchState::new(Role::Observer, 10.0);
        assert_err!(t.start_match(Slot::First, 0));
        assert!(!t.force_next_turn(1));
        assert_eq!(t.status(), MatchStatus::NotStarted);
    }

    #[test]
    fn test_observer_mirrors_snapshot() {
        let authority = started(Slot::Second);
        let snap = authority.snapshot(30, 1);
        let mut replica = TurnMatchState::new(Role::Observer, 10.0);
        replica.apply_snapshot(&snap);
        assert_eq!(replica.active_slot(), Slot::Second);
        assert!(replica.is_my_turn(Slot::Second));
        assert_eq!(replica.status(), MatchStatus::InProgress);

        let mut other_authority = started(Slot::First);
        other_authority.apply_snapshot(&snap);
        assert_eq!(other_authority.active_slot(), Slot::First);
    }

    #[test]
    fn test_outcome_wire_form() {
        assert_eq!(
            serde_json::to_value(Outcome::Winner(Slot::Second)).unwrap(),
            serde_json::json!({"result": "winner", "slot": 1})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Draw).unwrap(),
            serde_json::json!({"result": "draw"})
        );
    }
}
