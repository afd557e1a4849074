//! Round and turn completion after a launch
//!
//! Launch accepted -> wait for settle -> grace countdown -> advance the turn
//! or start a new round. Nothing new may launch until the cycle is back to
//! idle.

use tracing::{debug, info};

use super::roster::TeamRoster;
use super::turn::TurnMatchState;
use super::{Slot, UnitId};
use crate::util::time::secs_to_ticks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    AwaitingSettle { unit: UnitId },
    Grace { unit: UnitId, remaining: u64 },
    /// Grace is over; waiting for the turn guard to allow the change
    Advancing,
}

/// What the coordinator did this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTransition {
    TurnAdvanced { active_slot: Slot },
    RoundStarted { round: u32, active_slot: Slot },
}

#[derive(Debug, Clone)]
pub struct RoundCoordinator {
    phase: RoundPhase,
    grace_ticks: u64,
}

impl RoundCoordinator {
    pub fn new(post_settle_grace_secs: f32) -> Self {
        Self {
            phase: RoundPhase::Idle,
            grace_ticks: secs_to_ticks(post_settle_grace_secs),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// False from an accepted launch until its turn advance has happened
    pub fn can_current_team_play(&self) -> bool {
        self.phase == RoundPhase::Idle
    }

    pub fn begin(&mut self, unit: UnitId) {
        self.phase = RoundPhase::AwaitingSettle { unit };
    }

    /// Settle signal from the launch controller
    pub fn on_settled(&mut self, unit: UnitId) {
        if let RoundPhase::AwaitingSettle { unit: waiting } = self.phase {
            if waiting == unit {
                self.phase = RoundPhase::Grace {
                    unit,
                    remaining: self.grace_ticks,
                };
            }
        }
    }

    /// Drop any pending cycle (match reset or rematch)
    pub fn reset(&mut self) {
        self.phase = RoundPhase::Idle;
    }

    pub fn on_tick(
        &mut self,
        roster: &mut TeamRoster,
        turn: &mut TurnMatchState,
        tick: u64,
    ) -> Option<RoundTransition> {
        if turn.is_finished() {
            self.phase = RoundPhase::Idle;
            return None;
        }

        match self.phase {
            RoundPhase::Idle => None,
            RoundPhase::AwaitingSettle { unit } => {
                // A unit that died mid-flight never signals; treat it as done
                let done = roster
                    .unit(unit)
                    .map(|u| !u.is_alive() || !u.launched)
                    .unwrap_or(true);
                if done {
                    debug!(unit_id = %unit, "Launch over without settle signal");
                    self.phase = RoundPhase::Grace {
                        unit,
                        remaining: self.grace_ticks,
                    };
                }
                None
            }
            RoundPhase::Grace { unit, remaining } => {
                if remaining > 0 {
                    self.phase = RoundPhase::Grace {
                        unit,
                        remaining: remaining - 1,
                    };
                    return None;
                }
                self.phase = RoundPhase::Advancing;
                self.try_advance(roster, turn, tick)
            }
            RoundPhase::Advancing => self.try_advance(roster, turn, tick),
        }
    }

    fn try_advance(
        &mut self,
        roster: &mut TeamRoster,
        turn: &mut TurnMatchState,
        tick: u64,
    ) -> Option<RoundTransition> {
        let transition = if roster.all_used() {
            // Slot change first so a suppressed attempt leaves the used flags alone
            if !turn.set_turn_slot(Slot::First, tick) {
                debug!(tick, "Round start deferred");
                return None;
            }
            let round = roster.prepare_new_round();
            info!(round, "All units used, new round");
            RoundTransition::RoundStarted {
                round,
                active_slot: Slot::First,
            }
        } else {
            if !turn.force_next_turn(tick) {
                debug!(tick, "Turn advance deferred");
                return None;
            }
            RoundTransition::TurnAdvanced {
                active_slot: turn.active_slot(),
            }
        };

        self.phase = RoundPhase::Idle;
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::game::Role;

    fn setup() -> (TeamRoster, TurnMatchState, RoundCoordinator) {
        let config = MatchConfig {
            team_size: 1,
            ..MatchConfig::default()
        };
        let roster = TeamRoster::from_config(&config).unwrap();
        let mut turn = TurnMatchState::new(Role::Authority, 10.0);
        turn.start_match(Slot::First, 0).unwrap();
        (roster, turn, RoundCoordinator::new(0.5))
    }

    /// Run ticks until something happens, returning (tick, transition)
    fn run_until(
        coord: &mut RoundCoordinator,
        roster: &mut TeamRoster,
        turn: &mut TurnMatchState,
        from: u64,
    ) -> (u64, RoundTransition) {
        for tick in from..from + 1000 {
            if let Some(t) = coord.on_tick(roster, turn, tick) {
                return (tick, t);
            }
        }
        panic!("coordinator never advanced");
    }

    #[test]
    fn test_blocks_play_until_advanced() {
        let (mut roster, mut turn, mut coord) = setup();
        assert!(coord.can_current_team_play());
        roster.unit_mut(UnitId(0)).unwrap().launched = true;
        coord.begin(UnitId(0));
        assert!(!coord.can_current_team_play());

        for tick in 1..50 {
            assert_eq!(coord.on_tick(&mut roster, &mut turn, tick), None);
        }
        assert!(!coord.can_current_team_play());
    }

    #[test]
    fn test_grace_then_turn_flip() {
        let (mut roster, mut turn, mut coord) = setup();
        roster.unit_mut(UnitId(0)).unwrap().mark_used();
        coord.begin(UnitId(0));
        coord.on_settled(UnitId(0));

        let (tick, transition) = run_until(&mut coord, &mut roster, &mut turn, 10);
        assert_eq!(tick, 10 + 15);
        assert_eq!(
            transition,
            RoundTransition::TurnAdvanced {
                active_slot: Slot::Second
            }
        );
        assert!(coord.can_current_team_play());
    }

    #[test]
    fn test_all_used_starts_round_on_first_slot() {
        let (mut roster, mut turn, mut coord) = setup();
        turn.force_next_turn(1);
        for u in roster.units_mut() {
            u.mark_used();
        }
        coord.begin(UnitId(1));
        coord.on_settled(UnitId(1));

        let (_, transition) = run_until(&mut coord, &mut roster, &mut turn, 5);
        assert_eq!(
            transition,
            RoundTransition::RoundStarted {
                round: 1,
                active_slot: Slot::First
            }
        );
        assert_eq!(turn.active_slot(), Slot::First);
        assert!(roster.units().all(|u| u.is_available()));
    }

    #[test]
    fn test_suppressed_advance_retries_next_tick() {
        let (mut roster, mut turn, mut coord) = setup();
        for u in roster.units_mut() {
            u.mark_used();
        }
        coord.begin(UnitId(0));
        coord.on_settled(UnitId(0));
        for tick in 1..16 {
            assert_eq!(coord.on_tick(&mut roster, &mut turn, tick), None);
        }

        // Another change already happened at tick 16
        assert!(turn.force_next_turn(16));
        assert_eq!(coord.on_tick(&mut roster, &mut turn, 16), None);
        assert_eq!(coord.phase(), RoundPhase::Advancing);
        assert!(roster.units().all(|u| u.used_this_round));

        assert!(matches!(
            coord.on_tick(&mut roster, &mut turn, 17),
            Some(RoundTransition::RoundStarted { round: 1, .. })
        ));
    }

    #[test]
    fn test_death_in_flight_still_completes() {
        let (mut roster, mut turn, mut coord) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        unit.mark_used();
        unit.launched = true;
        coord.begin(UnitId(0));
        assert_eq!(coord.on_tick(&mut roster, &mut turn, 1), None);

        roster.unit_mut(UnitId(0)).unwrap().take_damage(100);
        let (_, transition) = run_until(&mut coord, &mut roster, &mut turn, 2);
        assert!(matches!(transition, RoundTransition::TurnAdvanced { .. }));
    }

    #[test]
    fn test_finished_match_goes_idle() {
        let (mut roster, mut turn, mut coord) = setup();
        coord.begin(UnitId(0));
        roster.unit_mut(UnitId(1)).unwrap().take_damage(100);
        assert!(turn.check_for_game_end(&roster).is_some());
        assert_eq!(coord.on_tick(&mut roster, &mut turn, 3), None);
        assert_eq!(coord.phase(), RoundPhase::Idle);
    }

    #[test]
    fn test_settle_for_other_unit_ignored() {
        let mut coord = RoundCoordinator::new(0.5);
        coord.begin(UnitId(3));
        coord.on_settled(UnitId(4));
        assert_eq!(coord.phase(), RoundPhase::AwaitingSettle { unit: UnitId(3) });
    }
}
