//! Team membership, ownership queries and round/match reset

use std::collections::HashMap;

use tracing::{error, info};

use super::physics::{PhysicsBackend, PhysicsError, Pose, Vec3};
use super::unit::{Unit, UnitStats};
use super::{Slot, UnitId};
use crate::config::MatchConfig;

/// Distance of each team's line from the arena centre
const TEAM_LINE_OFFSET: f32 = 6.0;
/// Spacing between units in a team line
const UNIT_SPACING: f32 = 2.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RosterError {
    #[error("unit {0} appears more than once")]
    DuplicateUnit(UnitId),
    #[error("unit {unit} is listed under slot {listed} but belongs to slot {actual}")]
    SlotMismatch {
        unit: UnitId,
        listed: Slot,
        actual: Slot,
    },
}

/// Outcome of resetting one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReset {
    pub unit_id: UnitId,
    pub result: Result<(), PhysicsError>,
}

/// Per-unit results of a roster reset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetReport {
    pub units: Vec<UnitReset>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.units.iter().all(|u| u.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReset> {
        self.units.iter().filter(|u| u.result.is_err())
    }
}

/// The two teams. Membership is fixed after construction.
#[derive(Debug, Clone)]
pub struct TeamRoster {
    teams: [Vec<Unit>; 2],
    index: HashMap<UnitId, (Slot, usize)>,
    current_round: u32,
}

impl TeamRoster {
    /// Build from explicit team lists, checking every unit sits in exactly one slot
    pub fn new(teams: [Vec<Unit>; 2]) -> Result<Self, RosterError> {
        let mut index = HashMap::new();
        for slot in Slot::ALL {
            for (pos, unit) in teams[slot.index()].iter().enumerate() {
                if unit.slot != slot {
                    return Err(RosterError::SlotMismatch {
                        unit: unit.id,
                        listed: slot,
                        actual: unit.slot,
                    });
                }
                if index.insert(unit.id, (slot, pos)).is_some() {
                    return Err(RosterError::DuplicateUnit(unit.id));
                }
            }
        }

        Ok(Self {
            teams,
            index,
            current_round: 0,
        })
    }

    /// Two facing lines of identical units. Slot 0 gets ids `0..n`, slot 1 `n..2n`.
    pub fn from_config(config: &MatchConfig) -> Result<Self, RosterError> {
        let stats = UnitStats {
            max_hp: config.unit_max_hp,
            attack_power: config.unit_attack_power,
            radius: config.unit_radius,
        };
        let n = config.team_size;
        let line = |slot: Slot| -> Vec<Unit> {
            let (x, yaw) = match slot {
                Slot::First => (-TEAM_LINE_OFFSET, 90.0),
                Slot::Second => (TEAM_LINE_OFFSET, 270.0),
            };
            (0..n)
                .map(|i| {
                    let id = UnitId((slot.index() * n + i) as u32);
                    let z = (i as f32 - (n as f32 - 1.0) / 2.0) * UNIT_SPACING;
                    Unit::new(id, slot, stats, Pose::new(Vec3::new(x, 0.0, z), yaw))
                })
                .collect()
        };

        Self::new([line(Slot::First), line(Slot::Second)])
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        let (slot, pos) = self.index.get(&id)?;
        self.teams[slot.index()].get(*pos)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        let (slot, pos) = self.index.get(&id)?;
        self.teams[slot.index()].get_mut(*pos)
    }

    pub fn team(&self, slot: Slot) -> &[Unit] {
        &self.teams[slot.index()]
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.teams.iter().flatten()
    }

    pub fn units_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.teams.iter_mut().flatten()
    }

    /// Which slot owns this unit, if it exists
    pub fn slot_of(&self, id: UnitId) -> Option<Slot> {
        self.index.get(&id).map(|(slot, _)| *slot)
    }

    pub fn is_owned_by_slot(&self, id: UnitId, slot: Slot) -> bool {
        self.slot_of(id) == Some(slot)
    }

    /// Units of a slot still alive and in play
    pub fn alive_count(&self, slot: Slot) -> usize {
        self.team(slot)
            .iter()
            .filter(|u| u.is_alive() && u.active)
            .count()
    }

    /// True once no unit on either team can still act this round
    pub fn all_used(&self) -> bool {
        !self.units().any(Unit::is_available)
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Clear every used flag and start the next round
    pub fn prepare_new_round(&mut self) -> u32 {
        self.current_round += 1;
        for unit in self.units_mut() {
            unit.reset_for_new_round();
        }
        info!(round = self.current_round, "Starting round");
        self.current_round
    }

    /// Back to round zero, used before a rematch
    pub fn reset_round_counter(&mut self) {
        self.current_round = 0;
    }

    /// Restore every unit to its setup state: full HP, unused, grounded,
    /// active, at its initial pose with no velocity. A physics fault on one
    /// unit is reported and does not stop the others.
    pub fn reset_to_initial_state(&mut self, physics: &mut dyn PhysicsBackend) -> ResetReport {
        let mut report = ResetReport::default();

        for unit in self.units_mut() {
            unit.restore();
            let result = physics
                .set_active(unit.id, true)
                .and_then(|_| physics.set_pose(unit.id, unit.initial_pose))
                .and_then(|_| physics.zero_velocity(unit.id));

            if let Err(e) = &result {
                error!(unit_id = %unit.id, error = %e, "Unit reset failed");
            }
            report.units.push(UnitReset {
                unit_id: unit.id,
                result,
            });
        }

        report
    }
}
