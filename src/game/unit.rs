//! Per-unit state and its transitions

use super::combat::CombatResolver;
use super::physics::Pose;
use super::{Slot, UnitId};

/// Static stats for a unit (loaded once at match setup)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitStats {
    pub max_hp: i32,
    pub attack_power: f32,
    pub radius: f32,
}

/// Authoritative unit record. Never removed mid-match; death deactivates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: UnitId,
    pub slot: Slot,
    pub stats: UnitStats,
    pub current_hp: i32,
    /// Acted already in the current round
    pub used_this_round: bool,
    /// Present in the simulation (false once dead)
    pub active: bool,
    /// In flight between launch and settle
    pub launched: bool,
    pub initial_pose: Pose,
    /// Last heading requested by the owner, degrees
    pub target_yaw: Option<f32>,
}

impl Unit {
    pub fn new(id: UnitId, slot: Slot, stats: UnitStats, initial_pose: Pose) -> Self {
        Self {
            id,
            slot,
            stats,
            current_hp: stats.max_hp,
            used_this_round: false,
            active: true,
            launched: false,
            initial_pose,
            target_yaw: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.current_hp > 0
    }

    /// Alive, active and not yet used this round
    pub fn is_available(&self) -> bool {
        self.is_alive() && !self.used_this_round && self.active
    }

    pub fn mark_used(&mut self) {
        self.used_this_round = true;
    }

    pub fn reset_for_new_round(&mut self) {
        self.used_this_round = false;
    }

    /// Lower HP, never below zero. Returns true if this hit killed the unit.
    pub fn take_damage(&mut self, damage: i32) -> bool {
        let was_alive = self.is_alive();
        let (new_hp, dead) = CombatResolver::apply_damage(self.current_hp, damage.max(0));
        self.current_hp = new_hp;
        if dead {
            self.die();
        }
        was_alive && dead
    }

    /// Deactivate in place, keeping the record for replication
    pub fn die(&mut self) {
        self.current_hp = self.current_hp.max(0);
        self.launched = false;
        self.active = false;
    }

    /// Full HP, unused, grounded and active again
    pub fn restore(&mut self) {
        self.current_hp = self.stats.max_hp;
        self.used_this_round = false;
        self.launched = false;
        self.active = true;
        self.target_yaw = None;
    }
}
