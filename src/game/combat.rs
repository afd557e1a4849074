//! Collision damage resolution

use super::roster::TeamRoster;
use super::UnitId;

/// Hit result from combat resolution
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub attacker_id: UnitId,
    pub defender_id: UnitId,
    pub damage: i32,
    pub remaining_hp: i32,
    pub defender_killed: bool,
}

/// Combat system for collision damage
pub struct CombatResolver;

impl CombatResolver {
    /// Damage an attacker deals on contact, at least one point.
    /// Halves round to even.
    pub fn damage_for(attack_power: f32) -> i32 {
        (attack_power.round_ties_even() as i32).max(1)
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_hp: i32, damage: i32) -> (i32, bool) {
        let new_hp = (current_hp - damage).max(0);
        (new_hp, new_hp <= 0)
    }

    /// Resolve a contact between two units. Both must be alive when the
    /// contact begins; each then damages the other.
    pub fn resolve_contact(roster: &mut TeamRoster, a: UnitId, b: UnitId) -> Vec<HitResult> {
        if a == b {
            return Vec::new();
        }

        let (attack_a, attack_b) = match (roster.unit(a), roster.unit(b)) {
            (Some(ua), Some(ub)) if ua.is_alive() && ub.is_alive() => {
                (ua.stats.attack_power, ub.stats.attack_power)
            }
            _ => return Vec::new(),
        };

        let mut hits = Vec::with_capacity(2);
        for (attacker_id, defender_id, attack) in [(a, b, attack_a), (b, a, attack_b)] {
            let damage = Self::damage_for(attack);
            if let Some(defender) = roster.unit_mut(defender_id) {
                let killed = defender.take_damage(damage);
                hits.push(HitResult {
                    attacker_id,
                    defender_id,
                    damage,
                    remaining_hp: defender.current_hp,
                    defender_killed: killed,
                });
            }
        }
        hits
    }
}
