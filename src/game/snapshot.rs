//! Snapshot building for replication

use tracing::debug;

use crate::ws::protocol::{GameEvent, ServerMsg, UnitSnapshot};

use super::physics::PhysicsBackend;
use super::roster::TeamRoster;
use super::turn::TurnSnapshot;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Every unit as observers should see it, dead ones included
    pub fn unit_snapshots(roster: &TeamRoster, physics: &dyn PhysicsBackend) -> Vec<UnitSnapshot> {
        roster
            .units()
            .map(|unit| {
                let pose = physics.pose(unit.id).unwrap_or_else(|e| {
                    debug!(unit_id = %unit.id, error = %e, "Snapshot using initial pose");
                    unit.initial_pose
                });
                UnitSnapshot {
                    unit_id: unit.id,
                    slot: unit.slot,
                    hp: unit.current_hp,
                    max_hp: unit.stats.max_hp,
                    alive: unit.is_alive(),
                    available: unit.is_available(),
                    launched: unit.launched,
                    position: pose.position,
                    yaw: pose.yaw,
                }
            })
            .collect()
    }

    /// Build a snapshot message
    pub fn build(
        &self,
        tick: u64,
        turn: TurnSnapshot,
        roster: &TeamRoster,
        physics: &dyn PhysicsBackend,
        events: Vec<GameEvent>,
    ) -> ServerMsg {
        ServerMsg::Snapshot {
            tick,
            turn,
            units: Self::unit_snapshots(roster, physics),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::game::launch::tests::ScriptedPhysics;
    use crate::game::turn::TurnMatchState;
    use crate::game::{Role, UnitId};

    #[test]
    fn test_interval_and_force() {
        let mut builder = SnapshotBuilder::new(2);
        assert!(!builder.should_send());
        assert!(builder.should_send());
        assert!(!builder.should_send());
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn test_dead_units_stay_in_snapshot() {
        let mut roster = TeamRoster::from_config(&MatchConfig {
            team_size: 1,
            ..MatchConfig::default()
        })
        .unwrap();
        let mut physics = ScriptedPhysics::with_units(&roster);
        physics.poses.remove(&UnitId(0));
        roster.unit_mut(UnitId(1)).unwrap().take_damage(100);

        let turn = TurnMatchState::new(Role::Authority, 10.0);
        let msg = SnapshotBuilder::new(2).build(9, turn.snapshot(9, 0), &roster, &physics, vec![]);
        let ServerMsg::Snapshot { tick, units, .. } = msg else {
            panic!("expected snapshot");
        };
        assert_eq!(tick, 9);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].position, roster.unit(UnitId(0)).unwrap().initial_pose.position);
        assert!(!units[1].alive && units[1].hp == 0);
    }
}
