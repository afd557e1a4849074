//! Launch execution and the tick-driven settle wait
//!
//! A launched unit is tracked until its planar speed has stayed under the
//! settle threshold for enough consecutive ticks. Tracking state lives here,
//! advanced once per tick, so cancelling on death or reset is just dropping
//! the tracker.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::physics::{PhysicsBackend, PhysicsError, Vec3};
use super::roster::TeamRoster;
use super::unit::Unit;
use super::UnitId;
use crate::config::MatchConfig;
use crate::util::time::secs_to_ticks;

/// Launch and settle constants, derived from the match config
#[derive(Debug, Clone, Copy)]
pub struct LaunchTuning {
    pub min_force: f32,
    pub max_force: f32,
    pub base_force: f32,
    pub curve_exponent: f32,
    pub moving_drag: f32,
    pub settle_threshold_sq: f32,
    pub settle_ticks: u32,
    /// Ticks after launch at which an unsettled unit is settled by force
    pub max_flight_ticks: u32,
}

impl LaunchTuning {
    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            min_force: config.min_launch_force,
            max_force: config.max_launch_force,
            base_force: config.base_launch_force,
            curve_exponent: config.curve_exponent,
            moving_drag: config.moving_drag,
            settle_threshold_sq: config.settle_velocity_threshold
                * config.settle_velocity_threshold,
            settle_ticks: secs_to_ticks(config.settle_time_required) as u32,
            max_flight_ticks: secs_to_ticks(config.max_flight_secs) as u32,
        }
    }

    /// Impulse magnitude for a normalized power
    pub fn impulse_magnitude(&self, power: f32) -> f32 {
        let curve = power.clamp(0.0, 1.0).powf(self.curve_exponent);
        let raw = self.min_force + (self.max_force - self.min_force) * curve;
        raw * self.base_force
    }
}

#[derive(Debug, Clone, Copy)]
struct SettleTracker {
    still_ticks: u32,
    flight_ticks: u32,
    rest_drag: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LaunchError {
    #[error("unit {0} is dead")]
    Dead(UnitId),
    #[error("unit {0} is already launched")]
    AlreadyLaunched(UnitId),
    #[error("launch direction has no horizontal component")]
    InvalidDirection,
    #[error(transparent)]
    Physics(#[from] PhysicsError),
}

/// What was actually applied for an accepted launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchReceipt {
    pub unit_id: UnitId,
    pub direction: Vec3,
    pub power: f32,
    pub impulse: f32,
}

/// Executes launches and tracks in-flight units until they settle
pub struct LaunchController {
    tuning: LaunchTuning,
    in_flight: BTreeMap<UnitId, SettleTracker>,
}

impl LaunchController {
    pub fn new(tuning: LaunchTuning) -> Self {
        Self {
            tuning,
            in_flight: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn tuning(&self) -> &LaunchTuning {
        &self.tuning
    }

    pub fn is_in_flight(&self, id: UnitId) -> bool {
        self.in_flight.contains_key(&id)
    }

    #[cfg(test)]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Apply the launch impulse and start the settle wait
    pub fn launch(
        &mut self,
        unit: &mut Unit,
        direction: Vec3,
        power: f32,
        physics: &mut dyn PhysicsBackend,
    ) -> Result<LaunchReceipt, LaunchError> {
        if !unit.is_alive() {
            return Err(LaunchError::Dead(unit.id));
        }
        if unit.launched || self.is_in_flight(unit.id) {
            return Err(LaunchError::AlreadyLaunched(unit.id));
        }

        // Launches are planar
        let direction = direction
            .planar()
            .normalized()
            .ok_or(LaunchError::InvalidDirection)?;
        let power = power.clamp(0.0, 1.0);
        let impulse = self.tuning.impulse_magnitude(power);

        let rest_drag = physics.drag(unit.id)?;
        physics.zero_velocity(unit.id)?;
        physics.apply_impulse(unit.id, direction.scale(impulse))?;
        physics.set_drag(unit.id, self.tuning.moving_drag)?;

        unit.launched = true;
        self.in_flight.insert(
            unit.id,
            SettleTracker {
                still_ticks: 0,
                flight_ticks: 0,
                rest_drag,
            },
        );

        debug!(unit_id = %unit.id, power, impulse, "Unit launched");

        Ok(LaunchReceipt {
            unit_id: unit.id,
            direction,
            power,
            impulse,
        })
    }

    /// Sample every in-flight unit once. Returns the units that settled this
    /// tick; their velocity is zeroed, drag restored and launched flag cleared.
    /// A unit still unsettled after `max_flight_ticks` settles by force, so an
    /// unreadable or never-slowing body cannot hold the turn.
    pub fn advance(
        &mut self,
        roster: &mut TeamRoster,
        physics: &mut dyn PhysicsBackend,
    ) -> Vec<UnitId> {
        let mut settled = Vec::new();
        let mut dropped = Vec::new();

        for (&id, tracker) in self.in_flight.iter_mut() {
            let alive = roster.unit(id).map(|u| u.is_alive()).unwrap_or(false);
            if !alive {
                dropped.push(id);
                continue;
            }

            tracker.flight_ticks += 1;
            if tracker.flight_ticks >= self.tuning.max_flight_ticks {
                warn!(unit_id = %id, flight_ticks = tracker.flight_ticks, "Flight limit reached, forcing settle");
                settled.push((id, tracker.rest_drag));
                continue;
            }

            let speed_sq = match physics.planar_velocity(id) {
                Ok(v) => v.length_squared(),
                Err(e) => {
                    warn!(unit_id = %id, error = %e, "Settle check skipped");
                    continue;
                }
            };

            if speed_sq < self.tuning.settle_threshold_sq {
                tracker.still_ticks += 1;
                if tracker.still_ticks >= self.tuning.settle_ticks {
                    settled.push((id, tracker.rest_drag));
                }
            } else {
                tracker.still_ticks = 0;
            }
        }

        for id in dropped {
            if let Some(unit) = roster.unit_mut(id) {
                self.cancel(unit, physics);
            } else {
                self.in_flight.remove(&id);
            }
        }

        settled
            .into_iter()
            .map(|(id, rest_drag)| {
                self.in_flight.remove(&id);
                if let Err(e) = physics
                    .zero_velocity(id)
                    .and_then(|_| physics.set_drag(id, rest_drag))
                {
                    warn!(unit_id = %id, error = %e, "Settle reset incomplete");
                }
                if let Some(unit) = roster.unit_mut(id) {
                    unit.launched = false;
                }
                debug!(unit_id = %id, "Unit settled");
                id
            })
            .collect()
    }

    /// Stop tracking a unit without a completion signal (death or reset)
    pub fn cancel(&mut self, unit: &mut Unit, physics: &mut dyn PhysicsBackend) {
        unit.launched = false;
        let Some(tracker) = self.in_flight.remove(&unit.id) else {
            return;
        };
        if let Err(e) = physics
            .zero_velocity(unit.id)
            .and_then(|_| physics.set_drag(unit.id, tracker.rest_drag))
        {
            warn!(unit_id = %unit.id, error = %e, "Cancelled launch could not reset body");
        }
        debug!(unit_id = %unit.id, "Settle wait cancelled");
    }

    /// Cancel every settle wait (match reset)
    pub fn cancel_all(&mut self, roster: &mut TeamRoster, physics: &mut dyn PhysicsBackend) {
        for unit in roster.units_mut() {
            self.cancel(unit, physics);
        }
        self.in_flight.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::physics::{Contact, Pose};
    use std::collections::{HashMap, VecDeque};

    /// Physics stand-in whose velocities are set directly by the test
    #[derive(Default)]
    pub(crate) struct ScriptedPhysics {
        pub velocity: HashMap<UnitId, Vec3>,
        pub drag: HashMap<UnitId, f32>,
        pub poses: HashMap<UnitId, Pose>,
        pub impulses: Vec<(UnitId, Vec3)>,
        /// Contacts reported by successive steps, one batch per step
        pub contacts: VecDeque<Vec<Contact>>,
    }

    impl ScriptedPhysics {
        pub(crate) fn with_units(roster: &TeamRoster) -> Self {
            let mut physics = Self::default();
            for unit in roster.units() {
                physics.velocity.insert(unit.id, Vec3::ZERO);
                physics.drag.insert(unit.id, 0.0);
                physics.poses.insert(unit.id, unit.initial_pose);
            }
            physics
        }
    }

    impl PhysicsBackend for ScriptedPhysics {
        fn planar_velocity(&self, id: UnitId) -> Result<Vec3, PhysicsError> {
            self.velocity
                .get(&id)
                .copied()
                .ok_or(PhysicsError::MissingBody(id))
        }
        fn apply_impulse(&mut self, id: UnitId, impulse: Vec3) -> Result<(), PhysicsError> {
            let v = self
                .velocity
                .get_mut(&id)
                .ok_or(PhysicsError::MissingBody(id))?;
            *v = v.add(impulse);
            self.impulses.push((id, impulse));
            Ok(())
        }
        fn drag(&self, id: UnitId) -> Result<f32, PhysicsError> {
            self.drag.get(&id).copied().ok_or(PhysicsError::MissingBody(id))
        }
        fn set_drag(&mut self, id: UnitId, drag: f32) -> Result<(), PhysicsError> {
            *self.drag.get_mut(&id).ok_or(PhysicsError::MissingBody(id))? = drag;
            Ok(())
        }
        fn zero_velocity(&mut self, id: UnitId) -> Result<(), PhysicsError> {
            *self
                .velocity
                .get_mut(&id)
                .ok_or(PhysicsError::MissingBody(id))? = Vec3::ZERO;
            Ok(())
        }
        fn pose(&self, id: UnitId) -> Result<Pose, PhysicsError> {
            self.poses.get(&id).copied().ok_or(PhysicsError::MissingBody(id))
        }
        fn set_pose(&mut self, id: UnitId, pose: Pose) -> Result<(), PhysicsError> {
            *self.poses.get_mut(&id).ok_or(PhysicsError::MissingBody(id))? = pose;
            Ok(())
        }
        fn set_target_yaw(&mut self, id: UnitId, yaw: f32) -> Result<(), PhysicsError> {
            self.poses.get_mut(&id).ok_or(PhysicsError::MissingBody(id))?.yaw = yaw;
            Ok(())
        }
        fn set_active(&mut self, id: UnitId, _active: bool) -> Result<(), PhysicsError> {
            self.zero_velocity(id)
        }
        fn step(&mut self) -> Vec<Contact> {
            self.contacts.pop_front().unwrap_or_default()
        }
    }

    fn setup() -> (TeamRoster, ScriptedPhysics, LaunchController) {
        let config = MatchConfig {
            team_size: 1,
            ..MatchConfig::default()
        };
        let roster = TeamRoster::from_config(&config).unwrap();
        let physics = ScriptedPhysics::with_units(&roster);
        let launcher = LaunchController::new(LaunchTuning::from_config(&config));
        (roster, physics, launcher)
    }

    #[test]
    fn test_impulse_curve_endpoints() {
        let tuning = LaunchTuning::from_config(&MatchConfig::default());
        assert!((tuning.impulse_magnitude(0.0) - 4.0).abs() < 1e-5);
        assert!((tuning.impulse_magnitude(1.0) - 18.0).abs() < 1e-5);
        assert!((tuning.impulse_magnitude(7.0) - 18.0).abs() < 1e-5);
        // Curve sits slightly under linear at half power
        assert!(tuning.impulse_magnitude(0.5) < 11.0);
    }

    #[test]
    fn test_launch_is_planar_and_flags_unit() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        let receipt = launcher
            .launch(unit, Vec3::new(0.0, 5.0, 2.0), 1.0, &mut physics)
            .unwrap();

        assert_eq!(receipt.direction, Vec3::new(0.0, 0.0, 1.0));
        assert!(unit.launched);
        assert!(launcher.is_in_flight(UnitId(0)));
        assert_eq!(physics.drag[&UnitId(0)], 0.15);
        assert_eq!(physics.impulses.len(), 1);
        assert_eq!(physics.impulses[0].1.y, 0.0);
    }

    #[test]
    fn test_second_launch_refused_while_in_flight() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 0.5, &mut physics)
            .unwrap();
        assert_eq!(
            launcher.launch(unit, Vec3::new(1.0, 0.0, 0.0), 0.5, &mut physics),
            Err(LaunchError::AlreadyLaunched(UnitId(0)))
        );
    }

    #[test]
    fn test_vertical_only_direction_rejected() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        assert_eq!(
            launcher.launch(unit, Vec3::new(0.0, 1.0, 0.0), 0.5, &mut physics),
            Err(LaunchError::InvalidDirection)
        );
        assert!(!unit.launched);
    }

    #[test]
    fn test_settles_after_continuous_still_time() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 0.5, &mut physics)
            .unwrap();

        // Moving: counter keeps resetting
        for _ in 0..40 {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }

        physics.velocity.insert(UnitId(0), Vec3::new(0.1, 0.0, 0.0));
        let settle_ticks = launcher.tuning().settle_ticks;
        for _ in 1..settle_ticks {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }
        assert_eq!(
            launcher.advance(&mut roster, &mut physics),
            vec![UnitId(0)]
        );

        let unit = roster.unit(UnitId(0)).unwrap();
        assert!(!unit.launched);
        assert!(!launcher.is_in_flight(UnitId(0)));
        assert_eq!(physics.velocity[&UnitId(0)], Vec3::ZERO);
        assert_eq!(physics.drag[&UnitId(0)], 0.0);
    }

    #[test]
    fn test_speed_spike_restarts_still_timer() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 0.5, &mut physics)
            .unwrap();
        let settle_ticks = launcher.tuning().settle_ticks;

        physics.velocity.insert(UnitId(0), Vec3::ZERO);
        for _ in 1..settle_ticks {
            launcher.advance(&mut roster, &mut physics);
        }
        physics.velocity.insert(UnitId(0), Vec3::new(1.0, 0.0, 0.0));
        launcher.advance(&mut roster, &mut physics);
        physics.velocity.insert(UnitId(0), Vec3::ZERO);
        for _ in 1..settle_ticks {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }
        assert_eq!(launcher.advance(&mut roster, &mut physics).len(), 1);
    }

    #[test]
    fn test_flight_limit_forces_settle() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 1.0, &mut physics)
            .unwrap();
        let limit = launcher.tuning().max_flight_ticks;

        // Velocity never drops below the threshold
        for _ in 1..limit {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }
        assert_eq!(launcher.advance(&mut roster, &mut physics), vec![UnitId(0)]);

        assert!(!launcher.is_in_flight(UnitId(0)));
        assert!(!roster.unit(UnitId(0)).unwrap().launched);
        assert_eq!(physics.velocity[&UnitId(0)], Vec3::ZERO);
        assert_eq!(physics.drag[&UnitId(0)], 0.0);
    }

    #[test]
    fn test_unreadable_body_counts_toward_flight_limit() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 1.0, &mut physics)
            .unwrap();
        let limit = launcher.tuning().max_flight_ticks;
        physics.velocity.remove(&UnitId(0));

        for _ in 1..limit {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }
        assert_eq!(launcher.advance(&mut roster, &mut physics), vec![UnitId(0)]);
        assert!(!roster.unit(UnitId(0)).unwrap().launched);
    }

    #[test]
    fn test_cancel_all_restores_rest_drag() {
        let (mut roster, mut physics, mut launcher) = setup();
        physics.drag.insert(UnitId(1), 0.05);
        for id in [0, 1] {
            let unit = roster.unit_mut(UnitId(id)).unwrap();
            launcher
                .launch(unit, Vec3::new(0.0, 0.0, 1.0), 1.0, &mut physics)
                .unwrap();
        }
        assert_eq!(launcher.in_flight_count(), 2);

        launcher.cancel_all(&mut roster, &mut physics);
        assert_eq!(launcher.in_flight_count(), 0);
        assert_eq!(physics.drag[&UnitId(0)], 0.0);
        assert_eq!(physics.drag[&UnitId(1)], 0.05);
        assert!(roster.units().all(|u| !u.launched));
    }

    #[test]
    fn test_death_mid_flight_cancels_without_signal() {
        let (mut roster, mut physics, mut launcher) = setup();
        let unit = roster.unit_mut(UnitId(0)).unwrap();
        launcher
            .launch(unit, Vec3::new(1.0, 0.0, 0.0), 1.0, &mut physics)
            .unwrap();
        roster.unit_mut(UnitId(0)).unwrap().take_damage(100);

        physics.velocity.insert(UnitId(0), Vec3::ZERO);
        for _ in 0..100 {
            assert!(launcher.advance(&mut roster, &mut physics).is_empty());
        }
        assert!(!launcher.is_in_flight(UnitId(0)));
        assert!(!roster.unit(UnitId(0)).unwrap().launched);
    }
}
