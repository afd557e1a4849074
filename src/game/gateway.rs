//! Validation of participant actions before they touch match state
//!
//! The only path by which a participant can change the match. A rejected
//! request leaves every component exactly as it was.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::launch::{LaunchController, LaunchError, LaunchReceipt};
use super::physics::{PhysicsBackend, Vec3};
use super::round::RoundCoordinator;
use super::roster::TeamRoster;
use super::turn::TurnMatchState;
use super::{SessionContext, Slot, UnitId};

/// Why a request was refused, sent back to the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("this process does not own the match")]
    NotAuthority,
    #[error("match is not in progress")]
    MatchNotInProgress,
    #[error("requester holds no slot")]
    NoSlot,
    #[error("unit does not exist")]
    UnknownUnit,
    #[error("unit belongs to the other team")]
    NotOwner,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("another launch is still in flight")]
    LaunchInFlight,
    #[error("unit is dead or already used this round")]
    UnitUnavailable,
    #[error("unit is already launched")]
    AlreadyLaunched,
    #[error("launch direction has no horizontal component")]
    InvalidDirection,
    #[error("physics body missing")]
    PhysicsFault,
}

impl From<LaunchError> for RejectReason {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::Dead(_) => RejectReason::UnitUnavailable,
            LaunchError::AlreadyLaunched(_) => RejectReason::AlreadyLaunched,
            LaunchError::InvalidDirection => RejectReason::InvalidDirection,
            LaunchError::Physics(_) => RejectReason::PhysicsFault,
        }
    }
}

/// Borrowed view over the authority's components for one request
pub struct ActionGateway<'a> {
    pub ctx: &'a SessionContext,
    pub roster: &'a mut TeamRoster,
    pub turn: &'a mut TurnMatchState,
    pub launcher: &'a mut LaunchController,
    pub rounds: &'a mut RoundCoordinator,
    pub physics: &'a mut dyn PhysicsBackend,
}

impl<'a> ActionGateway<'a> {
    /// Validate and execute a launch for the requester's claimed slot
    pub fn handle_launch(
        &mut self,
        requester: Option<Slot>,
        unit_id: UnitId,
        direction: Vec3,
        power: f32,
    ) -> Result<LaunchReceipt, RejectReason> {
        let result = self.try_launch(requester, unit_id, direction, power);
        match &result {
            Ok(receipt) => info!(
                match_id = %self.ctx.match_id,
                unit_id = %unit_id,
                power = receipt.power,
                "Launch accepted"
            ),
            Err(reason) => warn!(
                match_id = %self.ctx.match_id,
                unit_id = %unit_id,
                slot = ?requester,
                reason = %reason,
                "Launch rejected"
            ),
        }
        result
    }

    fn try_launch(
        &mut self,
        requester: Option<Slot>,
        unit_id: UnitId,
        direction: Vec3,
        power: f32,
    ) -> Result<LaunchReceipt, RejectReason> {
        if !self.ctx.is_authority() {
            return Err(RejectReason::NotAuthority);
        }
        if !self.turn.is_started() || self.turn.is_finished() {
            return Err(RejectReason::MatchNotInProgress);
        }
        let slot = requester.ok_or(RejectReason::NoSlot)?;
        if self.roster.slot_of(unit_id).is_none() {
            return Err(RejectReason::UnknownUnit);
        }
        if !self.roster.is_owned_by_slot(unit_id, slot) {
            return Err(RejectReason::NotOwner);
        }
        if !self.turn.is_my_turn(slot) {
            return Err(RejectReason::NotYourTurn);
        }
        if !self.rounds.can_current_team_play() {
            return Err(RejectReason::LaunchInFlight);
        }

        let unit = self
            .roster
            .unit_mut(unit_id)
            .ok_or(RejectReason::UnknownUnit)?;
        if unit.launched {
            return Err(RejectReason::AlreadyLaunched);
        }
        if !unit.is_available() {
            return Err(RejectReason::UnitUnavailable);
        }

        let receipt = self
            .launcher
            .launch(unit, direction, power, &mut *self.physics)?;
        unit.mark_used();
        self.rounds.begin(unit_id);
        self.turn.suspend_timer();
        Ok(receipt)
    }

    /// Cosmetic heading change, applied on the next physics step
    pub fn handle_yaw(&mut self, unit_id: UnitId, yaw: f32) -> Result<(), RejectReason> {
        if !self.ctx.is_authority() {
            return Err(RejectReason::NotAuthority);
        }
        if !yaw.is_finite() {
            return Err(RejectReason::InvalidDirection);
        }
        let unit = self
            .roster
            .unit_mut(unit_id)
            .ok_or(RejectReason::UnknownUnit)?;
        let yaw = yaw.rem_euclid(360.0);
        unit.target_yaw = Some(yaw);
        self.physics.set_target_yaw(unit_id, yaw).map_err(|e| {
            warn!(match_id = %self.ctx.match_id, unit_id = %unit_id, error = %e, "Yaw not applied");
            RejectReason::PhysicsFault
        })
    }
}
