//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::gateway::RejectReason;
use crate::game::physics::Vec3;
use crate::game::turn::{Outcome, TurnChangeCause, TurnSnapshot};
use crate::game::{Slot, UnitId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a match
    JoinMatch {
        /// Optional specific match ID, otherwise the open match is used
        #[serde(default)]
        match_id: Option<Uuid>,
    },

    /// Launch one of the requester's units
    Launch {
        unit_id: UnitId,
        /// World direction; the vertical component is discarded
        direction: Vec3,
        /// Normalized launch power, clamped to 0..=1
        power: f32,
    },

    /// Aim a unit (cosmetic, no turn gating)
    SetYaw {
        unit_id: UnitId,
        /// Heading in degrees
        yaw: f32,
    },

    /// Vote to play again after the match finished
    RequestRematch,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of match join, addressed to the joining participant
    MatchJoined {
        participant_id: Uuid,
        match_id: Uuid,
        slot: Slot,
        /// Seed for deterministic random generation
        seed: u64,
        tick_rate: u32,
        /// Everyone in the match at join time
        participants: Vec<ParticipantInfo>,
    },

    ParticipantJoined {
        participant: ParticipantInfo,
    },

    ParticipantLeft {
        participant_id: Uuid,
        slot: Slot,
        reason: String,
    },

    /// Match (or rematch) has started
    MatchStarted {
        tick: u64,
        active_slot: Slot,
    },

    /// Authoritative state (sent at regular intervals and after important events)
    Snapshot {
        tick: u64,
        turn: TurnSnapshot,
        units: Vec<UnitSnapshot>,
        /// Events that occurred since last snapshot
        events: Vec<GameEvent>,
    },

    /// Match has ended
    MatchEnd {
        outcome: Outcome,
        /// Slot index of the winner, -1 for a draw
        winner_slot: i8,
        winner_participant_id: Option<Uuid>,
        stats: MatchStats,
    },

    RematchRequested {
        participant_id: Uuid,
        votes: usize,
    },

    /// A launch or aim request was refused; nothing changed
    ActionRejected {
        participant_id: Uuid,
        unit_id: Option<UnitId>,
        reason: RejectReason,
    },

    /// Error message
    Error {
        /// Set when only one participant should see it
        participant_id: Option<Uuid>,
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        participant_id: Uuid,
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    /// Participant a message is addressed to, `None` for broadcasts
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            ServerMsg::Welcome { participant_id, .. }
            | ServerMsg::MatchJoined { participant_id, .. }
            | ServerMsg::ActionRejected { participant_id, .. }
            | ServerMsg::Pong { participant_id, .. } => Some(*participant_id),
            ServerMsg::Error { participant_id, .. } => *participant_id,
            _ => None,
        }
    }

    /// Whether this participant should receive the message
    pub fn is_for(&self, participant_id: Uuid) -> bool {
        self.recipient().map_or(true, |to| to == participant_id)
    }
}

/// Participant info for join notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub participant_id: Uuid,
    pub slot: Slot,
}

/// Unit state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub slot: Slot,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
    pub available: bool,
    pub launched: bool,
    pub position: Vec3,
    /// Degrees
    pub yaw: f32,
}

/// Game events since the previous snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    Launched {
        unit_id: UnitId,
        slot: Slot,
        direction: Vec3,
        power: f32,
        impulse: f32,
    },

    /// Collision damage, one per direction of a contact
    Hit {
        attacker_id: UnitId,
        defender_id: UnitId,
        damage: i32,
        remaining_hp: i32,
        point: Vec3,
    },

    UnitDefeated {
        unit_id: UnitId,
        slot: Slot,
    },

    Settled {
        unit_id: UnitId,
    },

    TurnChanged {
        active_slot: Slot,
        cause: TurnChangeCause,
    },

    RoundStarted {
        round: u32,
    },

    MatchFinished {
        outcome: Outcome,
    },
}

/// Match statistics at end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub duration_secs: u32,
    pub rounds: u32,
    pub launches: u32,
    pub hits: u32,
    /// Living units per slot
    pub units_remaining: [usize; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_launch() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"launch","unit_id":4,"direction":{"x":1.0,"y":0.3,"z":0.0},"power":0.6}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::Launch {
                unit_id, power, ..
            } => {
                assert_eq!(unit_id, UnitId(4));
                assert_eq!(power, 0.6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_join_without_match_id() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"join_match"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::JoinMatch { match_id: None }));
    }

    #[test]
    fn test_addressed_messages_only_reach_recipient() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let rejected = ServerMsg::ActionRejected {
            participant_id: me,
            unit_id: Some(UnitId(1)),
            reason: RejectReason::NotYourTurn,
        };
        assert!(rejected.is_for(me));
        assert!(!rejected.is_for(other));

        let started = ServerMsg::MatchStarted {
            tick: 1,
            active_slot: Slot::First,
        };
        assert!(started.is_for(other));
    }

    #[test]
    fn test_rejection_wire_form() {
        let id = Uuid::nil();
        let json = serde_json::to_value(ServerMsg::ActionRejected {
            participant_id: id,
            unit_id: Some(UnitId(2)),
            reason: RejectReason::NotOwner,
        })
        .unwrap();
        assert_eq!(json["type"], "action_rejected");
        assert_eq!(json["reason"], "not_owner");
        assert_eq!(json["unit_id"], 2);
    }
}
