//! Authoritative duel simulation

pub mod combat;
pub mod gateway;
pub mod launch;
pub mod r#match;
pub mod physics;
pub mod round;
pub mod roster;
pub mod snapshot;
pub mod turn;
pub mod unit;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchSummary};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// One of the two player positions. Owns a team and takes turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::First, Slot::Second];

    pub fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    pub fn from_index(index: u8) -> Option<Slot> {
        match index {
            0 => Some(Slot::First),
            1 => Some(Slot::Second),
            _ => None,
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.index() as u8
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Slot::from_index(value).ok_or_else(|| format!("invalid slot {value}"))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Stable unit identity, kept for the whole match including after death
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether this process owns the canonical copy of the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

/// Per-match context handed to every component at construction
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub match_id: Uuid,
    pub role: Role,
}

impl SessionContext {
    pub fn authority(match_id: Uuid) -> Self {
        Self {
            match_id,
            role: Role::Authority,
        }
    }

    #[cfg(test)]
    pub fn observer(match_id: Uuid) -> Self {
        Self {
            match_id,
            role: Role::Observer,
        }
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }
}

/// Participant message received from the transport
#[derive(Debug, Clone)]
pub struct ParticipantInput {
    pub participant_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_other_flips() {
        assert_eq!(Slot::First.other(), Slot::Second);
        assert_eq!(Slot::Second.other(), Slot::First);
    }

    #[test]
    fn test_slot_wire_form_is_numeric() {
        assert_eq!(serde_json::to_string(&Slot::Second).unwrap(), "1");
        let slot: Slot = serde_json::from_str("0").unwrap();
        assert_eq!(slot, Slot::First);
        assert!(serde_json::from_str::<Slot>("2").is_err());
    }
}
