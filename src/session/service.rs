//! Session placement - which match a participant plays in

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::game::roster::RosterError;
use crate::game::turn::MatchStatus;
use crate::game::{GameMatch, MatchHandle, MatchRegistry, Slot};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("already placed in match {0}")]
    AlreadyPlaced(Uuid),
    #[error("match {0} not found")]
    UnknownMatch(Uuid),
    #[error("match {0} is full")]
    MatchFull(Uuid),
    #[error("match setup failed: {0}")]
    MatchSetup(#[from] RosterError),
}

impl SessionError {
    /// Code sent to the client in an error message
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyPlaced(_) => "already_in_match",
            SessionError::UnknownMatch(_) => "unknown_match",
            SessionError::MatchFull(_) => "match_full",
            SessionError::MatchSetup(_) => "match_setup_failed",
        }
    }
}

/// Places participants into two-seat matches, creating them on demand
pub struct SessionService {
    registry: Arc<MatchRegistry>,
    match_config: MatchConfig,
    /// Map of participant -> current match
    placements: Arc<DashMap<Uuid, Uuid>>,
    /// Held while a seat is picked so two joins never take the same one
    placement_lock: Mutex<()>,
}

impl SessionService {
    pub fn new(registry: Arc<MatchRegistry>, match_config: MatchConfig) -> Self {
        Self {
            registry,
            match_config,
            placements: Arc::new(DashMap::new()),
            placement_lock: Mutex::new(()),
        }
    }

    /// Reserve a seat: in the requested match, else an open one, else a new one
    pub fn join(
        &self,
        participant_id: Uuid,
        requested: Option<Uuid>,
    ) -> Result<MatchHandle, SessionError> {
        let _guard = self.placement_lock.lock();

        if let Some(current) = self.match_of(&participant_id) {
            return Err(SessionError::AlreadyPlaced(current));
        }

        let handle = match requested {
            Some(match_id) => {
                let handle = self
                    .registry
                    .get(&match_id)
                    .ok_or(SessionError::UnknownMatch(match_id))?;
                if self.seats_taken(&match_id) >= Slot::ALL.len() {
                    return Err(SessionError::MatchFull(match_id));
                }
                handle
            }
            None => match self.find_open_match() {
                Some(handle) => handle,
                None => self.create_match()?,
            },
        };

        self.placements.insert(participant_id, handle.id);
        info!(
            participant_id = %participant_id,
            match_id = %handle.id,
            "Participant placed"
        );
        Ok(handle)
    }

    /// Free the participant's seat, returning the match they were in
    pub fn leave(&self, participant_id: &Uuid) -> Option<Uuid> {
        let removed = self.placements.remove(participant_id).map(|(_, m)| m);
        if let Some(match_id) = removed {
            info!(participant_id = %participant_id, match_id = %match_id, "Participant unplaced");
        }
        removed
    }

    pub fn match_of(&self, participant_id: &Uuid) -> Option<Uuid> {
        self.placements.get(participant_id).map(|r| *r)
    }

    #[cfg(test)]
    pub fn placed_count(&self) -> usize {
        self.placements.len()
    }

    fn seats_taken(&self, match_id: &Uuid) -> usize {
        self.placements
            .iter()
            .filter(|entry| entry.value() == match_id)
            .count()
    }

    /// A match with a free seat that is not over, preferring one with someone waiting
    fn find_open_match(&self) -> Option<MatchHandle> {
        self.registry
            .handles()
            .into_iter()
            .filter(|h| h.summary().status != MatchStatus::Finished)
            .map(|h| (self.seats_taken(&h.id), h))
            .filter(|(taken, _)| *taken < Slot::ALL.len())
            .max_by_key(|(taken, _)| *taken)
            .map(|(_, h)| h)
    }

    fn create_match(&self) -> Result<MatchHandle, SessionError> {
        let match_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (game_match, handle) = GameMatch::new(match_id, seed, &self.match_config)?;

        self.registry.insert(handle.clone());
        info!(match_id = %match_id, "Created new match");

        let registry = self.registry.clone();
        let placements = self.placements.clone();
        tokio::spawn(async move {
            game_match.run().await;

            // Cleanup after match ends
            registry.remove(&match_id);
            placements.retain(|_, m| *m != match_id);

            info!(match_id = %match_id, "Match removed from registry");
        });

        Ok(handle)
    }
}
