//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::session::SessionService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionService>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize match registry
        let match_registry = Arc::new(MatchRegistry::new());

        // Session placement shares the registry with the HTTP side
        let sessions = Arc::new(SessionService::new(
            match_registry.clone(),
            config.match_config.clone(),
        ));

        Self {
            config,
            sessions,
            match_registry,
        }
    }
}
