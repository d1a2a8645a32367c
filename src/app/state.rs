//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // The registry is owned here and passed down by handle; there is no
        // process-global session map
        let registry = Arc::new(SessionRegistry::new(config.session_settings.clone()));

        Self { config, registry }
    }
}
