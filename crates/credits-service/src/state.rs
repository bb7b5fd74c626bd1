//! Application state.

use crate::config::ServiceConfig;
use crate::credits::CreditsService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The credits engine.
    pub credits: CreditsService,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(credits: CreditsService, config: ServiceConfig) -> Self {
        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - service endpoints will reject all requests");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not configured - admin endpoints will reject all requests");
        }

        Self { credits, config }
    }
}
