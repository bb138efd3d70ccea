use std::sync::Arc;

use crate::cache::MatchStore;
use crate::matching::orchestrator::MatchingService;
use crate::sources::SessionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub matching: MatchingService,
    /// Read/delete access to cached matches and run history.
    pub store: Arc<dyn MatchStore>,
    pub sessions: Arc<dyn SessionStore>,
}
