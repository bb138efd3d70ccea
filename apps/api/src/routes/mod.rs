pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::matching::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Matching API
        .route("/api/v1/matching/score", post(handlers::handle_score))
        .route("/api/v1/matching/stream", post(handlers::handle_stream))
        .route(
            "/api/v1/matching/results",
            get(handlers::handle_list_results).delete(handlers::handle_delete_results),
        )
        .route("/api/v1/matching/runs", get(handlers::handle_list_runs))
        // Sessions
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_session).put(handlers::handle_put_session),
        )
        .with_state(state)
}
