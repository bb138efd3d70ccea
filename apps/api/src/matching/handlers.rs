use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use crate::cache::{MatchFilter, RunFilter};
use crate::errors::AppError;
use crate::matching::events::MatchEvent;
use crate::matching::orchestrator::{MatchRequest, ScoreResponse};
use crate::models::matching::{MatchRunRow, StoredMatch};
use crate::sources::{Session, SessionUpdate};
use crate::state::AppState;

#[derive(Serialize)]
pub struct MatchListResponse {
    pub results: Vec<StoredMatch>,
    pub count: usize,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub job_description_id: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

#[derive(Serialize)]
pub struct RunListResponse {
    pub runs: Vec<MatchRunRow>,
}

/// POST /api/v1/matching/score
pub async fn handle_score(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    Ok(Json(state.matching.score_now(req).await?))
}

/// POST /api/v1/matching/stream
///
/// Input errors are answered with a plain JSON error before the stream opens.
pub async fn handle_stream(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state.matching.stream(req).await?;
    let events = UnboundedReceiverStream::new(rx).filter_map(|event| async move { to_sse(&event) });
    Ok(Sse::new(events.map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &MatchEvent) -> Option<Event> {
    let payload = match event.payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Dropping unserializable {} event: {e}", event.name());
            return None;
        }
    };
    match Event::default().event(event.name()).json_data(payload) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Dropping {} event: {e}", event.name());
            None
        }
    }
}

/// GET /api/v1/matching/results
pub async fn handle_list_results(
    State(state): State<AppState>,
    Query(filter): Query<MatchFilter>,
) -> Result<Json<MatchListResponse>, AppError> {
    let results = state.store.list_matches(&filter).await?;
    Ok(Json(MatchListResponse {
        count: results.len(),
        results,
    }))
}

/// DELETE /api/v1/matching/results
/// Without `job_description_id` the whole cache is cleared.
pub async fn handle_delete_results(
    State(state): State<AppState>,
    Query(params): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .store
        .delete_matches(params.job_description_id.as_deref())
        .await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// GET /api/v1/matching/runs
pub async fn handle_list_runs(
    State(state): State<AppState>,
    Query(filter): Query<RunFilter>,
) -> Result<Json<RunListResponse>, AppError> {
    let runs = state.store.list_runs(&filter).await?;
    Ok(Json(RunListResponse { runs }))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, AppError> {
    state
        .sessions
        .get(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))
}

/// PUT /api/v1/sessions/:id
pub async fn handle_put_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(update): Json<SessionUpdate>,
) -> Result<Json<Session>, AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError::Validation("session id must not be empty".to_string()));
    }
    let existing = state.sessions.get(&session_id).await?;
    let session = Session::merged(&session_id, existing, update);
    state.sessions.put(&session).await?;
    Ok(Json(session))
}
