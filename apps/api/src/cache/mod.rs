//! Match Cache — durable store of one `StoredMatch` per (resume, job description)
//! pair plus the `MatchRun` audit ledger.
//!
//! Tiering rule: an `ai` row is authoritative and is never replaced by a later
//! `rule` write; every other combination overwrites. Implementations must decide
//! this atomically in the store, not with a read-then-write in the caller.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::matching::models::{MatchMode, MatchResult, ScoreSource};
use crate::models::matching::{MatchRunRow, RunStatus, StoredMatch};

pub mod postgres;

pub use postgres::PgMatchStore;

/// Row cap applied when a listing request does not name one.
pub const DEFAULT_LIST_LIMIT: i64 = 500;

/// One score to persist for a pair.
#[derive(Debug, Clone)]
pub struct MatchWrite<'a> {
    pub resume_id: &'a str,
    pub job_description_id: &'a str,
    pub session_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub sample_name: Option<&'a str>,
    pub result: &'a MatchResult,
    pub engine: &'a str,
    pub processing_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was inserted or overwritten.
    Written,
    /// An existing `ai` row outranked the incoming `rule` write.
    KeptExisting,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchFilter {
    pub session_id: Option<String>,
    pub job_description_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunFilter {
    pub session_id: Option<String>,
    pub job_description_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewMatchRun {
    pub session_id: Option<String>,
    pub job_description_id: String,
    pub sample_name: Option<String>,
    pub mode: MatchMode,
    pub total_count: usize,
}

/// Terminal state written once when a run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFinalization {
    pub status: RunStatus,
    pub total_count: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub matched_count: usize,
    pub avg_score: Option<f64>,
    pub error: Option<String>,
}

impl RunFinalization {
    pub fn failed(error: String) -> Self {
        Self {
            status: RunStatus::Failed,
            total_count: 0,
            processed_count: 0,
            failed_count: 0,
            matched_count: 0,
            avg_score: None,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn upsert_match(&self, write: &MatchWrite<'_>) -> Result<UpsertOutcome, sqlx::Error>;

    /// Cached rows for `job_description_id` restricted to `resume_ids`.
    async fn find_matches(
        &self,
        job_description_id: &str,
        resume_ids: &[String],
    ) -> Result<Vec<StoredMatch>, sqlx::Error>;

    /// Rows matching the filter, best score first.
    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<StoredMatch>, sqlx::Error>;

    /// Deletes every row, or only those of one job description. Returns the count.
    async fn delete_matches(&self, job_description_id: Option<&str>) -> Result<u64, sqlx::Error>;

    /// Opens a run in `processing` state.
    async fn create_run(&self, run: &NewMatchRun) -> Result<Uuid, sqlx::Error>;

    /// Moves a `processing` run to its terminal state. Returns `false` (and
    /// changes nothing) if the run was already finalized.
    async fn finalize_run(
        &self,
        id: Uuid,
        finalization: &RunFinalization,
    ) -> Result<bool, sqlx::Error>;

    /// Most recent runs first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<MatchRunRow>, sqlx::Error>;
}

/// Whether an incoming write may replace the cached row.
pub fn supersedes(existing: &MatchResult, incoming: &MatchResult) -> bool {
    !(existing.score_source == ScoreSource::Ai && incoming.score_source == ScoreSource::Rule)
}
