use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::matching::models::{
    MatchResult, Recommendation, ScoreBreakdown, ScoreSource,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredMatchRow {
    pub id: Uuid,
    pub resume_id: String,
    pub job_description_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub sample_name: Option<String>,
    pub score: i32,
    pub recommendation: String,
    pub highlights: Vec<String>,
    pub concerns: Vec<String>,
    pub summary: String,
    pub breakdown: Option<Value>,
    pub score_source: String,
    pub engine: String,
    pub processing_ms: i64,
    pub matched_at: DateTime<Utc>,
}

/// A persisted `MatchResult` plus its identity and provenance.
/// At most one exists per `(resume_id, job_description_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMatch {
    pub resume_id: String,
    pub job_description_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub sample_name: Option<String>,
    #[serde(flatten)]
    pub result: MatchResult,
    pub engine: String,
    pub processing_ms: u64,
    pub matched_at: DateTime<Utc>,
}

impl From<StoredMatchRow> for StoredMatch {
    fn from(row: StoredMatchRow) -> Self {
        let score = row.score.clamp(0, 100) as u32;
        let score_source = ScoreSource::parse(&row.score_source).unwrap_or(ScoreSource::Rule);
        let recommendation = Recommendation::parse_label(&row.recommendation)
            .unwrap_or_else(|| Recommendation::from_score(score));
        let breakdown = row
            .breakdown
            .and_then(|b| serde_json::from_value::<ScoreBreakdown>(b).ok());

        StoredMatch {
            resume_id: row.resume_id,
            job_description_id: row.job_description_id,
            session_id: row.session_id,
            user_id: row.user_id,
            sample_name: row.sample_name,
            result: MatchResult {
                score,
                recommendation,
                highlights: row.highlights,
                concerns: row.concerns,
                summary: row.summary,
                breakdown,
                score_source,
            },
            engine: row.engine,
            processing_ms: row.processing_ms.max(0) as u64,
            matched_at: row.matched_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Audit record of one batch invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchRunRow {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub job_description_id: String,
    pub sample_name: Option<String>,
    pub mode: String,
    pub status: String,
    pub total_count: i32,
    pub processed_count: i32,
    pub failed_count: i32,
    pub matched_count: i32,
    pub avg_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDescriptionRow {
    pub id: String,
    pub title: String,
    pub requirements: String,
    pub responsibilities: String,
    pub auto_match: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
