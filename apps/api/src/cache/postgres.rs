use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{
    MatchFilter, MatchStore, MatchWrite, NewMatchRun, RunFilter, RunFinalization, UpsertOutcome,
    DEFAULT_LIST_LIMIT,
};
use crate::models::matching::{MatchRunRow, RunStatus, StoredMatch, StoredMatchRow};

/// Postgres-backed match cache and run ledger.
#[derive(Clone)]
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn list_limit(limit: Option<i64>) -> i64 {
    limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(DEFAULT_LIST_LIMIT)
}

fn count(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn upsert_match(&self, write: &MatchWrite<'_>) -> Result<UpsertOutcome, sqlx::Error> {
        let result = write.result;
        // The WHERE on the conflict arm is the tiering rule: an `ai` row is
        // left untouched by an incoming `rule` score.
        let rows = sqlx::query(
            r#"
            INSERT INTO resume_matches
                (resume_id, job_description_id, session_id, user_id, sample_name,
                 score, recommendation, highlights, concerns, summary, breakdown,
                 score_source, engine, processing_ms, matched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
            ON CONFLICT (resume_id, job_description_id) DO UPDATE SET
                session_id     = COALESCE(EXCLUDED.session_id, resume_matches.session_id),
                user_id        = COALESCE(EXCLUDED.user_id, resume_matches.user_id),
                sample_name    = COALESCE(EXCLUDED.sample_name, resume_matches.sample_name),
                score          = EXCLUDED.score,
                recommendation = EXCLUDED.recommendation,
                highlights     = EXCLUDED.highlights,
                concerns       = EXCLUDED.concerns,
                summary        = EXCLUDED.summary,
                breakdown      = EXCLUDED.breakdown,
                score_source   = EXCLUDED.score_source,
                engine         = EXCLUDED.engine,
                processing_ms  = EXCLUDED.processing_ms,
                matched_at     = now()
            WHERE NOT (resume_matches.score_source = 'ai' AND EXCLUDED.score_source = 'rule')
            "#,
        )
        .bind(write.resume_id)
        .bind(write.job_description_id)
        .bind(write.session_id)
        .bind(write.user_id)
        .bind(write.sample_name)
        .bind(result.score as i32)
        .bind(result.recommendation.as_str())
        .bind(&result.highlights)
        .bind(&result.concerns)
        .bind(&result.summary)
        .bind(result.breakdown.as_ref().map(Json))
        .bind(result.score_source.as_str())
        .bind(write.engine)
        .bind(i64::try_from(write.processing_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            debug!(
                "Kept AI-tiered row for resume {} / job {}",
                write.resume_id, write.job_description_id
            );
            return Ok(UpsertOutcome::KeptExisting);
        }
        Ok(UpsertOutcome::Written)
    }

    async fn find_matches(
        &self,
        job_description_id: &str,
        resume_ids: &[String],
    ) -> Result<Vec<StoredMatch>, sqlx::Error> {
        if resume_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, StoredMatchRow>(
            "SELECT * FROM resume_matches WHERE job_description_id = $1 AND resume_id = ANY($2)",
        )
        .bind(job_description_id)
        .bind(resume_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredMatch::from).collect())
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<StoredMatch>, sqlx::Error> {
        let rows = sqlx::query_as::<_, StoredMatchRow>(
            r#"
            SELECT * FROM resume_matches
            WHERE ($1::text IS NULL OR session_id = $1)
              AND ($2::text IS NULL OR job_description_id = $2)
            ORDER BY score DESC, matched_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.session_id.as_deref())
        .bind(filter.job_description_id.as_deref())
        .bind(list_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredMatch::from).collect())
    }

    async fn delete_matches(&self, job_description_id: Option<&str>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM resume_matches WHERE ($1::text IS NULL OR job_description_id = $1)",
        )
        .bind(job_description_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_run(&self, run: &NewMatchRun) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO match_runs
                (id, session_id, job_description_id, sample_name, mode, status, total_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(run.session_id.as_deref())
        .bind(&run.job_description_id)
        .bind(run.sample_name.as_deref())
        .bind(run.mode.as_str())
        .bind(RunStatus::Processing.as_str())
        .bind(count(run.total_count))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finalize_run(
        &self,
        id: Uuid,
        finalization: &RunFinalization,
    ) -> Result<bool, sqlx::Error> {
        // Only a `processing` run can move; a terminal status is final.
        let rows = sqlx::query(
            r#"
            UPDATE match_runs SET
                status          = $2,
                total_count     = CASE WHEN $2 = 'failed' THEN total_count ELSE $3 END,
                processed_count = $4,
                failed_count    = $5,
                matched_count   = $6,
                avg_score       = $7,
                error           = $8,
                completed_at    = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(finalization.status.as_str())
        .bind(count(finalization.total_count))
        .bind(count(finalization.processed_count))
        .bind(count(finalization.failed_count))
        .bind(count(finalization.matched_count))
        .bind(finalization.avg_score)
        .bind(finalization.error.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<MatchRunRow>, sqlx::Error> {
        sqlx::query_as::<_, MatchRunRow>(
            r#"
            SELECT * FROM match_runs
            WHERE ($1::text IS NULL OR session_id = $1)
              AND ($2::text IS NULL OR job_description_id = $2)
            ORDER BY started_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.session_id.as_deref())
        .bind(filter.job_description_id.as_deref())
        .bind(list_limit(filter.limit))
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_limit_defaults_and_caps() {
        assert_eq!(list_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(list_limit(Some(0)), DEFAULT_LIST_LIMIT);
        assert_eq!(list_limit(Some(25)), 25);
        assert_eq!(list_limit(Some(10_000)), DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn test_count_saturates() {
        assert_eq!(count(7), 7);
        assert_eq!(count(usize::MAX), i32::MAX);
    }
}
