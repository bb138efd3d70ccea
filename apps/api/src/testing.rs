//! In-memory doubles and fixtures shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::cache::{
    supersedes, MatchFilter, MatchStore, MatchWrite, NewMatchRun, RunFilter, RunFinalization,
    UpsertOutcome,
};
use crate::errors::AppError;
use crate::llm_client::{ChatModel, LlmError};
use crate::matching::ai_scorer::{AiMatchError, ResumeMatcher};
use crate::matching::models::{
    CandidateFeatureIndex, JobCriteria, MatchResult, Recommendation, SalaryRange, ScoreSource,
};
use crate::models::matching::{MatchRunRow, RunStatus, StoredMatch};
use crate::sources::job_descriptions::{AutoMatch, FilterPreset};
use crate::sources::{
    CandidateSource, JobDescriptionRecord, JobDescriptionSource, Session, SessionStore,
};

// ────────────────────────────────────────────────────────────────────────────
// Fixtures: the lathe-sales job and its candidates
// ────────────────────────────────────────────────────────────────────────────

pub fn sample_criteria() -> JobCriteria {
    JobCriteria {
        id: "jd-lathe-sales".to_string(),
        title: "数控车床销售".to_string(),
        keywords: vec!["车床".to_string(), "销售".to_string(), "数控".to_string()],
        locations: vec!["东莞".to_string()],
        industries: vec![],
        min_experience_years: Some(3),
        min_education: None,
        max_salary: Some(15000),
        priority: None,
        requirements: "3年以上机床销售经验".to_string(),
        responsibilities: "开发华南区域客户".to_string(),
        is_virtual: false,
    }
}

/// Stored form of [`sample_criteria`].
pub fn lathe_job_description() -> JobDescriptionRecord {
    JobDescriptionRecord {
        id: "jd-lathe-sales".to_string(),
        title: "数控车床销售".to_string(),
        requirements: "3年以上机床销售经验".to_string(),
        responsibilities: "开发华南区域客户".to_string(),
        auto_match: AutoMatch {
            keywords: vec!["车床".to_string(), "销售".to_string(), "数控".to_string()],
            locations: vec!["东莞".to_string()],
            priority: None,
            filter_preset: Some(FilterPreset {
                min_experience_years: Some(3),
                min_education: None,
                max_salary: Some(15000),
                industries: vec![],
            }),
        },
    }
}

/// A candidate who fits the lathe-sales job well.
pub fn sample_candidate(resume_id: &str) -> CandidateFeatureIndex {
    CandidateFeatureIndex {
        resume_id: resume_id.to_string(),
        name: Some("张伟".to_string()),
        experience_years: Some(6),
        education: Some("大专".to_string()),
        city: Some("东莞".to_string()),
        skills: vec!["数控车床".to_string(), "销售".to_string(), "客户开发".to_string()],
        companies: vec!["东莞精密机床有限公司".to_string()],
        industries: vec!["机床销售".to_string()],
        salary: Some(SalaryRange {
            min: Some(10000),
            max: Some(14000),
        }),
        full_text: "张伟 东莞 数控车床 销售 客户开发 机床销售 6年经验".to_string(),
    }
}

/// A candidate with nothing in common with the lathe-sales job.
pub fn weak_candidate(resume_id: &str) -> CandidateFeatureIndex {
    CandidateFeatureIndex {
        resume_id: resume_id.to_string(),
        name: Some("李娜".to_string()),
        experience_years: Some(0),
        education: Some("本科".to_string()),
        city: Some("北京".to_string()),
        skills: vec!["会计".to_string(), "excel".to_string()],
        companies: vec!["北京财务咨询".to_string()],
        industries: vec!["财务".to_string()],
        salary: Some(SalaryRange {
            min: Some(20000),
            max: None,
        }),
        full_text: "李娜 北京 会计 excel 财务".to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LLM / matcher doubles
// ────────────────────────────────────────────────────────────────────────────

/// Chat model that answers every prompt with a fixed reply or error.
pub struct ScriptedChat {
    reply: Option<String>,
    error: Mutex<Option<LlmError>>,
    configured: bool,
}

impl ScriptedChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            error: Mutex::new(None),
            configured: true,
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            reply: None,
            error: Mutex::new(Some(error)),
            configured: true,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            reply: None,
            error: Mutex::new(None),
            configured: false,
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted-chat"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        if let Some(error) = self.error.lock().unwrap().take() {
            return Err(error);
        }
        self.reply.clone().ok_or(LlmError::EmptyContent)
    }
}

#[derive(Clone, Copy)]
enum Scripted {
    Score(u32),
    Failure,
    Panic,
}

/// Matcher with per-resume scores, failures and delays. Unscripted resumes
/// score 80 immediately. Records call order and peak concurrency.
pub struct ScriptedMatcher {
    script: HashMap<String, (Scripted, u64)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_score(mut self, resume_id: &str, score: u32, delay_ms: u64) -> Self {
        self.script
            .insert(resume_id.to_string(), (Scripted::Score(score), delay_ms));
        self
    }

    pub fn with_failure(mut self, resume_id: &str, delay_ms: u64) -> Self {
        self.script
            .insert(resume_id.to_string(), (Scripted::Failure, delay_ms));
        self
    }

    /// The call for `resume_id` panics instead of returning.
    pub fn with_panic(mut self, resume_id: &str) -> Self {
        self.script
            .insert(resume_id.to_string(), (Scripted::Panic, 0));
        self
    }

    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn was_called(&self, resume_id: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|id| id == resume_id)
    }
}

#[async_trait]
impl ResumeMatcher for ScriptedMatcher {
    fn engine(&self) -> &str {
        "scripted-model"
    }

    async fn try_match(
        &self,
        candidate: &CandidateFeatureIndex,
        _criteria: &JobCriteria,
    ) -> Result<MatchResult, AiMatchError> {
        self.calls.lock().unwrap().push(candidate.resume_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (outcome, delay_ms) = self
            .script
            .get(&candidate.resume_id)
            .copied()
            .unwrap_or((Scripted::Score(80), 0));
        if matches!(outcome, Scripted::Panic) {
            panic!("scripted matcher panic for {}", candidate.resume_id);
        }
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed
            .lock()
            .unwrap()
            .push(candidate.resume_id.clone());

        match outcome {
            Scripted::Score(score) => Ok(MatchResult {
                score,
                recommendation: Recommendation::from_score(score),
                highlights: vec!["scripted".to_string()],
                concerns: vec![],
                summary: "scripted".to_string(),
                breakdown: None,
                score_source: ScoreSource::Ai,
            }),
            Scripted::Failure | Scripted::Panic => {
                Err(AiMatchError::Call(LlmError::Timeout(60)))
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store doubles
// ────────────────────────────────────────────────────────────────────────────

/// Match cache with the same tiering and finalization rules as Postgres.
#[derive(Default)]
pub struct MemoryMatchStore {
    rows: Mutex<HashMap<(String, String), StoredMatch>>,
    runs: Mutex<Vec<MatchRunRow>>,
    fail_writes: AtomicBool,
    fail_next_finalize: AtomicBool,
}

impl MemoryMatchStore {
    pub fn seed(&self, job_description_id: &str, resume_id: &str, result: MatchResult) {
        self.rows.lock().unwrap().insert(
            (resume_id.to_string(), job_description_id.to_string()),
            StoredMatch {
                resume_id: resume_id.to_string(),
                job_description_id: job_description_id.to_string(),
                session_id: None,
                user_id: None,
                sample_name: None,
                result,
                engine: "seeded".to_string(),
                processing_ms: 0,
                matched_at: Utc::now(),
            },
        );
    }

    pub fn row(&self, job_description_id: &str, resume_id: &str) -> Option<StoredMatch> {
        self.rows
            .lock()
            .unwrap()
            .get(&(resume_id.to_string(), job_description_id.to_string()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn runs(&self) -> Vec<MatchRunRow> {
        self.runs.lock().unwrap().clone()
    }

    /// Makes the next `finalize_run` call fail without touching the run.
    pub fn fail_next_finalize(&self) {
        self.fail_next_finalize.store(true, Ordering::SeqCst);
    }

    /// Makes every subsequent match write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

fn sorted_by_score(mut rows: Vec<StoredMatch>, limit: Option<i64>) -> Vec<StoredMatch> {
    rows.sort_by(|a, b| b.result.score.cmp(&a.result.score));
    if let Some(limit) = limit.filter(|l| *l > 0) {
        rows.truncate(limit as usize);
    }
    rows
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn upsert_match(&self, write: &MatchWrite<'_>) -> Result<UpsertOutcome, sqlx::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("simulated write failure".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        let key = (
            write.resume_id.to_string(),
            write.job_description_id.to_string(),
        );
        let previous = rows.get(&key);
        if previous.is_some_and(|existing| !supersedes(&existing.result, write.result)) {
            return Ok(UpsertOutcome::KeptExisting);
        }
        let keep = |new: Option<&str>, old: Option<&Option<String>>| {
            new.map(str::to_string)
                .or_else(|| old.and_then(|o| o.clone()))
        };
        let stored = StoredMatch {
            resume_id: write.resume_id.to_string(),
            job_description_id: write.job_description_id.to_string(),
            session_id: keep(write.session_id, previous.map(|p| &p.session_id)),
            user_id: keep(write.user_id, previous.map(|p| &p.user_id)),
            sample_name: keep(write.sample_name, previous.map(|p| &p.sample_name)),
            result: write.result.clone(),
            engine: write.engine.to_string(),
            processing_ms: write.processing_ms,
            matched_at: Utc::now(),
        };
        rows.insert(key, stored);
        Ok(UpsertOutcome::Written)
    }

    async fn find_matches(
        &self,
        job_description_id: &str,
        resume_ids: &[String],
    ) -> Result<Vec<StoredMatch>, sqlx::Error> {
        let rows = self.rows.lock().unwrap();
        Ok(resume_ids
            .iter()
            .filter_map(|id| rows.get(&(id.clone(), job_description_id.to_string())))
            .cloned()
            .collect())
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<StoredMatch>, sqlx::Error> {
        let rows: Vec<StoredMatch> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                filter
                    .session_id
                    .as_ref()
                    .map_or(true, |s| r.session_id.as_ref() == Some(s))
                    && filter
                        .job_description_id
                        .as_ref()
                        .map_or(true, |j| &r.job_description_id == j)
            })
            .cloned()
            .collect();
        Ok(sorted_by_score(rows, filter.limit))
    }

    async fn delete_matches(&self, job_description_id: Option<&str>) -> Result<u64, sqlx::Error> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, r| job_description_id.is_some_and(|j| r.job_description_id != j));
        Ok((before - rows.len()) as u64)
    }

    async fn create_run(&self, run: &NewMatchRun) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        self.runs.lock().unwrap().push(MatchRunRow {
            id,
            session_id: run.session_id.clone(),
            job_description_id: run.job_description_id.clone(),
            sample_name: run.sample_name.clone(),
            mode: run.mode.as_str().to_string(),
            status: RunStatus::Processing.as_str().to_string(),
            total_count: run.total_count as i32,
            processed_count: 0,
            failed_count: 0,
            matched_count: 0,
            avg_score: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        });
        Ok(id)
    }

    async fn finalize_run(
        &self,
        id: Uuid,
        finalization: &RunFinalization,
    ) -> Result<bool, sqlx::Error> {
        if self.fail_next_finalize.swap(false, Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("simulated finalize failure".to_string()));
        }
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs
            .iter_mut()
            .find(|r| r.id == id && r.status == RunStatus::Processing.as_str())
        else {
            return Ok(false);
        };
        run.status = finalization.status.as_str().to_string();
        if finalization.status != RunStatus::Failed {
            run.total_count = finalization.total_count as i32;
        }
        run.processed_count = finalization.processed_count as i32;
        run.failed_count = finalization.failed_count as i32;
        run.matched_count = finalization.matched_count as i32;
        run.avg_score = finalization.avg_score;
        run.error = finalization.error.clone();
        run.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<MatchRunRow>, sqlx::Error> {
        let mut runs: Vec<MatchRunRow> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                filter
                    .session_id
                    .as_ref()
                    .map_or(true, |s| r.session_id.as_ref() == Some(s))
                    && filter
                        .job_description_id
                        .as_ref()
                        .map_or(true, |j| &r.job_description_id == j)
            })
            .cloned()
            .collect();
        runs.reverse();
        Ok(runs)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn put(&self, session: &Session) -> Result<(), AppError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Source doubles
// ────────────────────────────────────────────────────────────────────────────

pub struct StaticCandidates {
    samples: HashMap<String, Arc<Vec<CandidateFeatureIndex>>>,
}

impl StaticCandidates {
    pub fn new(sample_name: &str, candidates: Vec<CandidateFeatureIndex>) -> Self {
        Self {
            samples: HashMap::from([(sample_name.to_string(), Arc::new(candidates))]),
        }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn load(&self, sample_name: &str) -> Result<Arc<Vec<CandidateFeatureIndex>>, AppError> {
        self.samples
            .get(sample_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Sample '{sample_name}' not found")))
    }
}

#[derive(Default)]
pub struct StaticJobDescriptions {
    records: HashMap<String, JobDescriptionRecord>,
}

impl StaticJobDescriptions {
    pub fn with(record: JobDescriptionRecord) -> Self {
        Self {
            records: HashMap::from([(record.id.clone(), record)]),
        }
    }
}

#[async_trait]
impl JobDescriptionSource for StaticJobDescriptions {
    async fn get(&self, id: &str) -> Result<Option<JobDescriptionRecord>, AppError> {
        Ok(self.records.get(id).cloned())
    }
}
