//! Matching Orchestrator — composes criteria building, candidate selection, the
//! rule pass, AI escalation, the match cache and the run ledger for one request.
//!
//! Per request:
//! 1. resolve criteria and candidates (input errors stop here, no run is created)
//! 2. open a `processing` run
//! 3. `rules_only` / `hybrid`: rule-score everything, upsert, read back the merged view
//! 4. `hybrid`: escalate the top-N rule-ranked candidates not already AI-scored
//! 5. `ai_only`: escalate every selected candidate not already AI-scored
//! 6. finalize the run exactly once, `completed` or `failed`
//!
//! The streaming variant runs the same pipeline on a spawned task so the run
//! finalizes even if the client goes away mid-stream.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{supersedes, MatchStore, MatchWrite, NewMatchRun, RunFinalization, UpsertOutcome};
use crate::errors::AppError;
use crate::matching::ai_scorer::ResumeMatcher;
use crate::matching::batch::{match_batch, BatchObserver, BatchOptions, BatchProgress};
use crate::matching::criteria;
use crate::matching::events::{
    DonePayload, ErrorPayload, EventSink, MatchEvent, MatchStats, Progress, RankedMatch,
    ReadyPayload, ResultPayload, RulesPayload,
};
use crate::matching::models::{CandidateFeatureIndex, JobCriteria, MatchMode, MatchResult, ScoreSource};
use crate::matching::rule_scorer::{self, RULE_ENGINE};
use crate::models::matching::RunStatus;
use crate::sources::samples::DEFAULT_SAMPLE_NAME;
use crate::sources::{CandidateSource, JobDescriptionSource, SessionStore};

pub const DEFAULT_TOP_N: usize = 20;
pub const MAX_TOP_N: usize = 500;

pub fn clamp_top_n(top_n: usize) -> usize {
    top_n.clamp(1, MAX_TOP_N)
}

#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    /// Batch Runner pool size.
    pub concurrency: usize,
    /// Escalation window when a request does not name one.
    pub default_top_n: usize,
}

impl MatchSettings {
    pub fn new(concurrency: usize, default_top_n: usize) -> Self {
        Self {
            concurrency,
            default_top_n: clamp_top_n(default_top_n),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub job_description_id: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub sample_name: Option<String>,
    pub resume_ids: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub mode: Option<MatchMode>,
    pub top_n: Option<usize>,
    /// Legacy hybrid behaviour for the synchronous endpoint: return rule
    /// results now and report how many candidates still await AI scoring.
    #[serde(default)]
    pub defer_ai: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResponse {
    pub run_id: Option<Uuid>,
    pub mode: MatchMode,
    pub job_description_id: String,
    pub results: Vec<RankedMatch>,
    pub stats: MatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_ai_count: Option<usize>,
}

/// A request after input validation: everything the pipeline needs.
struct MatchPlan {
    mode: MatchMode,
    criteria: JobCriteria,
    candidates: Vec<CandidateFeatureIndex>,
    session_id: Option<String>,
    user_id: Option<String>,
    sample_name: String,
    top_n: usize,
    defer_ai: bool,
}

impl MatchPlan {
    fn resume_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.resume_id.clone()).collect()
    }

    fn write<'a>(
        &'a self,
        resume_id: &'a str,
        result: &'a MatchResult,
        engine: &'a str,
        processing_ms: u64,
    ) -> MatchWrite<'a> {
        MatchWrite {
            resume_id,
            job_description_id: &self.criteria.id,
            session_id: self.session_id.as_deref(),
            user_id: self.user_id.as_deref(),
            sample_name: Some(&self.sample_name),
            result,
            engine,
            processing_ms,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MatchingService {
    candidates: Arc<dyn CandidateSource>,
    job_descriptions: Arc<dyn JobDescriptionSource>,
    sessions: Arc<dyn SessionStore>,
    store: Arc<dyn MatchStore>,
    matcher: Arc<dyn ResumeMatcher>,
    settings: MatchSettings,
}

impl MatchingService {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        job_descriptions: Arc<dyn JobDescriptionSource>,
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn MatchStore>,
        matcher: Arc<dyn ResumeMatcher>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            candidates,
            job_descriptions,
            sessions,
            store,
            matcher,
            settings,
        }
    }

    /// Synchronous "score now": runs the whole pipeline and returns the ranked view.
    pub async fn score_now(&self, request: MatchRequest) -> Result<ScoreResponse, AppError> {
        let plan = self.prepare(request).await?;
        if plan.mode == MatchMode::Hybrid && plan.defer_ai {
            return self.score_rules_deferred(&plan).await;
        }
        self.execute(&plan, &EventSink::disabled()).await
    }

    /// Streaming variant. Input errors are returned directly; everything after
    /// that is reported on the returned channel, which ends after `done` or
    /// `error`.
    pub async fn stream(
        &self,
        request: MatchRequest,
    ) -> Result<mpsc::UnboundedReceiver<MatchEvent>, AppError> {
        let plan = self.prepare(request).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.clone();

        tokio::spawn(async move {
            let sink = Arc::new(EventSink::new(tx));
            let store = service.store.clone();
            let pipeline_sink = sink.clone();
            let pipeline = tokio::spawn(async move {
                // Failures are already on the stream and recorded on the run.
                let _ = service.execute(&plan, &pipeline_sink).await;
            });

            if let Err(e) = pipeline.await {
                error!("Match pipeline aborted: {e}");
                let run_id = sink.run_id();
                if let Some(id) = run_id {
                    let failed = RunFinalization::failed(format!("pipeline aborted: {e}"));
                    if let Err(e) = store.finalize_run(id, &failed).await {
                        error!("Could not record abort of match run {id}: {e}");
                    }
                }
                sink.send(MatchEvent::Error(ErrorPayload {
                    run_id,
                    message: "Match pipeline aborted unexpectedly".to_string(),
                }));
            }
        });

        Ok(rx)
    }

    // ── input resolution ───────────────────────────────────────────────────

    async fn prepare(&self, request: MatchRequest) -> Result<MatchPlan, AppError> {
        let session = match request.session_id.as_deref() {
            Some(id) => Some(
                self.sessions
                    .get(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?,
            ),
            None => None,
        };

        // Explicit keywords take precedence over a job remembered by the session.
        let has_keywords = request.keywords.iter().any(|k| !k.trim().is_empty());
        let job_description_id = non_empty(request.job_description_id).or_else(|| {
            if has_keywords {
                None
            } else {
                session.as_ref().and_then(|s| s.job_description_id.clone())
            }
        });

        let criteria = match job_description_id {
            Some(id) => {
                let record = self.job_descriptions.get(&id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Job description {id} not found"))
                })?;
                criteria::from_stored(&record)
            }
            None => criteria::virtual_criteria(&request.keywords, request.location.as_deref())
                .ok_or_else(|| {
                    AppError::Validation(
                        "Either job_description_id or keywords is required".to_string(),
                    )
                })?,
        };

        let sample_name = non_empty(request.sample_name)
            .or_else(|| session.as_ref().and_then(|s| s.sample_name.clone()))
            .unwrap_or_else(|| DEFAULT_SAMPLE_NAME.to_string());
        let sample = self.candidates.load(&sample_name).await?;
        let candidates = select_candidates(&sample, request.resume_ids.as_deref(), request.limit);

        Ok(MatchPlan {
            mode: request.mode.unwrap_or(MatchMode::Hybrid),
            criteria,
            candidates,
            user_id: non_empty(request.user_id)
                .or_else(|| session.as_ref().and_then(|s| s.user_id.clone())),
            session_id: request.session_id,
            sample_name,
            top_n: request
                .top_n
                .map(clamp_top_n)
                .unwrap_or(self.settings.default_top_n),
            defer_ai: request.defer_ai,
        })
    }

    // ── run lifecycle ──────────────────────────────────────────────────────

    async fn execute(&self, plan: &MatchPlan, sink: &EventSink) -> Result<ScoreResponse, AppError> {
        let started = Instant::now();
        let run_id = match self
            .store
            .create_run(&NewMatchRun {
                session_id: plan.session_id.clone(),
                job_description_id: plan.criteria.id.clone(),
                sample_name: Some(plan.sample_name.clone()),
                mode: plan.mode,
                total_count: plan.candidates.len(),
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("Could not open match run: {e}");
                let e = AppError::from(e);
                sink.send(MatchEvent::Error(ErrorPayload {
                    run_id: None,
                    message: e.to_string(),
                }));
                return Err(e);
            }
        };

        sink.bind_run(run_id);
        info!(
            "Match run {run_id} started: mode={}, job={}, candidates={}",
            plan.mode.as_str(),
            plan.criteria.id,
            plan.candidates.len()
        );
        sink.send(MatchEvent::Ready(ReadyPayload {
            run_id: Some(run_id),
            mode: plan.mode,
            job_description_id: plan.criteria.id.clone(),
            is_virtual: plan.criteria.is_virtual,
            total_candidates: plan.candidates.len(),
        }));

        let mut guard = RunGuard::new(self.store.as_ref(), run_id);
        let outcome = match self.run_pipeline(plan, run_id, sink).await {
            Ok(response) => guard
                .finalize(completion(plan, &response.stats))
                .await
                .map(|_| response),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                info!(
                    "Match run {run_id} completed: processed={}, failed={}",
                    response.stats.processed, response.stats.failed
                );
                sink.send(MatchEvent::Done(DonePayload {
                    run_id: Some(run_id),
                    mode: plan.mode,
                    stats: response.stats.clone(),
                    failed: response.stats.failed,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }));
                Ok(response)
            }
            Err(e) => {
                error!("Match run {run_id} failed: {e}");
                guard.fail(e.to_string()).await;
                sink.send(MatchEvent::Error(ErrorPayload {
                    run_id: Some(run_id),
                    message: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        plan: &MatchPlan,
        run_id: Uuid,
        sink: &EventSink,
    ) -> Result<ScoreResponse, AppError> {
        let (mut view, window) = match plan.mode {
            MatchMode::RulesOnly | MatchMode::Hybrid => {
                let rule_results = self.rule_pass(plan).await?;
                let view = self.merged_view(plan, &rule_results).await?;
                let window = match plan.mode {
                    MatchMode::Hybrid => escalation_window(&rule_results, plan.top_n),
                    _ => Vec::new(),
                };

                let ranked = rank(plan, &view);
                sink.send(MatchEvent::Rules(RulesPayload {
                    stats: compute_stats(&ranked, &HashSet::new(), 0),
                    results: ranked,
                    progress: Progress {
                        done: 0,
                        total: window.len(),
                    },
                }));
                (view, window)
            }
            MatchMode::AiOnly => {
                let view = self.stored_view(plan).await?;
                (view, (0..plan.candidates.len()).collect())
            }
        };

        let ai = self.ai_pass(plan, run_id, &window, &mut view, sink).await?;

        let results = rank(plan, &view);
        let stats = compute_stats(&results, &ai.unscored, ai.failed);
        Ok(ScoreResponse {
            run_id: Some(run_id),
            mode: plan.mode,
            job_description_id: plan.criteria.id.clone(),
            results,
            stats,
            pending_ai_count: None,
        })
    }

    /// Legacy hybrid path: rule pass only, no run row, AI work reported as pending.
    async fn score_rules_deferred(&self, plan: &MatchPlan) -> Result<ScoreResponse, AppError> {
        let rule_results = self.rule_pass(plan).await?;
        let view = self.merged_view(plan, &rule_results).await?;
        let pending = escalation_window(&rule_results, plan.top_n)
            .into_iter()
            .filter(|&i| !is_ai_scored(&view, &plan.candidates[i].resume_id))
            .count();

        let results = rank(plan, &view);
        Ok(ScoreResponse {
            run_id: None,
            mode: plan.mode,
            job_description_id: plan.criteria.id.clone(),
            stats: compute_stats(&results, &HashSet::new(), 0),
            results,
            pending_ai_count: Some(pending),
        })
    }

    // ── passes ─────────────────────────────────────────────────────────────

    /// Rule-scores every candidate and writes the results, leaving AI rows alone.
    async fn rule_pass(&self, plan: &MatchPlan) -> Result<Vec<MatchResult>, AppError> {
        let cached = self.stored_view(plan).await?;
        let results = rule_scorer::score_batch(&plan.candidates, &plan.criteria);

        let mut kept = 0;
        for (candidate, result) in plan.candidates.iter().zip(&results) {
            if cached
                .get(&candidate.resume_id)
                .is_some_and(|existing| !supersedes(existing, result))
            {
                kept += 1;
                continue;
            }
            let write = plan.write(&candidate.resume_id, result, RULE_ENGINE, 0);
            if self.store.upsert_match(&write).await? == UpsertOutcome::KeptExisting {
                kept += 1;
            }
        }
        debug!(
            "Rule pass for job {}: {} scored, {} AI rows kept",
            plan.criteria.id,
            results.len(),
            kept
        );
        Ok(results)
    }

    /// Escalates `window` (candidate indices) to the AI scorer. Cached AI rows
    /// are reported first without a call.
    async fn ai_pass(
        &self,
        plan: &MatchPlan,
        run_id: Uuid,
        window: &[usize],
        view: &mut HashMap<String, MatchResult>,
        sink: &EventSink,
    ) -> Result<AiPassOutcome, AppError> {
        let total = window.len();
        let mut done = 0;
        let mut pending = Vec::new();

        for &index in window {
            let candidate = &plan.candidates[index];
            match view.get(&candidate.resume_id) {
                Some(result) if result.score_source == ScoreSource::Ai => {
                    done += 1;
                    sink.send(MatchEvent::Result(ResultPayload {
                        resume_id: candidate.resume_id.clone(),
                        result: result.clone(),
                        cached: true,
                        failed: false,
                        progress: Progress { done, total },
                    }));
                }
                _ => pending.push(candidate.clone()),
            }
        }

        if pending.is_empty() {
            return Ok(AiPassOutcome::default());
        }
        info!(
            "Match run {run_id}: escalating {} candidates to {} ({} cached)",
            pending.len(),
            self.matcher.engine(),
            done
        );

        let observer = PersistingObserver {
            store: self.store.as_ref(),
            plan,
            sink,
            engine: self.matcher.engine(),
            offset: done,
            total,
            failed_ids: StdMutex::new(HashSet::new()),
            write_error: StdMutex::new(None),
        };
        let outcome = match_batch(
            self.matcher.as_ref(),
            &pending,
            &plan.criteria,
            BatchOptions {
                concurrency: self.settings.concurrency,
                observer: Some(&observer),
            },
        )
        .await;

        if let Some(message) = take_locked(&observer.write_error) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "failed to store AI result: {message}"
            )));
        }

        let failed_ids = take_locked(&observer.failed_ids);
        let mut unscored = HashSet::new();
        for (candidate, result) in pending.iter().zip(outcome.results) {
            if failed_ids.contains(&candidate.resume_id) {
                // Failures are not persisted; show them only where nothing else exists.
                if let Entry::Vacant(slot) = view.entry(candidate.resume_id.clone()) {
                    slot.insert(result);
                    unscored.insert(candidate.resume_id.clone());
                }
            } else {
                view.insert(candidate.resume_id.clone(), result);
            }
        }
        debug!(
            "Match run {run_id}: AI pass took {}ms, {} failed",
            outcome.elapsed_ms, outcome.failed_count
        );
        Ok(AiPassOutcome {
            failed: outcome.failed_count,
            unscored,
        })
    }

    // ── cache reads ────────────────────────────────────────────────────────

    async fn stored_view(&self, plan: &MatchPlan) -> Result<HashMap<String, MatchResult>, AppError> {
        let rows = self
            .store
            .find_matches(&plan.criteria.id, &plan.resume_ids())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.resume_id, row.result))
            .collect())
    }

    /// Stored rows, with `fallback` (index-aligned with the candidates) filling gaps.
    async fn merged_view(
        &self,
        plan: &MatchPlan,
        fallback: &[MatchResult],
    ) -> Result<HashMap<String, MatchResult>, AppError> {
        let mut view = self.stored_view(plan).await?;
        for (candidate, result) in plan.candidates.iter().zip(fallback) {
            view.entry(candidate.resume_id.clone())
                .or_insert_with(|| result.clone());
        }
        Ok(view)
    }
}

#[derive(Default)]
struct AiPassOutcome {
    failed: usize,
    /// Candidates whose only result is a failed call's synthetic `no_match`.
    unscored: HashSet<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Run finalization guard
// ────────────────────────────────────────────────────────────────────────────

/// Finalizes a run at most once from this process, whatever happens afterwards.
struct RunGuard<'a> {
    store: &'a dyn MatchStore,
    run_id: Uuid,
    finalized: bool,
}

impl<'a> RunGuard<'a> {
    fn new(store: &'a dyn MatchStore, run_id: Uuid) -> Self {
        Self {
            store,
            run_id,
            finalized: false,
        }
    }

    async fn finalize(&mut self, finalization: RunFinalization) -> Result<bool, AppError> {
        if self.finalized {
            return Ok(false);
        }
        // Only a write the store accepted counts; after an error `fail` may still land.
        let applied = self.store.finalize_run(self.run_id, &finalization).await?;
        self.finalized = true;
        if !applied {
            warn!("Match run {} was already finalized", self.run_id);
        }
        Ok(applied)
    }

    async fn fail(&mut self, message: String) {
        if let Err(e) = self.finalize(RunFinalization::failed(message)).await {
            error!("Could not record failure of match run {}: {e}", self.run_id);
        }
    }
}

fn completion(plan: &MatchPlan, stats: &MatchStats) -> RunFinalization {
    RunFinalization {
        status: RunStatus::Completed,
        total_count: plan.candidates.len(),
        processed_count: stats.processed,
        failed_count: stats.failed,
        matched_count: stats.matched,
        avg_score: (stats.processed > 0).then_some(stats.avg_score),
        error: None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Batch observer
// ────────────────────────────────────────────────────────────────────────────

/// Streams each AI result, then persists it.
struct PersistingObserver<'a> {
    store: &'a dyn MatchStore,
    plan: &'a MatchPlan,
    sink: &'a EventSink,
    engine: &'a str,
    /// Cached AI hits already reported ahead of this batch.
    offset: usize,
    total: usize,
    failed_ids: StdMutex<HashSet<String>>,
    write_error: StdMutex<Option<String>>,
}

#[async_trait]
impl BatchObserver for PersistingObserver<'_> {
    async fn on_result(&self, progress: BatchProgress<'_>) {
        // Sent before the first await, so `done` reaches the client in order.
        self.sink.send(MatchEvent::Result(ResultPayload {
            resume_id: progress.resume_id.to_string(),
            result: progress.result.clone(),
            cached: false,
            failed: progress.failed,
            progress: Progress {
                done: self.offset + progress.done,
                total: self.total,
            },
        }));

        if progress.failed {
            lock(&self.failed_ids).insert(progress.resume_id.to_string());
            return;
        }

        let write = self.plan.write(
            progress.resume_id,
            progress.result,
            self.engine,
            progress.elapsed_ms,
        );
        if let Err(e) = self.store.upsert_match(&write).await {
            error!(
                "Failed to store AI result for resume {}: {e}",
                progress.resume_id
            );
            lock(&self.write_error).get_or_insert_with(|| e.to_string());
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_locked<T: Default>(mutex: &StdMutex<T>) -> T {
    std::mem::take(&mut *lock(mutex))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Explicit ids (kept in sample order) or the whole sample, then capped by `limit`.
fn select_candidates(
    sample: &[CandidateFeatureIndex],
    resume_ids: Option<&[String]>,
    limit: Option<usize>,
) -> Vec<CandidateFeatureIndex> {
    let mut selected: Vec<CandidateFeatureIndex> = match resume_ids.filter(|ids| !ids.is_empty()) {
        Some(ids) => {
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            sample
                .iter()
                .filter(|c| wanted.contains(c.resume_id.as_str()))
                .cloned()
                .collect()
        }
        None => sample.to_vec(),
    };
    if let Some(limit) = limit.filter(|l| *l > 0) {
        selected.truncate(limit);
    }
    selected
}

/// Indices of the `top_n` best rule scores; ties keep candidate order.
fn escalation_window(rule_results: &[MatchResult], top_n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rule_results.len()).collect();
    order.sort_by(|&a, &b| rule_results[b].score.cmp(&rule_results[a].score));
    order.truncate(top_n);
    order
}

fn is_ai_scored(view: &HashMap<String, MatchResult>, resume_id: &str) -> bool {
    view.get(resume_id)
        .is_some_and(|r| r.score_source == ScoreSource::Ai)
}

/// Candidates present in `view`, best score first; ties keep candidate order.
fn rank(plan: &MatchPlan, view: &HashMap<String, MatchResult>) -> Vec<RankedMatch> {
    let mut ranked: Vec<RankedMatch> = plan
        .candidates
        .iter()
        .filter_map(|c| {
            view.get(&c.resume_id).map(|result| RankedMatch {
                resume_id: c.resume_id.clone(),
                name: c.name.clone(),
                result: result.clone(),
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.result.score.cmp(&a.result.score));
    ranked
}

/// `unscored` results are listed but count only towards `failed`.
fn compute_stats(
    results: &[RankedMatch],
    unscored: &HashSet<String>,
    failed: usize,
) -> MatchStats {
    let scored: Vec<&MatchResult> = results
        .iter()
        .filter(|r| !unscored.contains(&r.resume_id))
        .map(|r| &r.result)
        .collect();
    let processed = scored.len();
    let matched = scored.iter().filter(|r| r.is_matched()).count();
    let avg_score = if processed == 0 {
        0.0
    } else {
        let total: u64 = scored.iter().map(|r| u64::from(r.score)).sum();
        round2(total as f64 / processed as f64)
    };
    MatchStats {
        processed,
        matched,
        avg_score,
        failed,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
