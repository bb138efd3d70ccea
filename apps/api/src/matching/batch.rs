//! Batch Runner — fans a candidate list out to a `ResumeMatcher` with bounded
//! concurrency.
//!
//! A fixed pool of worker futures pulls indices from a shared atomic cursor and
//! writes each result into a pre-sized, index-addressed slot vector, so output
//! order always equals input order. Workers are polled together on the caller's
//! task (`join_all`), not spawned: suspension points are exactly the matcher
//! call and the observer callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::matching::ai_scorer::ResumeMatcher;
use crate::matching::models::{CandidateFeatureIndex, JobCriteria, MatchResult, ScoreSource};

/// Pool size used when the configured concurrency is zero.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Per-completion progress, handed to the observer.
#[derive(Debug)]
pub struct BatchProgress<'a> {
    pub index: usize,
    pub resume_id: &'a str,
    pub result: &'a MatchResult,
    pub failed: bool,
    /// Completed units so far in this batch, including this one.
    pub done: usize,
    pub total: usize,
    pub elapsed_ms: u64,
}

/// Called once per completed unit. May perform I/O; only the calling worker
/// waits on it.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn on_result(&self, progress: BatchProgress<'_>);
}

pub struct BatchOptions<'a> {
    pub concurrency: usize,
    pub observer: Option<&'a dyn BatchObserver>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    /// One result per candidate, in input order.
    pub results: Vec<MatchResult>,
    /// Units that produced a usable score. `processed_count + failed_count == results.len()`.
    pub processed_count: usize,
    pub failed_count: usize,
    pub elapsed_ms: u64,
}

struct WorkerContext<'a> {
    matcher: &'a dyn ResumeMatcher,
    candidates: &'a [CandidateFeatureIndex],
    criteria: &'a JobCriteria,
    observer: Option<&'a dyn BatchObserver>,
    cursor: AtomicUsize,
    done: AtomicUsize,
    failed: AtomicUsize,
    slots: Mutex<Vec<Option<MatchResult>>>,
}

/// Scores every candidate through `matcher`, at most `options.concurrency` at a time.
pub async fn match_batch(
    matcher: &dyn ResumeMatcher,
    candidates: &[CandidateFeatureIndex],
    criteria: &JobCriteria,
    options: BatchOptions<'_>,
) -> BatchOutcome {
    let started = Instant::now();
    let total = candidates.len();

    if total == 0 {
        return BatchOutcome {
            results: Vec::new(),
            processed_count: 0,
            failed_count: 0,
            elapsed_ms: 0,
        };
    }

    let configured = if options.concurrency == 0 {
        DEFAULT_CONCURRENCY
    } else {
        options.concurrency
    };
    let pool_size = configured.min(total);

    let ctx = WorkerContext {
        matcher,
        candidates,
        criteria,
        observer: options.observer,
        cursor: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        slots: Mutex::new(vec![None; total]),
    };

    join_all((0..pool_size).map(|_| run_worker(&ctx))).await;

    let failed_count = ctx.failed.load(Ordering::SeqCst);
    let results = ctx
        .slots
        .into_inner()
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                MatchResult::no_match(
                    ScoreSource::Ai,
                    "Candidate was not processed".to_string(),
                    "AI scoring skipped.",
                )
            })
        })
        .collect::<Vec<_>>();

    BatchOutcome {
        processed_count: results.len() - failed_count,
        failed_count,
        results,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

async fn run_worker(ctx: &WorkerContext<'_>) {
    let total = ctx.candidates.len();
    loop {
        let index = ctx.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= total {
            break;
        }
        let candidate = &ctx.candidates[index];
        let unit_started = Instant::now();

        let (result, failed) = match ctx.matcher.try_match(candidate, ctx.criteria).await {
            Ok(result) => (result, false),
            Err(e) => {
                ctx.failed.fetch_add(1, Ordering::SeqCst);
                (e.to_result(), true)
            }
        };
        let done = ctx.done.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(observer) = ctx.observer {
            observer
                .on_result(BatchProgress {
                    index,
                    resume_id: &candidate.resume_id,
                    result: &result,
                    failed,
                    done,
                    total,
                    elapsed_ms: unit_started.elapsed().as_millis() as u64,
                })
                .await;
        }

        ctx.slots.lock().await[index] = Some(result);
    }
}
