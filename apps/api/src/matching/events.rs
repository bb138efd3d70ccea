//! Streaming protocol: the named events a match stream emits and the sink the
//! pipeline writes them to.
//!
//! A stream is `ready`, then `rules` (rule-scoring modes only), then one
//! `result` per escalated candidate, terminated by exactly one `done` or
//! `error`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use crate::matching::models::{MatchMode, MatchResult};

/// Running counter scoped to the escalated subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchStats {
    /// Candidates that ended with a real score (rule or AI). A failed AI call
    /// with no earlier score is listed as `no_match` but counts only in `failed`.
    pub processed: usize,
    /// Candidates at or above the matched threshold.
    pub matched: usize,
    pub avg_score: f64,
    /// AI calls that failed or returned unusable output.
    pub failed: usize,
}

/// One candidate in a ranked result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub resume_id: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub result: MatchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyPayload {
    pub run_id: Option<Uuid>,
    pub mode: MatchMode,
    pub job_description_id: String,
    pub is_virtual: bool,
    pub total_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesPayload {
    pub results: Vec<RankedMatch>,
    pub stats: MatchStats,
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub resume_id: String,
    pub result: MatchResult,
    /// Served from an existing AI row rather than a new call.
    pub cached: bool,
    pub failed: bool,
    pub progress: Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonePayload {
    pub run_id: Option<Uuid>,
    pub mode: MatchMode,
    pub stats: MatchStats,
    pub failed: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub run_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    Ready(ReadyPayload),
    Rules(RulesPayload),
    Result(ResultPayload),
    Done(DonePayload),
    Error(ErrorPayload),
}

impl MatchEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            MatchEvent::Ready(_) => "ready",
            MatchEvent::Rules(_) => "rules",
            MatchEvent::Result(_) => "result",
            MatchEvent::Done(_) => "done",
            MatchEvent::Error(_) => "error",
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            MatchEvent::Ready(p) => serde_json::to_value(p),
            MatchEvent::Rules(p) => serde_json::to_value(p),
            MatchEvent::Result(p) => serde_json::to_value(p),
            MatchEvent::Done(p) => serde_json::to_value(p),
            MatchEvent::Error(p) => serde_json::to_value(p),
        }
    }
}

/// Where the pipeline writes events. Sending never blocks or yields.
///
/// Once the receiving side is gone (client disconnected) the sink goes quiet:
/// further events are dropped, the pipeline keeps running.
pub struct EventSink {
    tx: Option<UnboundedSender<MatchEvent>>,
    closed: AtomicBool,
    run_id: OnceLock<Uuid>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<MatchEvent>) -> Self {
        Self {
            tx: Some(tx),
            closed: AtomicBool::new(false),
            run_id: OnceLock::new(),
        }
    }

    /// A sink for the synchronous path, where nobody listens.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            closed: AtomicBool::new(true),
            run_id: OnceLock::new(),
        }
    }

    /// Records the run this stream reports on. The first binding wins.
    pub fn bind_run(&self, run_id: Uuid) {
        let _ = self.run_id.set(run_id);
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn send(&self, event: MatchEvent) {
        if self.is_closed() {
            return;
        }
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("Match stream receiver dropped; suppressing further events");
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn error_event() -> MatchEvent {
        MatchEvent::Error(ErrorPayload {
            run_id: None,
            message: "boom".to_string(),
        })
    }

    #[test]
    fn test_event_names_and_payloads() {
        let event = MatchEvent::Result(ResultPayload {
            resume_id: "r-1".to_string(),
            result: MatchResult::no_match(
                crate::matching::models::ScoreSource::Ai,
                "x".to_string(),
                "",
            ),
            cached: false,
            failed: true,
            progress: Progress { done: 1, total: 5 },
        });
        assert_eq!(event.name(), "result");
        let payload = event.payload().unwrap();
        assert_eq!(payload["progress"]["done"], 1);
        assert_eq!(payload["result"]["recommendation"], "no_match");
        assert_eq!(error_event().name(), "error");
    }

    #[test]
    fn test_sink_goes_quiet_after_receiver_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.send(error_event());
        assert_eq!(rx.try_recv().unwrap().name(), "error");

        drop(rx);
        sink.send(error_event());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_sink_remembers_first_bound_run() {
        let sink = EventSink::disabled();
        assert_eq!(sink.run_id(), None);
        let first = Uuid::new_v4();
        sink.bind_run(first);
        sink.bind_run(Uuid::new_v4());
        assert_eq!(sink.run_id(), Some(first));
    }

    #[test]
    fn test_disabled_sink_is_closed() {
        let sink = EventSink::disabled();
        sink.send(error_event());
        assert!(sink.is_closed());
    }
}
