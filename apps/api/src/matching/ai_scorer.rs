//! AI Scorer — one LLM call per candidate, parsed (and repaired) into the same
//! `MatchResult` shape the rule scorer produces.
//!
//! `match_resume` is total: unavailability, transport failures, timeouts, and
//! unusable replies all collapse into a `no_match` result whose concerns carry a
//! compacted diagnostic. `try_match` exposes the failure so batch accounting can
//! count it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm_client::{ChatModel, LlmError};
use crate::matching::models::{CandidateFeatureIndex, JobCriteria, MatchResult, ScoreSource};
use crate::matching::prompts::{build_match_prompt, match_system_prompt};
use crate::matching::repair::{compact_text, parse_match_reply, ParseOutcome, RAW_SNIPPET_LIMIT};

/// Max characters of an error message surfaced as a concern.
const ERROR_CONCERN_LIMIT: usize = 160;

#[derive(Debug, Error)]
pub enum AiMatchError {
    #[error("AI scorer unavailable: LLM API key not configured")]
    Unavailable,

    #[error("AI call failed: {0}")]
    Call(#[from] LlmError),

    #[error("AI response could not be parsed")]
    Unparseable { raw: String },
}

impl AiMatchError {
    /// The synthetic `no_match` recorded in place of a usable AI score.
    pub fn to_result(&self) -> MatchResult {
        match self {
            AiMatchError::Unparseable { raw } => {
                let mut result = MatchResult::no_match(
                    ScoreSource::Ai,
                    "AI response could not be parsed as a match result".to_string(),
                    "AI scoring failed: unparseable response.",
                );
                result
                    .concerns
                    .push(format!("Raw reply: {}", compact_text(raw, RAW_SNIPPET_LIMIT)));
                result
            }
            other => MatchResult::no_match(
                ScoreSource::Ai,
                compact_text(&other.to_string(), ERROR_CONCERN_LIMIT),
                "AI scoring failed.",
            ),
        }
    }
}

/// A scorer the batch runner can fan candidates out to.
///
/// Carried in the matching service as `Arc<dyn ResumeMatcher>`.
#[async_trait]
pub trait ResumeMatcher: Send + Sync {
    /// Engine label persisted with each result (e.g. the model name).
    fn engine(&self) -> &str;

    async fn try_match(
        &self,
        candidate: &CandidateFeatureIndex,
        criteria: &JobCriteria,
    ) -> Result<MatchResult, AiMatchError>;

    /// Total form of [`ResumeMatcher::try_match`]: failures become `no_match`.
    async fn match_resume(
        &self,
        candidate: &CandidateFeatureIndex,
        criteria: &JobCriteria,
    ) -> MatchResult {
        match self.try_match(candidate, criteria).await {
            Ok(result) => result,
            Err(e) => e.to_result(),
        }
    }
}

/// LLM-backed scorer.
pub struct AiScorer {
    llm: Arc<dyn ChatModel>,
}

impl AiScorer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ResumeMatcher for AiScorer {
    fn engine(&self) -> &str {
        self.llm.model_name()
    }

    async fn try_match(
        &self,
        candidate: &CandidateFeatureIndex,
        criteria: &JobCriteria,
    ) -> Result<MatchResult, AiMatchError> {
        if !self.llm.is_configured() {
            return Err(AiMatchError::Unavailable);
        }

        let prompt = build_match_prompt(candidate, criteria);
        let reply = self
            .llm
            .complete(&match_system_prompt(), &prompt)
            .await
            .map_err(|e| {
                warn!("AI match call failed for resume {}: {e}", candidate.resume_id);
                AiMatchError::Call(e)
            })?;

        match parse_match_reply(&reply) {
            ParseOutcome::Parsed(result) => Ok(result),
            ParseOutcome::RepairAttempted(result) => {
                debug!(
                    "Repaired AI reply for resume {} (score {})",
                    candidate.resume_id, result.score
                );
                Ok(result)
            }
            ParseOutcome::Unparseable(raw) => {
                warn!(
                    "Unparseable AI reply for resume {}: {}",
                    candidate.resume_id,
                    compact_text(&raw, 80)
                );
                Err(AiMatchError::Unparseable { raw })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::models::Recommendation;
    use crate::testing::{sample_candidate, sample_criteria, ScriptedChat};

    #[tokio::test]
    async fn test_valid_reply_becomes_ai_result() {
        let chat = ScriptedChat::replying(r#"{"score": 77, "summary": "fits"}"#);
        let scorer = AiScorer::new(Arc::new(chat));
        let result = scorer
            .match_resume(&sample_candidate("r-1"), &sample_criteria())
            .await;
        assert_eq!(result.score, 77);
        assert_eq!(result.recommendation, Recommendation::Match);
        assert_eq!(result.score_source, ScoreSource::Ai);
    }

    #[tokio::test]
    async fn test_worded_score_reply_is_repaired() {
        let chat = ScriptedChat::replying(r#"{"score": "seventy-three", "summary": "ok"}"#);
        let scorer = AiScorer::new(Arc::new(chat));
        let result = scorer
            .try_match(&sample_candidate("r-1"), &sample_criteria())
            .await
            .unwrap();
        assert_eq!(result.score, 73);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_no_match_with_diagnostics() {
        let chat = ScriptedChat::replying("Sorry,   I\n\ncannot help with that.");
        let scorer = AiScorer::new(Arc::new(chat));
        let candidate = sample_candidate("r-1");
        let criteria = sample_criteria();

        let err = scorer.try_match(&candidate, &criteria).await.unwrap_err();
        assert!(matches!(err, AiMatchError::Unparseable { .. }));

        let result = scorer.match_resume(&candidate, &criteria).await;
        assert_eq!(result.recommendation, Recommendation::NoMatch);
        assert_eq!(result.score, 0);
        assert!(!result.concerns.is_empty());
        assert!(result
            .concerns
            .iter()
            .any(|c| c.contains("Sorry, I cannot help with that.")));
    }

    #[tokio::test]
    async fn test_call_failure_is_absorbed() {
        let chat = ScriptedChat::failing(LlmError::Timeout(60));
        let scorer = AiScorer::new(Arc::new(chat));
        let result = scorer
            .match_resume(&sample_candidate("r-1"), &sample_criteria())
            .await;
        assert_eq!(result.recommendation, Recommendation::NoMatch);
        assert!(result.concerns[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_unconfigured_llm_is_unavailable() {
        let chat = ScriptedChat::unconfigured();
        let scorer = AiScorer::new(Arc::new(chat));
        let err = scorer
            .try_match(&sample_candidate("r-1"), &sample_criteria())
            .await
            .unwrap_err();
        assert!(matches!(err, AiMatchError::Unavailable));
        assert!(err.to_result().concerns[0].contains("unavailable"));
    }
}
