//! Resume ↔ job description matching: a deterministic rule scorer, an LLM
//! scorer for escalated candidates, the bounded batch runner that fans out to
//! it, and the orchestrator that ties both to the match cache and run ledger.

pub mod ai_scorer;
pub mod batch;
pub mod criteria;
pub mod events;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod repair;
pub mod rule_scorer;
