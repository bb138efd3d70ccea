use anyhow::{Context, Result};

use crate::llm_client::LlmConfig;
use crate::matching::orchestrator::{MatchSettings, DEFAULT_TOP_N};

const DEFAULT_CONCURRENCY: usize = 5;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub samples_dir: String,
    pub llm_api_key: Option<String>,
    pub llm_api_base: String,
    pub llm_model: String,
    pub ai_timeout_secs: u64,
    pub ai_max_retries: u32,
    pub ai_concurrency: usize,
    pub hybrid_top_n: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            samples_dir: env_or("SAMPLES_DIR", "output/resumes/samples"),
            llm_api_key: std::env::var("LLM_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            llm_api_base: env_or("LLM_API_BASE", "https://api.deepseek.com/v1"),
            llm_model: env_or("LLM_MODEL", "deepseek-chat"),
            ai_timeout_secs: std::env::var("AI_MATCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .context("AI_MATCH_TIMEOUT_SECS must be a whole number of seconds")?,
            ai_max_retries: std::env::var("AI_MATCH_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u32>()
                .context("AI_MATCH_MAX_RETRIES must be a non-negative integer")?,
            ai_concurrency: parse_concurrency(std::env::var("AI_MATCH_CONCURRENCY").ok().as_deref()),
            hybrid_top_n: std::env::var("HYBRID_TOP_N")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(DEFAULT_TOP_N),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }

    pub fn llm(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.llm_api_key.clone(),
            api_base: self.llm_api_base.clone(),
            model: self.llm_model.clone(),
            timeout_secs: self.ai_timeout_secs,
            max_retries: self.ai_max_retries,
        }
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings::new(self.ai_concurrency, self.hybrid_top_n)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Zero or garbage falls back to the default pool size.
fn parse_concurrency(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_CONCURRENCY)
}
