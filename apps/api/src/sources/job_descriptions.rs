use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

use crate::errors::AppError;
use crate::models::matching::JobDescriptionRow;

/// Structured matching metadata stored alongside a job description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoMatch {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    #[serde(deserialize_with = "scalar_as_string")]
    pub priority: Option<String>,
    #[serde(alias = "filter_preset")]
    pub filter_preset: Option<FilterPreset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterPreset {
    #[serde(alias = "min_experience_years", alias = "minExperience")]
    pub min_experience_years: Option<u32>,
    #[serde(alias = "min_education")]
    pub min_education: Option<String>,
    #[serde(alias = "max_salary")]
    pub max_salary: Option<u32>,
    pub industries: Vec<String>,
}

/// Priority is stored either as a label ("high") or a numeric weight.
fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A stored job description, ready for criteria building.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptionRecord {
    pub id: String,
    pub title: String,
    pub requirements: String,
    pub responsibilities: String,
    pub auto_match: AutoMatch,
}

impl From<JobDescriptionRow> for JobDescriptionRecord {
    fn from(row: JobDescriptionRow) -> Self {
        let auto_match = row
            .auto_match
            .map(|value| parse_auto_match(&row.id, value))
            .unwrap_or_default();
        Self {
            id: row.id,
            title: row.title,
            requirements: row.requirements,
            responsibilities: row.responsibilities,
            auto_match,
        }
    }
}

fn parse_auto_match(id: &str, value: Value) -> AutoMatch {
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Ignoring malformed auto_match metadata on job description {id}: {e}");
        AutoMatch::default()
    })
}

#[async_trait]
pub trait JobDescriptionSource: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<JobDescriptionRecord>, AppError>;
}

pub struct PgJobDescriptionSource {
    pool: PgPool,
}

impl PgJobDescriptionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobDescriptionSource for PgJobDescriptionSource {
    async fn get(&self, id: &str) -> Result<Option<JobDescriptionRecord>, AppError> {
        let row: Option<JobDescriptionRow> =
            sqlx::query_as("SELECT * FROM job_descriptions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(JobDescriptionRecord::from))
    }
}
