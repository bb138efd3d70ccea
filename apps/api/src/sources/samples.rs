//! Resume sample loader. A sample is a JSON file under the samples directory,
//! either `{"resumes": [...]}`, `{"data": [...]}`, or a bare array of resume
//! objects. Each resume is reduced to a `CandidateFeatureIndex` once per load
//! and the result is cached for the life of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::matching::models::{CandidateFeatureIndex, EducationLevel, SalaryRange};

/// Sample used when neither the request nor the session names one.
pub const DEFAULT_SAMPLE_NAME: &str = "sample-initial";

const MAX_SAMPLE_NAME_LEN: usize = 80;

#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn load(&self, sample_name: &str) -> Result<Arc<Vec<CandidateFeatureIndex>>, AppError>;
}

pub struct FileSampleSource {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<CandidateFeatureIndex>>>>,
}

impl FileSampleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CandidateSource for FileSampleSource {
    async fn load(&self, sample_name: &str) -> Result<Arc<Vec<CandidateFeatureIndex>>, AppError> {
        let name = validate_sample_name(sample_name)?;

        if let Some(cached) = self.cache.read().await.get(name) {
            return Ok(cached.clone());
        }

        let path = self.dir.join(format!("{name}.json"));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Sample '{name}' not found")));
            }
            Err(e) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "failed to read sample {}: {e}",
                    path.display()
                )))
            }
        };

        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Validation(format!("Sample '{name}' is not valid JSON: {e}")))?;
        let candidates = Arc::new(build_feature_indices(name, &document));
        info!("Loaded sample '{name}' with {} candidates", candidates.len());

        self.cache
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| candidates.clone());
        Ok(candidates)
    }
}

/// Rejects names that could escape the samples directory.
pub fn validate_sample_name(name: &str) -> Result<&str, AppError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed.len() > MAX_SAMPLE_NAME_LEN
        || trimmed.starts_with('.')
        || trimmed
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control());
    if invalid {
        return Err(AppError::Validation(format!("Invalid sample name '{name}'")));
    }
    Ok(trimmed)
}

pub fn build_feature_indices(sample_name: &str, document: &Value) -> Vec<CandidateFeatureIndex> {
    let entries = match document {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("resumes")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| match entry.as_object() {
            Some(obj) => Some(build_feature_index(sample_name, i, obj)),
            None => {
                warn!("Skipping non-object resume #{i} in sample '{sample_name}'");
                None
            }
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Feature extraction
// ────────────────────────────────────────────────────────────────────────────

fn build_feature_index(sample_name: &str, index: usize, obj: &Map<String, Value>) -> CandidateFeatureIndex {
    let resume_id = field(obj, &["id", "resumeId", "resume_id"])
        .and_then(scalar_text)
        .unwrap_or_else(|| format!("{sample_name}-{index}"));

    let experience_years = field(obj, &["experienceYears", "experience_years", "workYears", "experience"])
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64().map(|y| y.max(0.0).floor() as u32),
            Value::String(s) => parse_experience_years(s),
            _ => None,
        });

    let education = field(obj, &["education", "degree", "educationLevel"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            EducationLevel::parse(raw)
                .map(|level| level.label().to_string())
                .unwrap_or_else(|| raw.to_string())
        });

    let city = field(obj, &["city", "location", "currentCity", "expectedCity"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let skills = dedup(string_items(field(obj, &["skills", "skillTags", "tags"])));

    let history = field(obj, &["workExperience", "workHistory", "work_history", "experiences"])
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut companies = string_items(field(obj, &["companies", "company"]));
    let mut industries = string_items(field(obj, &["industries", "industry"]));
    for job in history.iter().filter_map(Value::as_object) {
        companies.extend(field(job, &["company", "companyName"]).and_then(scalar_text));
        industries.extend(field(job, &["industry"]).and_then(scalar_text));
    }

    let salary = field(obj, &["expectedSalary", "salary", "expected_salary"])
        .and_then(Value::as_str)
        .and_then(parse_salary_range);

    let mut text_parts = Vec::new();
    collect_text(&Value::Object(obj.clone()), &mut text_parts);

    CandidateFeatureIndex {
        resume_id,
        name: field(obj, &["name", "candidateName"]).and_then(scalar_text),
        experience_years,
        education,
        city,
        skills,
        companies: dedup(companies),
        industries: dedup(industries),
        salary,
        full_text: text_parts.join(" ").to_lowercase(),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn list_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,，、;；/|]").expect("valid regex"))
}

/// Accepts an array of strings or one delimited string.
fn string_items(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => list_separator()
            .split(s)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Order-preserving, case-insensitive de-duplication.
fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

/// "5年", "5年以上", "5 years", "3.5 yrs". Fresh graduates count as zero.
pub fn parse_experience_years(text: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:年|years?|yrs?)").expect("valid regex")
    });

    let trimmed = text.trim();
    if let Some(caps) = re.captures(trimmed) {
        return caps[1].parse::<f64>().ok().map(|y| y.floor() as u32);
    }
    if trimmed.contains("应届") || trimmed.to_lowercase().contains("fresh") {
        return Some(0);
    }
    trimmed.parse::<u32>().ok()
}

/// "8000-12000", "8-12K", "1.5万-2万", "10000以上". Negotiable salaries yield `None`.
pub fn parse_salary_range(text: &str) -> Option<SalaryRange> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(\d+(?:\.\d+)?)\s*([kK千万wW])?\s*(?:[-~～至到]\s*(\d+(?:\.\d+)?)\s*([kK千万wW])?)?",
        )
        .expect("valid regex")
    });

    let caps = re.captures(text)?;
    let low: f64 = caps[1].parse().ok()?;
    let high: Option<f64> = caps.get(3).and_then(|m| m.as_str().parse().ok());
    let high_unit = caps.get(4).map(|m| m.as_str());
    // "8-12K": the trailing unit applies to both ends.
    let low_unit = caps.get(2).map(|m| m.as_str()).or(high_unit);

    let low = scale(low, low_unit);
    match high {
        Some(high) => Some(SalaryRange {
            min: Some(low),
            max: Some(scale(high, high_unit.or(low_unit))),
        }),
        None if text.contains("以上") || text.contains('+') => Some(SalaryRange {
            min: Some(low),
            max: None,
        }),
        None => Some(SalaryRange {
            min: Some(low),
            max: Some(low),
        }),
    }
}

fn scale(value: f64, unit: Option<&str>) -> u32 {
    let factor = match unit {
        Some("k" | "K" | "千") => 1_000.0,
        Some("万" | "w" | "W") => 10_000.0,
        _ => 1.0,
    };
    (value * factor).round() as u32
}
