//! Builds `JobCriteria` from a stored job description or from ad-hoc keywords.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::matching::models::{EducationLevel, JobCriteria};
use crate::sources::JobDescriptionRecord;

/// Prefix of every virtual criteria id.
pub const VIRTUAL_ID_PREFIX: &str = "keywords:";

/// Year counts above this in requirement text are calendar years, not experience.
const MAX_PLAUSIBLE_YEARS: u32 = 40;

pub fn from_stored(record: &JobDescriptionRecord) -> JobCriteria {
    let auto = &record.auto_match;
    let preset = auto.filter_preset.clone().unwrap_or_default();

    let mut keywords = normalize_terms(&auto.keywords);
    if keywords.is_empty() && !record.title.trim().is_empty() {
        keywords.push(record.title.trim().to_string());
    }

    let min_experience_years = preset
        .min_experience_years
        .or_else(|| extract_min_experience(&record.requirements));
    let min_education = preset
        .min_education
        .as_deref()
        .and_then(EducationLevel::parse)
        .or_else(|| EducationLevel::parse(&record.requirements));

    JobCriteria {
        id: record.id.clone(),
        title: record.title.clone(),
        keywords,
        locations: normalize_terms(&auto.locations),
        industries: normalize_terms(&preset.industries),
        min_experience_years,
        min_education,
        max_salary: preset.max_salary,
        priority: auto.priority.clone(),
        requirements: record.requirements.clone(),
        responsibilities: record.responsibilities.clone(),
        is_virtual: false,
    }
}

/// Criteria synthesized from a keyword list. `None` when no usable keyword remains.
pub fn virtual_criteria(keywords: &[String], location: Option<&str>) -> Option<JobCriteria> {
    let keywords = normalize_terms(keywords);
    if keywords.is_empty() {
        return None;
    }
    let location = location.map(str::trim).filter(|l| !l.is_empty());

    Some(JobCriteria {
        id: virtual_id(&keywords, location),
        title: keywords.join(" "),
        locations: location.map(split_locations).unwrap_or_default(),
        keywords,
        industries: Vec::new(),
        min_experience_years: None,
        min_education: None,
        max_salary: None,
        priority: None,
        requirements: String::new(),
        responsibilities: String::new(),
        is_virtual: true,
    })
}

/// Deterministic cache partition for a keyword search:
/// `keywords:<sorted, de-duplicated, lower-cased keywords>@<location or *>`.
pub fn virtual_id(keywords: &[String], location: Option<&str>) -> String {
    let mut terms: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    terms.sort();
    terms.dedup();

    let location = location
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "*".to_string());

    format!("{VIRTUAL_ID_PREFIX}{}@{location}", terms.join(","))
}

/// Trimmed, non-empty, case-insensitively de-duplicated, first occurrence wins.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn split_locations(location: &str) -> Vec<String> {
    let parts: Vec<String> = location
        .split([',', '，', '、', '/'])
        .map(str::to_string)
        .collect();
    normalize_terms(&parts)
}

/// "3年以上", "5年及以上经验", "3+ years", "at least 2 years".
pub fn extract_min_experience(text: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|\D)(\d{1,2})\s*\+?\s*(?:年|years?|yrs?)").expect("valid regex")
    });
    re.captures_iter(text)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .find(|years| *years <= MAX_PLAUSIBLE_YEARS)
}
