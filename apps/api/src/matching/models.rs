//! Shared data models for the matching pipeline: candidate features, job criteria,
//! and the scorer-agnostic `MatchResult`.

use serde::{Deserialize, Serialize};

/// Score at or above which a candidate counts as "matched" in run statistics.
pub const MATCHED_SCORE_THRESHOLD: u32 = 50;

// ────────────────────────────────────────────────────────────────────────────
// Recommendation / provenance labels
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongMatch,
    Match,
    Potential,
    NoMatch,
}

impl Recommendation {
    /// Score bands: ≥90 strong_match, ≥70 match, ≥50 potential, else no_match.
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Recommendation::StrongMatch,
            70..=89 => Recommendation::Match,
            50..=69 => Recommendation::Potential,
            _ => Recommendation::NoMatch,
        }
    }

    /// Parses an upstream label. Unknown labels yield `None` so callers can fall
    /// back to the score band.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "strong_match" => Some(Recommendation::StrongMatch),
            "match" => Some(Recommendation::Match),
            "potential" => Some(Recommendation::Potential),
            "no_match" => Some(Recommendation::NoMatch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongMatch => "strong_match",
            Recommendation::Match => "match",
            Recommendation::Potential => "potential",
            Recommendation::NoMatch => "no_match",
        }
    }
}

/// Provenance of a score. `Ai` rows are authoritative in the cache; `Rule` rows
/// are provisional and may be superseded by an AI pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Rule,
    Ai,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::Rule => "rule",
            ScoreSource::Ai => "ai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rule" => Some(ScoreSource::Rule),
            "ai" => Some(ScoreSource::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    RulesOnly,
    Hybrid,
    AiOnly,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::RulesOnly => "rules_only",
            MatchMode::Hybrid => "hybrid",
            MatchMode::AiOnly => "ai_only",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MatchResult
// ────────────────────────────────────────────────────────────────────────────

/// Per-axis sub-scores. Aliases accept the camelCase keys LLMs tend to emit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    #[serde(alias = "skillMatch", default)]
    pub skill_match: u32,
    #[serde(alias = "experienceMatch", default)]
    pub experience_match: u32,
    #[serde(alias = "educationMatch", default)]
    pub education_match: u32,
    #[serde(alias = "locationMatch", default)]
    pub location_match: u32,
    #[serde(alias = "industryMatch", default)]
    pub industry_match: u32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u32 {
        self.skill_match
            + self.experience_match
            + self.education_match
            + self.location_match
            + self.industry_match
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: u32,
    pub recommendation: Recommendation,
    pub highlights: Vec<String>,
    pub concerns: Vec<String>,
    pub summary: String,
    pub breakdown: Option<ScoreBreakdown>,
    pub score_source: ScoreSource,
}

impl MatchResult {
    /// A zero-score `no_match` carrying a single diagnostic concern.
    pub fn no_match(score_source: ScoreSource, concern: String, summary: &str) -> Self {
        Self {
            score: 0,
            recommendation: Recommendation::NoMatch,
            highlights: Vec::new(),
            concerns: vec![concern],
            summary: summary.to_string(),
            breakdown: None,
            score_source,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.score >= MATCHED_SCORE_THRESHOLD
    }
}

/// Rounds and clamps an arbitrary numeric score into [0, 100].
pub fn clamp_score(raw: f64) -> u32 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u32
}

// ────────────────────────────────────────────────────────────────────────────
// Candidate features
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Precomputed, immutable per-resume snapshot consumed by both scorers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFeatureIndex {
    pub resume_id: String,
    pub name: Option<String>,
    pub experience_years: Option<u32>,
    pub education: Option<String>,
    pub city: Option<String>,
    /// Ordered, de-duplicated.
    pub skills: Vec<String>,
    pub companies: Vec<String>,
    pub industries: Vec<String>,
    pub salary: Option<SalaryRange>,
    /// Lower-cased concatenation of every textual field.
    pub full_text: String,
}

/// Education ladder, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    JuniorHigh,
    HighSchool,
    Associate,
    Bachelor,
    Master,
    Doctorate,
}

const EDUCATION_PATTERNS: &[(&str, EducationLevel)] = &[
    ("博士", EducationLevel::Doctorate),
    ("doctor", EducationLevel::Doctorate),
    ("phd", EducationLevel::Doctorate),
    ("硕士", EducationLevel::Master),
    ("研究生", EducationLevel::Master),
    ("master", EducationLevel::Master),
    ("mba", EducationLevel::Master),
    ("本科", EducationLevel::Bachelor),
    ("学士", EducationLevel::Bachelor),
    ("bachelor", EducationLevel::Bachelor),
    ("大专", EducationLevel::Associate),
    ("专科", EducationLevel::Associate),
    ("associate", EducationLevel::Associate),
    ("college", EducationLevel::Associate),
    ("高中", EducationLevel::HighSchool),
    ("中专", EducationLevel::HighSchool),
    ("中技", EducationLevel::HighSchool),
    ("high school", EducationLevel::HighSchool),
    ("初中", EducationLevel::JuniorHigh),
    ("junior high", EducationLevel::JuniorHigh),
];

impl EducationLevel {
    /// Finds the education level mentioned earliest in `text`.
    ///
    /// "本科及以上，硕士优先" resolves to `Bachelor`, not `Master`.
    pub fn parse(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        EDUCATION_PATTERNS
            .iter()
            .filter_map(|(pattern, level)| lowered.find(pattern).map(|pos| (pos, *level)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, level)| level)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EducationLevel::JuniorHigh => "junior high",
            EducationLevel::HighSchool => "high school",
            EducationLevel::Associate => "associate",
            EducationLevel::Bachelor => "bachelor",
            EducationLevel::Master => "master",
            EducationLevel::Doctorate => "doctorate",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Job criteria
// ────────────────────────────────────────────────────────────────────────────

/// Normalized matching target, either derived from a stored job description or
/// synthesized from ad-hoc keywords (`is_virtual`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCriteria {
    /// Stored job description id, or the deterministic virtual id.
    pub id: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub industries: Vec<String>,
    pub min_experience_years: Option<u32>,
    pub min_education: Option<EducationLevel>,
    pub max_salary: Option<u32>,
    pub priority: Option<String>,
    pub requirements: String,
    pub responsibilities: String,
    pub is_virtual: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(Recommendation::from_score(100), Recommendation::StrongMatch);
        assert_eq!(Recommendation::from_score(90), Recommendation::StrongMatch);
        assert_eq!(Recommendation::from_score(89), Recommendation::Match);
        assert_eq!(Recommendation::from_score(70), Recommendation::Match);
        assert_eq!(Recommendation::from_score(69), Recommendation::Potential);
        assert_eq!(Recommendation::from_score(50), Recommendation::Potential);
        assert_eq!(Recommendation::from_score(49), Recommendation::NoMatch);
        assert_eq!(Recommendation::from_score(0), Recommendation::NoMatch);
    }

    #[test]
    fn test_parse_label_accepts_variants() {
        assert_eq!(
            Recommendation::parse_label("Strong Match"),
            Some(Recommendation::StrongMatch)
        );
        assert_eq!(
            Recommendation::parse_label("no-match"),
            Some(Recommendation::NoMatch)
        );
        assert_eq!(Recommendation::parse_label("excellent"), None);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(150.0), 100);
        assert_eq!(clamp_score(-3.0), 0);
        assert_eq!(clamp_score(72.6), 73);
        assert_eq!(clamp_score(f64::NAN), 0);
    }

    #[test]
    fn test_education_parse_prefers_earliest_mention() {
        assert_eq!(
            EducationLevel::parse("本科及以上，硕士优先"),
            Some(EducationLevel::Bachelor)
        );
        assert_eq!(
            EducationLevel::parse("Master of Engineering"),
            Some(EducationLevel::Master)
        );
        assert_eq!(EducationLevel::parse("不限"), None);
        assert!(EducationLevel::Master > EducationLevel::Associate);
    }

    #[test]
    fn test_breakdown_accepts_camel_case() {
        let breakdown: ScoreBreakdown =
            serde_json::from_str(r#"{"skillMatch": 30, "locationMatch": 10}"#).unwrap();
        assert_eq!(breakdown.skill_match, 30);
        assert_eq!(breakdown.location_match, 10);
        assert_eq!(breakdown.total(), 40);
    }
}
