//! Rule Scorer — deterministic, side-effect-free scoring of a candidate against
//! job criteria.
//!
//! Five axes each contribute a bounded sub-score; the sum is clamped to [0, 100].
//! Re-scoring the same input always yields the same output, which is what makes a
//! cached `rule` row safe to compare against a fresh rule pass.
//!
//! | axis       | max | signal                                                     |
//! |------------|-----|------------------------------------------------------------|
//! | skills     | 40  | keyword hit in skills (1.0) or in full text (0.6)         |
//! | experience | 20  | years vs required minimum                                  |
//! | education  | 10  | education ladder vs required minimum                       |
//! | location   | 15  | candidate city vs target locations                         |
//! | industry   | 15  | industry tags / companies (1.0) or full text (0.5)         |

use crate::matching::models::{
    CandidateFeatureIndex, EducationLevel, JobCriteria, MatchResult, Recommendation,
    ScoreBreakdown, ScoreSource,
};

pub const SKILL_WEIGHT: u32 = 40;
pub const EXPERIENCE_WEIGHT: u32 = 20;
pub const EDUCATION_WEIGHT: u32 = 10;
pub const LOCATION_WEIGHT: u32 = 15;
pub const INDUSTRY_WEIGHT: u32 = 15;

/// Engine label recorded alongside rule-sourced cache rows.
pub const RULE_ENGINE: &str = "rule-engine-v1";

const SKILL_HIT_STRENGTH: f64 = 1.0;
const TEXT_HIT_STRENGTH: f64 = 0.6;
const INDUSTRY_TEXT_STRENGTH: f64 = 0.5;

/// Location tokens that mean "anywhere".
const ANY_LOCATION: &[&str] = &["全国", "不限", "any", "remote", "远程"];

/// Scores a single candidate. Total and pure.
pub fn score(candidate: &CandidateFeatureIndex, criteria: &JobCriteria) -> MatchResult {
    let mut highlights = Vec::new();
    let mut concerns = Vec::new();

    let skills = score_skills(candidate, criteria, &mut highlights, &mut concerns);
    let experience = score_experience(candidate, criteria, &mut highlights, &mut concerns);
    let education = score_education(candidate, criteria, &mut highlights, &mut concerns);
    let location = score_location(candidate, criteria, &mut highlights, &mut concerns);
    let industry = score_industry(candidate, criteria, &mut highlights);
    check_salary(candidate, criteria, &mut concerns);

    let breakdown = ScoreBreakdown {
        skill_match: skills.points,
        experience_match: experience,
        education_match: education,
        location_match: location,
        industry_match: industry,
    };
    let score = breakdown.total().min(100);

    let summary = if criteria.keywords.is_empty() {
        format!("Rule score {score}/100.")
    } else {
        format!(
            "Rule score {score}/100: {}/{} keywords matched.",
            skills.matched,
            criteria.keywords.len()
        )
    };

    MatchResult {
        score,
        recommendation: Recommendation::from_score(score),
        highlights,
        concerns,
        summary,
        breakdown: Some(breakdown),
        score_source: ScoreSource::Rule,
    }
}

/// Vectorized form of [`score`]; candidates are scored independently.
pub fn score_batch(candidates: &[CandidateFeatureIndex], criteria: &JobCriteria) -> Vec<MatchResult> {
    candidates.iter().map(|c| score(c, criteria)).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Axes
// ────────────────────────────────────────────────────────────────────────────

struct SkillScore {
    points: u32,
    matched: usize,
}

fn score_skills(
    candidate: &CandidateFeatureIndex,
    criteria: &JobCriteria,
    highlights: &mut Vec<String>,
    concerns: &mut Vec<String>,
) -> SkillScore {
    if criteria.keywords.is_empty() {
        return SkillScore {
            points: SKILL_WEIGHT / 2,
            matched: 0,
        };
    }

    let skills: Vec<String> = candidate.skills.iter().map(|s| s.to_lowercase()).collect();
    let mut strength_sum = 0.0_f64;
    let mut hits = Vec::new();
    let mut misses = Vec::new();

    for keyword in &criteria.keywords {
        let kw = keyword.trim().to_lowercase();
        if kw.is_empty() {
            continue;
        }
        let strength = if skills.iter().any(|s| terms_overlap(s, &kw)) {
            SKILL_HIT_STRENGTH
        } else if candidate.full_text.contains(&kw) {
            TEXT_HIT_STRENGTH
        } else {
            0.0
        };
        if strength > 0.0 {
            hits.push(keyword.trim().to_string());
        } else {
            misses.push(keyword.trim().to_string());
        }
        strength_sum += strength;
    }

    let ratio = strength_sum / criteria.keywords.len() as f64;
    if !hits.is_empty() {
        highlights.push(format!("Matches keywords: {}", hits.join(", ")));
    }
    if !misses.is_empty() {
        concerns.push(format!("Missing keywords: {}", misses.join(", ")));
    }

    SkillScore {
        points: (ratio * SKILL_WEIGHT as f64).round() as u32,
        matched: hits.len(),
    }
}

fn score_experience(
    candidate: &CandidateFeatureIndex,
    criteria: &JobCriteria,
    highlights: &mut Vec<String>,
    concerns: &mut Vec<String>,
) -> u32 {
    let Some(years) = candidate.experience_years else {
        concerns.push("Work experience unknown".to_string());
        return match criteria.min_experience_years {
            Some(_) => 8,
            None => 10,
        };
    };

    match criteria.min_experience_years {
        Some(required) if required > 0 => {
            if years >= required {
                highlights.push(format!(
                    "{years} years of experience (requires {required}+)"
                ));
                EXPERIENCE_WEIGHT
            } else {
                concerns.push(format!(
                    "{years} years of experience, below the required {required}"
                ));
                EXPERIENCE_WEIGHT * years / required
            }
        }
        _ => {
            if years >= 3 {
                highlights.push(format!("{years} years of experience"));
                EXPERIENCE_WEIGHT
            } else if years >= 1 {
                15
            } else {
                10
            }
        }
    }
}

fn score_education(
    candidate: &CandidateFeatureIndex,
    criteria: &JobCriteria,
    highlights: &mut Vec<String>,
    concerns: &mut Vec<String>,
) -> u32 {
    let level = candidate.education.as_deref().and_then(EducationLevel::parse);

    match (level, criteria.min_education) {
        (None, Some(required)) => {
            concerns.push(format!(
                "Education unknown (requires {})",
                required.label()
            ));
            4
        }
        (None, None) => 6,
        (Some(_), None) => EDUCATION_WEIGHT,
        (Some(level), Some(required)) if level >= required => {
            highlights.push(format!("Education: {}", level.label()));
            EDUCATION_WEIGHT
        }
        (Some(level), Some(required)) => {
            concerns.push(format!(
                "Education {} below required {}",
                level.label(),
                required.label()
            ));
            if (required as u8) - (level as u8) == 1 {
                EDUCATION_WEIGHT / 2
            } else {
                0
            }
        }
    }
}

fn score_location(
    candidate: &CandidateFeatureIndex,
    criteria: &JobCriteria,
    highlights: &mut Vec<String>,
    concerns: &mut Vec<String>,
) -> u32 {
    let targets: Vec<String> = criteria
        .locations
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    if targets.is_empty() {
        return 10;
    }
    if targets.iter().any(|t| ANY_LOCATION.contains(&t.as_str())) {
        return LOCATION_WEIGHT;
    }

    let Some(city) = candidate.city.as_deref() else {
        concerns.push("Location unknown".to_string());
        return 5;
    };
    let city_lower = city.trim().to_lowercase();

    if targets.iter().any(|t| terms_overlap(&city_lower, t)) {
        highlights.push(format!("Located in {city}"));
        LOCATION_WEIGHT
    } else {
        concerns.push(format!(
            "Located in {city}, outside {}",
            criteria.locations.join("/")
        ));
        0
    }
}

fn score_industry(
    candidate: &CandidateFeatureIndex,
    criteria: &JobCriteria,
    highlights: &mut Vec<String>,
) -> u32 {
    let source = if criteria.industries.is_empty() {
        &criteria.keywords
    } else {
        &criteria.industries
    };
    let terms: Vec<String> = source
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    if terms.is_empty() {
        return 8;
    }

    let tagged = candidate
        .industries
        .iter()
        .chain(candidate.companies.iter())
        .map(|t| t.to_lowercase())
        .find(|tag| terms.iter().any(|term| tag.contains(term.as_str())));

    if let Some(tag) = tagged {
        highlights.push(format!("Relevant industry background: {tag}"));
        return INDUSTRY_WEIGHT;
    }

    if terms.iter().any(|term| candidate.full_text.contains(term.as_str())) {
        return (INDUSTRY_WEIGHT as f64 * INDUSTRY_TEXT_STRENGTH).round() as u32;
    }

    0
}

fn check_salary(candidate: &CandidateFeatureIndex, criteria: &JobCriteria, concerns: &mut Vec<String>) {
    let (Some(cap), Some(expected_min)) = (
        criteria.max_salary,
        candidate.salary.and_then(|s| s.min),
    ) else {
        return;
    };
    if expected_min > cap {
        concerns.push(format!(
            "Expected salary {expected_min} exceeds budget {cap}"
        ));
    }
}

/// Substring overlap in either direction, ignoring single-character fragments.
fn terms_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(b) {
        return true;
    }
    a.chars().count() >= 2 && b.contains(a)
}
