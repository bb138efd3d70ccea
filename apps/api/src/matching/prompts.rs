// LLM prompt constants for the AI match scorer.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};
use crate::matching::models::{CandidateFeatureIndex, JobCriteria};

/// Upper bound on requirement/responsibility text forwarded to the model.
const SECTION_CHAR_LIMIT: usize = 1500;

/// System prompt for candidate scoring — recruiter persona + JSON-only output.
pub fn match_system_prompt() -> String {
    format!(
        "You are an experienced technical recruiter who evaluates how well a candidate \
         fits a job opening. {JSON_ONLY_SYSTEM} {GROUNDING_INSTRUCTION}"
    )
}

/// Match prompt template. `{job}` and `{candidate}` are replaced before sending.
pub const MATCH_PROMPT_TEMPLATE: &str = r#"Evaluate the candidate against the job below.

## Job
{job}

## Candidate
{candidate}

Return a JSON object with this EXACT schema:
{
  "score": 0-100 integer,
  "recommendation": "strong_match" | "match" | "potential" | "no_match",
  "highlights": ["short strength statements"],
  "concerns": ["short gap statements"],
  "summary": "one or two sentences",
  "breakdown": {
    "skillMatch": 0-40,
    "experienceMatch": 0-20,
    "educationMatch": 0-10,
    "locationMatch": 0-15,
    "industryMatch": 0-15
  }
}

Scoring guidance:
- 90-100 strong_match: meets every hard requirement with directly relevant experience
- 70-89 match: meets most requirements, minor gaps
- 50-69 potential: transferable background, notable gaps
- 0-49 no_match: core requirements missing
The score MUST be a number written with digits."#;

pub fn build_match_prompt(candidate: &CandidateFeatureIndex, criteria: &JobCriteria) -> String {
    MATCH_PROMPT_TEMPLATE
        .replace("{job}", &describe_job(criteria))
        .replace("{candidate}", &describe_candidate(candidate))
}

fn describe_job(criteria: &JobCriteria) -> String {
    let mut lines = Vec::new();
    if !criteria.title.is_empty() {
        lines.push(format!("Title: {}", criteria.title));
    }
    if !criteria.keywords.is_empty() {
        lines.push(format!("Keywords: {}", criteria.keywords.join(", ")));
    }
    if !criteria.locations.is_empty() {
        lines.push(format!("Locations: {}", criteria.locations.join(", ")));
    }
    if !criteria.industries.is_empty() {
        lines.push(format!("Industries: {}", criteria.industries.join(", ")));
    }
    if let Some(years) = criteria.min_experience_years {
        lines.push(format!("Minimum experience: {years} years"));
    }
    if let Some(level) = criteria.min_education {
        lines.push(format!("Minimum education: {}", level.label()));
    }
    if let Some(priority) = &criteria.priority {
        lines.push(format!("Hiring priority: {priority}"));
    }
    if !criteria.requirements.trim().is_empty() {
        lines.push(format!(
            "Requirements:\n{}",
            truncate_chars(criteria.requirements.trim(), SECTION_CHAR_LIMIT)
        ));
    }
    if !criteria.responsibilities.trim().is_empty() {
        lines.push(format!(
            "Responsibilities:\n{}",
            truncate_chars(criteria.responsibilities.trim(), SECTION_CHAR_LIMIT)
        ));
    }
    lines.join("\n")
}

fn describe_candidate(candidate: &CandidateFeatureIndex) -> String {
    let unknown = "unknown".to_string();
    let mut lines = vec![
        format!("Resume ID: {}", candidate.resume_id),
        format!("City: {}", candidate.city.as_ref().unwrap_or(&unknown)),
        format!(
            "Experience: {}",
            candidate
                .experience_years
                .map(|y| format!("{y} years"))
                .unwrap_or_else(|| unknown.clone())
        ),
        format!(
            "Education: {}",
            candidate.education.as_ref().unwrap_or(&unknown)
        ),
    ];
    if !candidate.skills.is_empty() {
        lines.push(format!("Skills: {}", candidate.skills.join(", ")));
    }
    if !candidate.companies.is_empty() {
        lines.push(format!("Companies: {}", candidate.companies.join(", ")));
    }
    if !candidate.industries.is_empty() {
        lines.push(format!("Industries: {}", candidate.industries.join(", ")));
    }
    if let Some(salary) = candidate.salary {
        match (salary.min, salary.max) {
            (Some(min), Some(max)) => lines.push(format!("Expected salary: {min}-{max}")),
            (Some(min), None) => lines.push(format!("Expected salary: from {min}")),
            (None, Some(max)) => lines.push(format!("Expected salary: up to {max}")),
            (None, None) => {}
        }
    }
    lines.join("\n")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> JobCriteria {
        JobCriteria {
            id: "jd-1".to_string(),
            title: "数控车床销售".to_string(),
            keywords: vec!["车床".to_string(), "销售".to_string()],
            locations: vec!["东莞".to_string()],
            industries: vec![],
            min_experience_years: Some(3),
            min_education: None,
            max_salary: None,
            priority: Some("high".to_string()),
            requirements: "3年以上机床销售经验".to_string(),
            responsibilities: String::new(),
            is_virtual: false,
        }
    }

    fn candidate() -> CandidateFeatureIndex {
        CandidateFeatureIndex {
            resume_id: "r-1".to_string(),
            name: None,
            experience_years: Some(5),
            education: None,
            city: Some("东莞".to_string()),
            skills: vec!["车床".to_string()],
            companies: vec![],
            industries: vec![],
            salary: None,
            full_text: String::new(),
        }
    }

    #[test]
    fn test_prompt_contains_job_and_candidate_facts() {
        let prompt = build_match_prompt(&candidate(), &criteria());
        assert!(prompt.contains("Title: 数控车床销售"));
        assert!(prompt.contains("Minimum experience: 3 years"));
        assert!(prompt.contains("Hiring priority: high"));
        assert!(prompt.contains("Resume ID: r-1"));
        assert!(prompt.contains("Education: unknown"));
        assert!(!prompt.contains("{job}"));
        assert!(!prompt.contains("{candidate}"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let prompt = build_match_prompt(&candidate(), &criteria());
        assert!(!prompt.contains("Responsibilities:"));
        assert!(!prompt.contains("Companies:"));
    }

    #[test]
    fn test_system_prompt_demands_json() {
        assert!(match_system_prompt().contains("valid JSON only"));
    }
}
