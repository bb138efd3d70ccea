//! Parsing and repair of LLM match replies.
//!
//! Fallthrough order: strip code fences → take the outermost `{...}` span →
//! strict JSON → lenient JSON (trailing commas, smart quotes, bare keys) →
//! rewrite a worded `"score"` value ("seventy-three" → 73) and parse again.
//! Anything still unusable is `Unparseable`, carrying the raw reply.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::matching::models::{
    clamp_score, MatchResult, Recommendation, ScoreBreakdown, ScoreSource,
};

/// Max characters of a raw reply kept for diagnostics.
pub const RAW_SNIPPET_LIMIT: usize = 240;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(MatchResult),
    RepairAttempted(MatchResult),
    Unparseable(String),
}

pub fn parse_match_reply(raw: &str) -> ParseOutcome {
    let body = extract_json_block(raw);
    if body.is_empty() {
        return ParseOutcome::Unparseable(raw.to_string());
    }

    if let Some(result) = try_parse(body) {
        return ParseOutcome::Parsed(result);
    }

    let lenient = lenient_json(body);
    if let Some(result) = try_parse(&lenient) {
        return ParseOutcome::Parsed(result);
    }

    if let Some(repaired) = repair_score_field(&lenient) {
        if let Some(result) = try_parse(&repaired) {
            return ParseOutcome::RepairAttempted(result);
        }
    }

    ParseOutcome::Unparseable(raw.to_string())
}

fn try_parse(text: &str) -> Option<MatchResult> {
    let value: Value = serde_json::from_str(text).ok()?;
    result_from_value(&value)
}

/// Builds a `MatchResult` from a parsed reply. Requires an object with a numeric
/// (or numeric-string) `score`; every other field is optional.
pub fn result_from_value(value: &Value) -> Option<MatchResult> {
    let object = value.as_object()?;
    let raw_score = match object.get("score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())?,
        _ => return None,
    };
    let score = clamp_score(raw_score);

    let recommendation = object
        .get("recommendation")
        .and_then(Value::as_str)
        .and_then(Recommendation::parse_label)
        .unwrap_or_else(|| Recommendation::from_score(score));

    let breakdown = object
        .get("breakdown")
        .filter(|b| b.is_object())
        .and_then(|b| serde_json::from_value::<ScoreBreakdown>(b.clone()).ok());

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(MatchResult {
        score,
        recommendation,
        highlights: string_list(object.get("highlights")),
        concerns: string_list(object.get("concerns")),
        summary,
        breakdown,
        score_source: ScoreSource::Ai,
    })
}

/// Accepts an array of strings, or a single string, and drops blanks.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extraction
// ────────────────────────────────────────────────────────────────────────────

/// Strips Markdown code fences (anywhere in the reply) and returns the outermost
/// `{...}` span, or the trimmed text when no braces are present.
pub fn extract_json_block(raw: &str) -> &str {
    let text = raw.trim().trim_start_matches('\u{feff}');
    let unfenced = strip_code_fence(text);

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        _ => unfenced.trim(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lenient pass
// ────────────────────────────────────────────────────────────────────────────

const LEFT_DOUBLE_QUOTE: char = '\u{201c}';
const RIGHT_DOUBLE_QUOTE: char = '\u{201d}';

/// Fixes the malformations models produce most often: trailing commas, bare
/// keys, and curly quotes used as string delimiters.
///
/// Only text outside string literals is rewritten. Inside a literal (`\`
/// escapes honoured) every character is kept, so "note: x" or “数控” in a
/// summary survive untouched.
pub fn lenient_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    // Inside a literal: whether it was opened by a curly quote.
    let mut literal: Option<bool> = None;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(curly) = literal {
            if escaped {
                escaped = false;
                out.push(c);
            } else if c == '\\' {
                escaped = true;
                out.push(c);
            } else if (!curly && c == '"')
                || (curly && (c == LEFT_DOUBLE_QUOTE || c == RIGHT_DOUBLE_QUOTE))
            {
                literal = None;
                out.push('"');
                last_significant = Some('"');
            } else if curly && c == '"' {
                out.push_str("\\\"");
            } else {
                out.push(c);
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                literal = Some(false);
                out.push('"');
            }
            LEFT_DOUBLE_QUOTE | RIGHT_DOUBLE_QUOTE => {
                literal = Some(true);
                out.push('"');
            }
            ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => {
                i += 1;
                continue;
            }
            c if (c.is_ascii_alphabetic() || c == '_')
                && matches!(last_significant, Some('{' | ',')) =>
            {
                let end = chars[i..]
                    .iter()
                    .position(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
                    .map_or(chars.len(), |offset| i + offset);
                let ident: String = chars[i..end].iter().collect();
                if next_significant(&chars, end) == Some(':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                last_significant = chars.get(end - 1).copied();
                i = end;
                continue;
            }
            _ => out.push(c),
        }

        if !c.is_whitespace() {
            last_significant = Some(c);
        }
        i += 1;
    }

    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars.get(from..)?.iter().copied().find(|c| !c.is_whitespace())
}

// ────────────────────────────────────────────────────────────────────────────
// Score-word repair
// ────────────────────────────────────────────────────────────────────────────

fn score_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"("score"\s*:\s*)([^,}\n]*)"#).expect("valid regex")
    })
}

/// Rewrites the `"score"` value to a plain integer when the model wrote a word
/// or phrase. Returns `None` when there is no score field or no number in it.
pub fn repair_score_field(text: &str) -> Option<String> {
    let captures = score_field_re().captures(text)?;
    let whole = captures.get(0)?;
    let prefix = captures.get(1)?.as_str();
    let value = captures.get(2)?.as_str();

    let number = parse_score_words(value)?;
    let mut repaired = String::with_capacity(text.len());
    repaired.push_str(&text[..whole.start()]);
    repaired.push_str(prefix);
    repaired.push_str(&number.to_string());
    repaired.push_str(&text[whole.end()..]);
    Some(repaired)
}

const UNITS: &[(&str, u32)] = &[
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
];

const TENS: &[(&str, u32)] = &[
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

/// Parses a loosely quoted score value: digits ("85", "85/100", "85 points") or
/// English number words ("seventy-three", "Ninety five.", "one hundred").
pub fn parse_score_words(value: &str) -> Option<u32> {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { ' ' })
        .collect();

    if let Some(digits) = cleaned
        .split_whitespace()
        .map(|token| token.trim_matches('.'))
        .filter(|token| token.bytes().any(|b| b.is_ascii_digit()))
        .find_map(|token| token.parse::<f64>().ok().filter(|n| n.is_finite()))
    {
        return Some(clamp_score(digits));
    }

    let mut total: Option<u32> = None;
    for token in cleaned.split_whitespace().map(|t| t.trim_matches('.')) {
        if token == "and" || token == "a" || token.is_empty() {
            continue;
        }
        if token == "hundred" {
            total = Some(total.unwrap_or(1).max(1) * 100);
            continue;
        }
        if let Some((_, n)) = TENS.iter().chain(UNITS.iter()).find(|(w, _)| *w == token) {
            total = Some(total.unwrap_or(0) + n);
            continue;
        }
        // Stop at the first non-number word ("seventy three points").
        if total.is_some() {
            break;
        }
    }

    total.map(|n| n.min(100))
}

/// Collapses whitespace and caps the length, for diagnostics and concerns.
pub fn compact_text(text: &str, limit: usize) -> String {
    let compacted = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compacted.chars().count() <= limit {
        return compacted;
    }
    let mut truncated: String = compacted.chars().take(limit).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(outcome: ParseOutcome) -> MatchResult {
        match outcome {
            ParseOutcome::Parsed(r) | ParseOutcome::RepairAttempted(r) => r,
            ParseOutcome::Unparseable(raw) => panic!("unparseable: {raw}"),
        }
    }

    #[test]
    fn test_plain_json_parses() {
        let raw = r#"{"score": 82, "recommendation": "match", "highlights": ["车床"], "concerns": [], "summary": "Good fit"}"#;
        let outcome = parse_match_reply(raw);
        assert!(matches!(outcome, ParseOutcome::Parsed(_)));
        let result = parsed(outcome);
        assert_eq!(result.score, 82);
        assert_eq!(result.recommendation, Recommendation::Match);
        assert_eq!(result.highlights, vec!["车床".to_string()]);
        assert_eq!(result.score_source, ScoreSource::Ai);
    }

    #[test]
    fn test_fenced_json_with_preamble() {
        let raw = "Here is my assessment:\n```json\n{\"score\": 64, \"summary\": \"ok\"}\n```\nThanks";
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 64);
        assert_eq!(result.recommendation, Recommendation::Potential);
    }

    #[test]
    fn test_outermost_braces_without_fence() {
        let raw = "Result -> {\"score\": 91, \"breakdown\": {\"skillMatch\": 38}} <- end";
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 91);
        assert_eq!(result.breakdown.unwrap().skill_match, 38);
    }

    #[test]
    fn test_trailing_commas_and_bare_keys_parse_leniently() {
        let raw = "{score: 55, highlights: [\"a\", \"b\",], summary: \"fine\",}";
        let outcome = parse_match_reply(raw);
        assert!(matches!(outcome, ParseOutcome::Parsed(_)));
        assert_eq!(parsed(outcome).score, 55);
    }

    #[test]
    fn test_trailing_comma_keeps_key_like_text_in_strings() {
        let raw = r#"{"score": 82, "summary": "Strong fit, note: relocation needed",}"#;
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 82);
        assert_eq!(result.summary, "Strong fit, note: relocation needed");
    }

    #[test]
    fn test_trailing_comma_keeps_curly_quotes_in_strings() {
        let raw = "{\"score\": 82, \"summary\": \"具备“数控”经验\",}";
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 82);
        assert_eq!(result.summary, "具备“数控”经验");
    }

    #[test]
    fn test_lenient_pass_leaves_rich_strings_alone() {
        let raw = "{\"score\": 71, \"highlights\": [\"Skills: 车床, 铣床\", \"a,}b\",], \"concerns\": [\"说 \\\"ok\\\", then: more\"], \"summary\": \"[x], y: z\",}";
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 71);
        assert_eq!(result.highlights, vec!["Skills: 车床, 铣床", "a,}b"]);
        assert_eq!(result.concerns, vec!["说 \"ok\", then: more"]);
        assert_eq!(result.summary, "[x], y: z");
    }

    #[test]
    fn test_curly_quotes_as_delimiters_are_normalized() {
        let raw = "{“score”: 66, “summary”: “fits, mostly”}";
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 66);
        assert_eq!(result.summary, "fits, mostly");
    }

    #[test]
    fn test_lenient_json_only_rewrites_outside_literals() {
        assert_eq!(
            lenient_json(r#"{a: "b, c: d", e: [true, null,],}"#),
            r#"{"a": "b, c: d", "e": [true, null]}"#
        );
    }

    #[test]
    fn test_non_finite_scores_are_unparseable() {
        assert!(matches!(
            parse_match_reply(r#"{"score": "Infinity", "summary": "x"}"#),
            ParseOutcome::Unparseable(_)
        ));
        assert!(matches!(
            parse_match_reply(r#"{"score": "NaN"}"#),
            ParseOutcome::Unparseable(_)
        ));
    }

    #[test]
    fn test_worded_score_is_repaired() {
        let raw = r#"{"score": "seventy-three", "recommendation": "match", "summary": "solid"}"#;
        let outcome = parse_match_reply(raw);
        assert!(matches!(outcome, ParseOutcome::RepairAttempted(_)));
        assert_eq!(parsed(outcome).score, 73);
    }

    #[test]
    fn test_unquoted_worded_score_is_repaired() {
        let raw = "{\"score\": Ninety five., \"summary\": \"great\"}";
        assert_eq!(parsed(parse_match_reply(raw)).score, 95);
    }

    #[test]
    fn test_numeric_string_score_is_accepted() {
        let raw = r#"{"score": "88", "recommendation": "bogus"}"#;
        let result = parsed(parse_match_reply(raw));
        assert_eq!(result.score, 88);
        // invalid label falls back to the score band
        assert_eq!(result.recommendation, Recommendation::Match);
    }

    #[test]
    fn test_score_is_clamped() {
        let result = parsed(parse_match_reply(r#"{"score": 140}"#));
        assert_eq!(result.score, 100);
        let result = parsed(parse_match_reply(r#"{"score": -12}"#));
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_garbage_is_unparseable() {
        let raw = "I cannot evaluate this candidate.";
        assert_eq!(
            parse_match_reply(raw),
            ParseOutcome::Unparseable(raw.to_string())
        );
    }

    #[test]
    fn test_missing_score_is_unparseable() {
        let outcome = parse_match_reply(r#"{"summary": "no score here"}"#);
        assert!(matches!(outcome, ParseOutcome::Unparseable(_)));
    }

    #[test]
    fn test_parse_score_words() {
        assert_eq!(parse_score_words("\"seventy-three\""), Some(73));
        assert_eq!(parse_score_words("'ninety'"), Some(90));
        assert_eq!(parse_score_words("one hundred"), Some(100));
        assert_eq!(parse_score_words("hundred"), Some(100));
        assert_eq!(parse_score_words("zero"), Some(0));
        assert_eq!(parse_score_words("sixty two points"), Some(62));
        assert_eq!(parse_score_words("\"85/100\""), Some(85));
        assert_eq!(parse_score_words("high"), None);
        assert_eq!(parse_score_words("Infinity"), None);
        assert_eq!(parse_score_words("nan"), None);
        assert_eq!(parse_score_words("inf"), None);
    }

    #[test]
    fn test_compact_text_caps_length() {
        let compacted = compact_text("a   b\n\n c", 10);
        assert_eq!(compacted, "a b c");
        let long = "x".repeat(300);
        let capped = compact_text(&long, RAW_SNIPPET_LIMIT);
        assert_eq!(capped.chars().count(), RAW_SNIPPET_LIMIT + 1);
    }
}
