use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const CRITERIA: [&str; 4] = ["completeness", "consistency", "testability", "architecture"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    NeedsRevision,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackItem {
    pub section: String,
    pub issue: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewResult {
    pub verdict: Verdict,
    pub score: std::collections::BTreeMap<String, i64>,
    #[serde(default)]
    pub feedback: Vec<FeedbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationHistory {
    pub iteration: u32,
    pub result: ReviewResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewSession {
    pub feature_id: String,
    pub iterations: Vec<IterationHistory>,
    pub final_verdict: Option<Verdict>,
    pub block_reason: Option<String>,
}

/// Implements the markdown-wrapped JSON extraction algorithm: (a) trim;
/// (b) if it starts with `{`, return as-is; (c) a fenced ```` ```json ````
/// block; (d) a plain ```` ``` ```` fenced block; (e) else scan for the
/// first `{` and its matching `}` by brace depth. The caller MUST still
/// validate the result against the schema afterwards.
pub fn extract_json(raw: &str) -> Result<String> {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    if let Some(extracted) = extract_fenced(trimmed, "```json") {
        return Ok(extracted);
    }
    if let Some(extracted) = extract_fenced(trimmed, "```") {
        return Ok(extracted);
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = matching_brace(&trimmed[start..]) {
            return Ok(trimmed[start..start + end + 1].to_string());
        }
    }

    Err(Error::MalformedReview(
        "no JSON object found in review output".to_string(),
    ))
}

fn extract_fenced(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a raw JSON object against the review schema: `verdict` is a
/// closed sum type, every criterion in `CRITERIA` has an integer `0..=100`
/// score (a missing key is a schema error, not a default), and when
/// `verdict == needs_revision`, `feedback` is non-empty with every entry
/// having non-empty `section`/`issue`/`suggestion`.
pub fn validate_schema(json: &str) -> Result<ReviewResult> {
    let value: Value = serde_json::from_str(json).map_err(|e| Error::MalformedReview(e.to_string()))?;

    let verdict_raw = value
        .get("verdict")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Schema {
            field: "verdict".to_string(),
            message: "missing or not a string".to_string(),
        })?;
    let verdict = match verdict_raw {
        "pass" => Verdict::Pass,
        "needs_revision" => Verdict::NeedsRevision,
        other => {
            return Err(Error::Schema {
                field: "verdict".to_string(),
                message: format!("unknown verdict `{other}`"),
            });
        }
    };

    let score_obj = value.get("score").and_then(Value::as_object).ok_or_else(|| Error::Schema {
        field: "score".to_string(),
        message: "missing or not an object".to_string(),
    })?;
    let mut score = std::collections::BTreeMap::new();
    for criterion in CRITERIA {
        let value = score_obj
            .get(criterion)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Schema {
                field: format!("score.{criterion}"),
                message: "missing or not an integer".to_string(),
            })?;
        if !(0..=100).contains(&value) {
            return Err(Error::Schema {
                field: format!("score.{criterion}"),
                message: "must be in 0..=100".to_string(),
            });
        }
        score.insert(criterion.to_string(), value);
    }

    let feedback_raw = value.get("feedback").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut feedback = Vec::with_capacity(feedback_raw.len());
    for item in &feedback_raw {
        let section = non_empty_field(item, "section")?;
        let issue = non_empty_field(item, "issue")?;
        let suggestion = non_empty_field(item, "suggestion")?;
        feedback.push(FeedbackItem { section, issue, suggestion });
    }

    if verdict == Verdict::NeedsRevision && feedback.is_empty() {
        return Err(Error::Schema {
            field: "feedback".to_string(),
            message: "must be non-empty when verdict is needs_revision".to_string(),
        });
    }

    Ok(ReviewResult { verdict, score, feedback })
}

fn non_empty_field(item: &Value, field: &str) -> Result<String> {
    let value = item.get(field).and_then(Value::as_str).unwrap_or("");
    if value.is_empty() {
        return Err(Error::Schema {
            field: format!("feedback.{field}"),
            message: "must be non-empty".to_string(),
        });
    }
    Ok(value.to_string())
}

/// Parse and validate a raw oracle response in one step.
pub fn parse_review_response(raw: &str) -> Result<ReviewResult> {
    let json = extract_json(raw)?;
    validate_schema(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS_JSON: &str = r#"{"verdict":"pass","score":{"completeness":90,"consistency":85,"testability":80,"architecture":95},"feedback":[]}"#;

    #[test]
    fn extract_json_passes_through_raw_object() {
        assert_eq!(extract_json(PASS_JSON).unwrap(), PASS_JSON);
    }

    #[test]
    fn extract_json_strips_json_fence() {
        let wrapped = format!("Here is my review:\n```json\n{PASS_JSON}\n```\n");
        assert_eq!(extract_json(&wrapped).unwrap(), PASS_JSON);
    }

    #[test]
    fn extract_json_strips_plain_fence() {
        let wrapped = format!("```\n{PASS_JSON}\n```");
        assert_eq!(extract_json(&wrapped).unwrap(), PASS_JSON);
    }

    #[test]
    fn extract_json_scans_for_first_balanced_braces_with_prose_around_it() {
        let wrapped = format!("Sure, here you go: {PASS_JSON} Hope that helps!");
        assert_eq!(extract_json(&wrapped).unwrap(), PASS_JSON);
    }

    #[test]
    fn extract_json_handles_braces_inside_string_values() {
        let raw = r#"{"verdict":"pass","score":{"completeness":90,"consistency":85,"testability":80,"architecture":95},"feedback":[{"section":"a { b }","issue":"x","suggestion":"y"}]}"#;
        assert_eq!(extract_json(raw).unwrap(), raw);
    }

    #[test]
    fn extract_json_fails_on_plain_prose() {
        let err = extract_json("This is not valid JSON").unwrap_err();
        assert!(matches!(err, Error::MalformedReview(_)));
    }

    #[test]
    fn schema_round_trips_a_pass_result() {
        let result = validate_schema(PASS_JSON).unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.score["completeness"], 90);
        assert!(result.feedback.is_empty());
    }

    #[test]
    fn schema_requires_feedback_on_needs_revision() {
        let json = r#"{"verdict":"needs_revision","score":{"completeness":10,"consistency":10,"testability":10,"architecture":10},"feedback":[]}"#;
        let err = validate_schema(json).unwrap_err();
        assert!(matches!(err, Error::Schema { field, .. } if field == "feedback"));
    }

    #[test]
    fn schema_rejects_missing_criterion() {
        let json = r#"{"verdict":"pass","score":{"completeness":90,"consistency":85,"testability":80},"feedback":[]}"#;
        let err = validate_schema(json).unwrap_err();
        assert!(matches!(err, Error::Schema { field, .. } if field == "score.architecture"));
    }

    #[test]
    fn schema_rejects_out_of_range_score() {
        let json = r#"{"verdict":"pass","score":{"completeness":190,"consistency":85,"testability":80,"architecture":95},"feedback":[]}"#;
        let err = validate_schema(json).unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn schema_rejects_unknown_verdict() {
        let json = r#"{"verdict":"maybe","score":{},"feedback":[]}"#;
        let err = validate_schema(json).unwrap_err();
        assert!(matches!(err, Error::Schema { field, .. } if field == "verdict"));
    }

    #[test]
    fn parse_review_response_handles_fenced_needs_revision() {
        let json = r#"{"verdict":"needs_revision","score":{"completeness":10,"consistency":10,"testability":10,"architecture":10},"feedback":[{"section":"s","issue":"i","suggestion":"sg"}]}"#;
        let wrapped = format!("```json\n{json}\n```");
        let result = parse_review_response(&wrapped).unwrap();
        assert_eq!(result.verdict, Verdict::NeedsRevision);
        assert_eq!(result.feedback.len(), 1);
    }
}
