use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::feature::prd::body_hash;
use crate::oracle::{Oracle, OraclePhase};
use crate::prompts::PromptEngine;

#[derive(Debug, Clone)]
pub struct DriftReport {
    pub drifted: bool,
    pub diff_summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftClassification {
    pub significant: bool,
    pub affected_units: Vec<String>,
    pub recommendation: String,
}

/// Holds a baseline copy of the PRD body and its SHA-256 hash. Consults the
/// LLM oracle only when the hash has changed.
pub struct DriftDetector {
    prd_id: String,
    baseline_body: String,
    baseline_hash: String,
}

impl DriftDetector {
    pub fn new(prd_id: String, baseline_body: String) -> Self {
        let baseline_hash = body_hash(&baseline_body);
        Self {
            prd_id,
            baseline_body,
            baseline_hash,
        }
    }

    pub fn baseline_hash(&self) -> &str {
        &self.baseline_hash
    }

    /// Recompute the current hash; if it equals the baseline, report no
    /// drift with no oracle call.
    pub fn check_drift(&self, current_body: &str) -> DriftReport {
        let current_hash = body_hash(current_body);
        if current_hash == self.baseline_hash {
            return DriftReport {
                drifted: false,
                diff_summary: String::new(),
            };
        }
        DriftReport {
            drifted: true,
            diff_summary: diff_summary(&self.baseline_body, current_body),
        }
    }

    /// Consult the oracle to classify a detected drift, given the list of
    /// units currently `in_progress`.
    pub async fn classify(
        &self,
        oracle: &dyn Oracle,
        current_body: &str,
        diff_summary: &str,
        in_progress_units: &[String],
        working_dir: &Path,
    ) -> Result<DriftClassification> {
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), self.prd_id.clone());
        vars.insert("old_body".to_string(), self.baseline_body.clone());
        vars.insert("new_body".to_string(), current_body.to_string());
        vars.insert("diff_summary".to_string(), diff_summary.to_string());
        vars.insert("in_progress_units".to_string(), in_progress_units.join(", "));
        let prompt = engine.render("drift_classify", &vars)?;

        let raw = oracle.invoke(OraclePhase::DriftClassify, &prompt, working_dir).await?;
        let json = crate::feature::review::extract_json(&raw)?;
        let classification: DriftClassification =
            serde_json::from_str(&json).map_err(|e| crate::error::Error::MalformedReview(e.to_string()))?;
        Ok(classification)
    }

    /// Promote `current_body` to the new baseline.
    pub fn update_baseline(&mut self, current_body: String) {
        self.baseline_hash = body_hash(&current_body);
        self.baseline_body = current_body;
    }
}

fn diff_summary(old: &str, new: &str) -> String {
    if new.len() == old.len() {
        return "Content modified (same length)".to_string();
    }
    let line_delta = new.lines().count() as i64 - old.lines().count() as i64;
    let char_delta = new.len() as i64 - old.len() as i64;
    if char_delta > 0 {
        format!("+{line_delta} lines, +{char_delta} chars")
    } else {
        format!("{line_delta} lines, {char_delta} chars")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_drift_when_body_unchanged() {
        let detector = DriftDetector::new("feat-1".to_string(), "hello world".to_string());
        let report = detector.check_drift("hello world");
        assert!(!report.drifted);
    }

    #[test]
    fn drift_detected_on_any_byte_change() {
        let detector = DriftDetector::new("feat-1".to_string(), "hello world".to_string());
        let report = detector.check_drift("hello world!");
        assert!(report.drifted);
        assert!(report.diff_summary.contains("chars"));
    }

    #[test]
    fn diff_summary_reports_same_length_modification() {
        let detector = DriftDetector::new("feat-1".to_string(), "hello".to_string());
        let report = detector.check_drift("jello");
        assert!(report.drifted);
        assert_eq!(report.diff_summary, "Content modified (same length)");
    }

    #[test]
    fn update_baseline_clears_future_drift_against_new_body() {
        let mut detector = DriftDetector::new("feat-1".to_string(), "v1".to_string());
        assert!(detector.check_drift("v2").drifted);
        detector.update_baseline("v2".to_string());
        assert!(!detector.check_drift("v2").drifted);
    }
}
