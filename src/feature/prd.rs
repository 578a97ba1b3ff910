use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::feature::state::FeatureStatus;

/// Frontmatter fields persisted for a PRD. Orchestrator-owned runtime
/// fields are all optional so a hand-authored PRD with no runtime history
/// still parses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrdFrontmatter {
    pub prd_id: String,
    pub title: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_status: Option<FeatureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_review_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_spec_review: Option<String>,
}

static PRD_ID_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

fn prd_id_pattern() -> &'static regex::Regex {
    PRD_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").unwrap())
}

impl PrdFrontmatter {
    pub fn validate(&self) -> Result<()> {
        if self.prd_id.len() < 2 || self.prd_id.len() > 50 {
            return Err(Error::Validation {
                field: "prd_id".to_string(),
                message: "must be 2-50 characters".to_string(),
            });
        }
        if !prd_id_pattern().is_match(&self.prd_id) {
            return Err(Error::Validation {
                field: "prd_id".to_string(),
                message: "must match ^[a-z0-9][a-z0-9-]*[a-z0-9]$".to_string(),
            });
        }
        if self.title.trim().is_empty() {
            return Err(Error::Validation {
                field: "title".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        const VALID_STATUSES: &[&str] = &["draft", "approved", "in_progress", "complete", "archived"];
        if !VALID_STATUSES.contains(&self.status.as_str()) {
            return Err(Error::Validation {
                field: "status".to_string(),
                message: format!("must be one of {VALID_STATUSES:?}"),
            });
        }
        Ok(())
    }
}

/// A parsed PRD: frontmatter, body, and derived fields. `body_hash` is a
/// pure function of `body`, recomputed on every parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Prd {
    pub path: PathBuf,
    pub frontmatter: PrdFrontmatter,
    pub body: String,
    pub body_hash: String,
}

pub fn body_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a PRD file's raw content. Content MUST begin with `---\n`;
/// frontmatter ends at the first subsequent `\n---\n` (or `\n---` at EOF
/// with no trailing newline). Body is everything after the closing
/// delimiter's trailing newline, or empty.
pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Prd> {
    let path = path.into();
    let rest = content.strip_prefix("---\n").ok_or_else(|| Error::Validation {
        field: "frontmatter".to_string(),
        message: "content must begin with '---\\n'".to_string(),
    })?;

    let (frontmatter_raw, body) = if let Some(idx) = rest.find("\n---\n") {
        (&rest[..idx], &rest[idx + "\n---\n".len()..])
    } else if let Some(stripped) = rest.strip_suffix("\n---") {
        (stripped, "")
    } else {
        return Err(Error::Validation {
            field: "frontmatter".to_string(),
            message: "missing closing '---' delimiter".to_string(),
        });
    };

    let frontmatter: PrdFrontmatter = serde_yaml::from_str(frontmatter_raw)?;
    frontmatter.validate()?;

    let body = body.to_string();
    let hash = body_hash(&body);

    Ok(Prd {
        path,
        frontmatter,
        body,
        body_hash: hash,
    })
}

/// Read and parse a PRD from disk.
pub fn read(path: impl AsRef<Path>) -> Result<Prd> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    parse(path.to_path_buf(), &content)
}

/// Serialize `frontmatter` + the original `body` bytes back to PRD file
/// content. Concatenates `---\n` + serialized YAML + `---\n` + the body
/// bytes unchanged, so `parse(write(prd)).body == prd.body` always holds.
pub fn write(frontmatter: &PrdFrontmatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Rewrite a PRD file in place, preserving the body byte-for-byte.
pub fn rewrite(path: impl AsRef<Path>, frontmatter: &PrdFrontmatter, body: &str) -> Result<()> {
    let content = write(frontmatter, body)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: &str) -> String {
        format!("---\nprd_id: feat-1\ntitle: Feature One\nstatus: {status}\n---\nSome body text.\n")
    }

    #[test]
    fn parses_minimal_valid_prd() {
        let prd = parse("feat-1.md", &sample("draft")).unwrap();
        assert_eq!(prd.frontmatter.prd_id, "feat-1");
        assert_eq!(prd.body, "Some body text.\n");
    }

    #[test]
    fn body_hash_is_pure_function_of_body() {
        let a = parse("a.md", &sample("draft")).unwrap();
        let b = parse("b.md", &sample("draft")).unwrap();
        assert_eq!(a.body_hash, b.body_hash);
        assert_eq!(a.body_hash, body_hash(&a.body));
    }

    #[test]
    fn rejects_missing_frontmatter_delimiter() {
        let err = parse("x.md", "no frontmatter here").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn rejects_invalid_prd_id() {
        let err = parse("x.md", &sample("draft").replace("feat-1", "FEAT_1")).unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "prd_id"));
    }

    #[test]
    fn rejects_invalid_status() {
        let err = parse("x.md", &sample("bogus")).unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "status"));
    }

    #[test]
    fn write_then_parse_round_trips_body_exactly() {
        let prd = parse("x.md", &sample("approved")).unwrap();
        let content = write(&prd.frontmatter, &prd.body).unwrap();
        let reparsed = parse("x.md", &content).unwrap();
        assert_eq!(reparsed.body, prd.body);
        assert_eq!(reparsed.frontmatter, prd.frontmatter);
    }

    #[test]
    fn handles_eof_without_trailing_newline_after_closing_delimiter() {
        let content = "---\nprd_id: feat-1\ntitle: Feature One\nstatus: draft\n---";
        let prd = parse("x.md", content).unwrap();
        assert_eq!(prd.body, "");
    }
}
