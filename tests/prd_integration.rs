use std::fs;

use featureloop::feature::prd::{self, PrdFrontmatter};
use featureloop::feature::state::FeatureStatus;

fn sample_frontmatter() -> PrdFrontmatter {
    PrdFrontmatter {
        prd_id: "checkout-v2".to_string(),
        title: "Checkout rewrite".to_string(),
        status: "approved".to_string(),
        depends_on: vec!["cart-service".to_string()],
        estimated_units: Some(3),
        estimated_tasks: None,
        feature_branch: None,
        feature_status: None,
        feature_started_at: None,
        feature_completed_at: None,
        spec_review_iterations: None,
        last_spec_review: None,
    }
}

#[test]
fn read_parses_a_file_written_to_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("checkout-v2.md");
    let content = prd::write(&sample_frontmatter(), "## Goals\n\nRewrite the checkout flow.\n").unwrap();
    fs::write(&path, &content).unwrap();

    let parsed = prd::read(&path).unwrap();
    assert_eq!(parsed.frontmatter.prd_id, "checkout-v2");
    assert_eq!(parsed.frontmatter.depends_on, vec!["cart-service".to_string()]);
    assert!(parsed.body.contains("Rewrite the checkout flow"));
    assert_eq!(parsed.body_hash, prd::body_hash(&parsed.body));
}

#[test]
fn rewrite_preserves_body_while_updating_frontmatter() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("checkout-v2.md");
    let content = prd::write(&sample_frontmatter(), "## Goals\n\nOriginal body.\n").unwrap();
    fs::write(&path, &content).unwrap();

    let mut parsed = prd::read(&path).unwrap();
    parsed.frontmatter.feature_status = Some(FeatureStatus::GeneratingSpecs);
    prd::rewrite(&path, &parsed.frontmatter, &parsed.body).unwrap();

    let reread = prd::read(&path).unwrap();
    assert_eq!(reread.frontmatter.feature_status, Some(FeatureStatus::GeneratingSpecs));
    assert_eq!(reread.body, parsed.body);
}

#[test]
fn read_rejects_invalid_prd_id() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.md");
    let mut bad = sample_frontmatter();
    bad.prd_id = "UPPER_CASE".to_string();
    let content = prd::write(&bad, "body\n").unwrap();
    fs::write(&path, &content).unwrap();

    let err = prd::read(&path).unwrap_err();
    assert!(err.to_string().contains("prd_id"));
}

#[test]
fn read_rejects_missing_frontmatter_delimiter() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("no-frontmatter.md");
    fs::write(&path, "just a body, no frontmatter\n").unwrap();

    let err = prd::read(&path).unwrap_err();
    assert!(err.to_string().contains("frontmatter"));
}
