use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::{Bus, EventKind};
use crate::feature::review::{ReviewResult, Verdict};
use crate::feature::state::{self, FeatureStatus};
use crate::git::ops::{CommitOptions, GitOps, PushOptions};
use crate::oracle::{Oracle, OraclePhase};
use crate::prompts::PromptEngine;

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub max_review_iterations: u32,
    pub retry_on_malformed: u32,
    pub push_retries: u32,
    pub dry_run: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_review_iterations: 3,
            retry_on_malformed: 1,
            push_retries: 1,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSpecsOutcome {
    pub commit_hash: String,
    pub file_count: usize,
    pub pushed: bool,
}

/// Per-PRD state machine driving the whole lifecycle. Each stage method
/// verifies its own precondition state, does its work, then calls the sole
/// internal `transition_to`, which validates against the transition table,
/// updates status, and emits a `workflow.<to>` event.
pub struct Workflow {
    prd_id: String,
    status: FeatureStatus,
    config: WorkflowConfig,
    git: GitOps,
    worktree_path: PathBuf,
    oracle: Arc<dyn Oracle>,
    bus: Arc<Bus>,
    pub session: crate::feature::review::ReviewSession,
}

impl Workflow {
    pub fn new(
        prd_id: impl Into<String>,
        git: GitOps,
        worktree_path: PathBuf,
        oracle: Arc<dyn Oracle>,
        bus: Arc<Bus>,
        config: WorkflowConfig,
    ) -> Self {
        let prd_id = prd_id.into();
        Self {
            session: crate::feature::review::ReviewSession {
                feature_id: prd_id.clone(),
                ..Default::default()
            },
            prd_id,
            status: FeatureStatus::Pending,
            config,
            git,
            worktree_path,
            oracle,
            bus,
        }
    }

    pub fn status(&self) -> FeatureStatus {
        self.status
    }

    /// Attach to a status persisted in PRD frontmatter (e.g. across process
    /// restarts) without running it through the transition table.
    pub fn restore_status(&mut self, status: FeatureStatus) {
        self.status = status;
    }

    fn specs_dir(&self) -> PathBuf {
        self.worktree_path.join("specs").join(&self.prd_id)
    }

    fn tasks_dir(&self) -> PathBuf {
        self.worktree_path.join("specs").join("tasks").join(&self.prd_id)
    }

    fn require(&self, expected: FeatureStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::WrongPrecondition {
                expected: expected.to_string(),
                found: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn transition_to(&mut self, to: FeatureStatus) -> Result<()> {
        if !state::can_transition(self.status, to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let from = self.status;
        self.status = to;
        info!(prd_id = %self.prd_id, %from, %to, "workflow transition");
        self.bus.publish(
            EventKind::Workflow,
            self.prd_id.clone(),
            json!({"from": from.to_string(), "to": to.to_string()}),
        );
        Ok(())
    }

    /// Emit `workflow.escalation` and return a wrapped error that still
    /// carries the original error's message; never suppresses it.
    fn escalate(&self, stage: &str, source: &Error) -> Error {
        warn!(prd_id = %self.prd_id, stage, error = %source, "workflow escalation");
        self.bus.publish(
            EventKind::WorkflowEscalation,
            self.prd_id.clone(),
            json!({"stage": stage, "error": source.to_string()}),
        );
        Error::Escalated {
            stage: stage.to_string(),
            message: source.to_string(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.require(FeatureStatus::Pending)?;
        self.transition_to(FeatureStatus::GeneratingSpecs)
    }

    pub async fn generate_specs(&mut self, prd_body: &str) -> Result<()> {
        self.require(FeatureStatus::GeneratingSpecs)?;
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), self.prd_id.clone());
        vars.insert("prd_path".to_string(), self.worktree_path.display().to_string());
        vars.insert("specs_dir".to_string(), self.specs_dir().display().to_string());
        vars.insert("prd_body".to_string(), prd_body.to_string());
        let prompt = engine.render("generate_specs", &vars)?;

        self.oracle
            .invoke(OraclePhase::GenerateSpecs, &prompt, &self.worktree_path)
            .await?;

        self.transition_to(FeatureStatus::ReviewingSpecs)
    }

    async fn invoke_and_parse_review(&mut self) -> Result<ReviewResult> {
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), self.prd_id.clone());
        vars.insert("prd_path".to_string(), self.worktree_path.display().to_string());
        vars.insert("specs_dir".to_string(), self.specs_dir().display().to_string());
        let prompt = engine.render("review", &vars)?;

        let mut attempt = 0u32;
        loop {
            let raw = self.oracle.invoke(OraclePhase::Review, &prompt, &self.worktree_path).await?;
            match crate::feature::review::parse_review_response(&raw) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    self.bus.publish(
                        EventKind::SpecReviewMalformed,
                        self.prd_id.clone(),
                        json!({"attempt": attempt, "error": e.to_string()}),
                    );
                    if attempt > self.config.retry_on_malformed {
                        return Err(e);
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    async fn apply_feedback(&mut self, result: &ReviewResult) -> Result<()> {
        let feedback = result
            .feedback
            .iter()
            .map(|f| format!("- [{}] {}: {}", f.section, f.issue, f.suggestion))
            .collect::<Vec<_>>()
            .join("\n");

        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), self.prd_id.clone());
        vars.insert("specs_dir".to_string(), self.specs_dir().display().to_string());
        vars.insert("feedback".to_string(), feedback);
        let prompt = engine.render("feedback_apply", &vars)?;

        self.oracle
            .invoke(OraclePhase::FeedbackApply, &prompt, &self.worktree_path)
            .await?;
        Ok(())
    }

    /// The bounded review loop (§4.4). Iteration count is the total number
    /// of review iterations recorded in `session`, so a call resumed after
    /// `review_blocked` continues the same budget rather than resetting it.
    pub async fn review_specs(&mut self) -> Result<Verdict> {
        self.require(FeatureStatus::ReviewingSpecs)?;
        if self.session.iterations.is_empty() {
            self.bus.publish(EventKind::SpecReviewStarted, self.prd_id.clone(), json!({}));
        }

        loop {
            let iteration = self.session.iterations.len() as u32 + 1;
            if iteration > self.config.max_review_iterations {
                let reason = format!("max iterations ({}) exhausted without pass", self.config.max_review_iterations);
                self.session.block_reason = Some(reason.clone());
                self.transition_to(FeatureStatus::ReviewBlocked)?;
                self.bus.publish(
                    EventKind::SpecReviewBlocked,
                    self.prd_id.clone(),
                    json!({"reason": reason, "iterations": self.session.iterations.len()}),
                );
                return Err(self.escalate("review_specs", &Error::MalformedReview(reason)));
            }

            let result = match self.invoke_and_parse_review().await {
                Ok(result) => result,
                Err(e) => {
                    let reason = format!("malformed review output exhausted retries: {e}");
                    self.session.block_reason = Some(reason.clone());
                    self.transition_to(FeatureStatus::ReviewBlocked)?;
                    self.bus.publish(
                        EventKind::SpecReviewBlocked,
                        self.prd_id.clone(),
                        json!({"reason": reason}),
                    );
                    return Err(self.escalate("review_specs", &e));
                }
            };

            self.session.iterations.push(crate::feature::review::IterationHistory {
                iteration,
                result: result.clone(),
                timestamp: chrono::Utc::now(),
            });
            self.bus.publish(
                EventKind::SpecReviewIteration,
                self.prd_id.clone(),
                json!({"iteration": iteration, "verdict": &result.verdict}),
            );

            match result.verdict {
                Verdict::Pass => {
                    self.session.final_verdict = Some(Verdict::Pass);
                    self.transition_to(FeatureStatus::ValidatingSpecs)?;
                    self.bus.publish(
                        EventKind::SpecReviewPassed,
                        self.prd_id.clone(),
                        json!({"iterations": iteration}),
                    );
                    return Ok(Verdict::Pass);
                }
                Verdict::NeedsRevision => {
                    self.bus.publish(
                        EventKind::SpecReviewFeedback,
                        self.prd_id.clone(),
                        json!({"iteration": iteration, "feedback": &result.feedback}),
                    );
                    self.transition_to(FeatureStatus::UpdatingSpecs)?;
                    self.apply_feedback(&result).await?;
                    self.transition_to(FeatureStatus::ReviewingSpecs)?;
                }
            }
        }
    }

    /// `skip_review` transitions directly to `validating_specs`; otherwise
    /// resumes the review loop at its recorded iteration count.
    pub async fn resume(&mut self, skip_review: bool) -> Result<()> {
        self.require(FeatureStatus::ReviewBlocked)?;
        if skip_review {
            self.transition_to(FeatureStatus::ValidatingSpecs)?;
            return Ok(());
        }
        self.transition_to(FeatureStatus::ReviewingSpecs)?;
        self.review_specs().await?;
        Ok(())
    }

    pub async fn validate_specs(&mut self) -> Result<()> {
        self.require(FeatureStatus::ValidatingSpecs)?;
        self.transition_to(FeatureStatus::GeneratingTasks)
    }

    pub async fn generate_tasks(&mut self) -> Result<()> {
        self.require(FeatureStatus::GeneratingTasks)?;
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), self.prd_id.clone());
        vars.insert("specs_dir".to_string(), self.specs_dir().display().to_string());
        let prompt = engine.render("generate_tasks", &vars)?;

        self.oracle
            .invoke(OraclePhase::GenerateTasks, &prompt, &self.worktree_path)
            .await?;
        Ok(())
    }

    /// Stage only `specs/tasks/<prd_id>/`, commit with a fixed message and
    /// hooks disabled, push with up to `push_retries` extra attempts.
    pub fn commit_specs(&mut self) -> Result<CommitSpecsOutcome> {
        self.require(FeatureStatus::GeneratingTasks)?;

        if self.config.dry_run {
            return Ok(CommitSpecsOutcome::default());
        }

        let rel = format!("specs/tasks/{}", self.prd_id);
        self.git.add(&[&rel])?;
        let staged = self.git.diff_cached_name_only()?;
        let file_count = staged.len();

        let message = format!("chore(feature): add specs for {}", self.prd_id);
        self.git.commit(
            &message,
            &CommitOptions {
                no_verify: true,
                ..Default::default()
            },
        )?;
        let commit_hash = self.git.rev_parse("HEAD")?;

        let branch = self.git.current_branch()?;
        let max_attempts = 1 + self.config.push_retries;
        let mut last_err = None;
        let mut pushed = false;
        for attempt in 1..=max_attempts {
            match self.git.push(
                "origin",
                &branch,
                &PushOptions {
                    set_upstream: true,
                    ..Default::default()
                },
            ) {
                Ok(()) => {
                    pushed = true;
                    last_err = None;
                    break;
                }
                Err(e) => {
                    warn!(prd_id = %self.prd_id, attempt, max_attempts, error = %e, "push failed, retrying");
                    last_err = Some(e);
                }
            }
        }
        if let Some(e) = last_err {
            return Err(self.escalate("commit_specs", &e));
        }

        self.transition_to(FeatureStatus::SpecsCommitted)?;
        Ok(CommitSpecsOutcome {
            commit_hash,
            file_count,
            pushed,
        })
    }

    pub fn tasks_dir_path(&self) -> PathBuf {
        self.tasks_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::git::ops::GitOpsOptions;
    use crate::git::runner::StubRunner;
    use std::path::Path;
    use std::sync::Mutex;

    struct ScriptedOracle {
        responses: Mutex<std::collections::VecDeque<String>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Oracle for ScriptedOracle {
        async fn invoke(&self, _phase: OraclePhase, _prompt: &str, _working_dir: &Path) -> Result<String> {
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn git_ops(dir: &Path) -> GitOps {
        let canonical = dir.canonicalize().unwrap();
        let runner = Arc::new(StubRunner::new());
        runner.expect(&["rev-parse", "--show-toplevel"], &format!("{}\n", canonical.display()));
        GitOps::new(
            runner,
            &canonical,
            &canonical,
            GitOpsOptions {
                allow_repo_root: true,
                allow_destructive: false,
                branch_guard: Default::default(),
            },
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap()
    }

    fn workflow(dir: &Path, oracle: Arc<dyn Oracle>) -> Workflow {
        Workflow::new(
            "feat-1",
            git_ops(dir),
            dir.to_path_buf(),
            oracle,
            Arc::new(Bus::new(16)),
            WorkflowConfig::default(),
        )
    }

    const PASS_JSON: &str = r#"{"verdict":"pass","score":{"completeness":90,"consistency":85,"testability":80,"architecture":95},"feedback":[]}"#;
    const NEEDS_REVISION_JSON: &str = r#"{"verdict":"needs_revision","score":{"completeness":10,"consistency":10,"testability":10,"architecture":10},"feedback":[{"section":"s","issue":"i","suggestion":"sg"}]}"#;

    #[tokio::test]
    async fn pass_on_first_iteration_transitions_to_validating_specs() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![PASS_JSON]));
        let mut wf = workflow(dir.path(), oracle);
        wf.start().await.unwrap();
        wf.generate_specs("body").await.unwrap();

        let verdict = wf.review_specs().await.unwrap();
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(wf.session.iterations.len(), 1);
        assert_eq!(wf.status(), FeatureStatus::ValidatingSpecs);
    }

    #[tokio::test]
    async fn pass_after_one_revision_invokes_feedback_applier_once() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![NEEDS_REVISION_JSON, "", PASS_JSON]));
        let mut wf = workflow(dir.path(), oracle);
        wf.start().await.unwrap();
        wf.generate_specs("body").await.unwrap();

        let verdict = wf.review_specs().await.unwrap();
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(wf.session.iterations.len(), 2);
        assert_eq!(wf.status(), FeatureStatus::ValidatingSpecs);
    }

    #[tokio::test]
    async fn blocks_after_max_iterations_without_pass() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![
            NEEDS_REVISION_JSON,
            "",
            NEEDS_REVISION_JSON,
            "",
        ]));
        let mut wf = workflow(dir.path(), oracle);
        wf.config.max_review_iterations = 2;
        wf.start().await.unwrap();
        wf.generate_specs("body").await.unwrap();

        let err = wf.review_specs().await.unwrap_err();
        assert!(matches!(err, Error::Escalated { .. }));
        assert_eq!(wf.status(), FeatureStatus::ReviewBlocked);
        assert!(wf.session.block_reason.as_ref().unwrap().contains("max iterations"));
    }

    #[tokio::test]
    async fn malformed_then_recovered_emits_one_malformed_event_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec!["This is not valid JSON", PASS_JSON]));
        let mut wf = workflow(dir.path(), oracle);
        wf.start().await.unwrap();
        wf.generate_specs("body").await.unwrap();

        let verdict = wf.review_specs().await.unwrap();
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(wf.session.iterations.len(), 1);
    }

    #[test]
    fn commit_specs_dry_run_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
        let mut wf = workflow(dir.path(), oracle);
        wf.config.dry_run = true;
        wf.status = FeatureStatus::GeneratingTasks;

        let outcome = wf.commit_specs().unwrap();
        assert_eq!(outcome, CommitSpecsOutcome::default());
    }

    #[test]
    fn commit_specs_wrong_precondition_errors() {
        let dir = tempfile::tempdir().unwrap();
        let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
        let mut wf = workflow(dir.path(), oracle);
        let err = wf.commit_specs().unwrap_err();
        assert!(matches!(err, Error::WrongPrecondition { .. }));
    }
}
