use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::events::{Bus, EventKind};
use crate::forge::{PrCreator, PrRequest};

#[derive(Debug, Clone)]
pub struct CompletionStatus {
    pub all_units_merged: bool,
    pub branch_clean: bool,
    pub existing_pr: Option<String>,
    pub ready_for_pr: bool,
}

/// Determines readiness-for-PR from unit completion + clean worktree +
/// no-existing-PR, and triggers PR creation when ready.
pub struct CompletionChecker {
    bus: Arc<Bus>,
}

impl CompletionChecker {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }

    /// `all_units_merged` is true iff every `*.md` file under
    /// `specs/tasks/<prd_id>/` has a matching PRD unit with status
    /// `complete`; `unit_status` is that lookup, keyed by the task file's
    /// basename without extension.
    pub fn check(
        &self,
        worktree_path: &Path,
        prd_id: &str,
        unit_status: impl Fn(&str) -> Option<String>,
        status_porcelain_empty: bool,
        existing_pr: Option<String>,
    ) -> Result<CompletionStatus> {
        let tasks_dir = worktree_path.join("specs").join("tasks").join(prd_id);
        let mut all_units_merged = true;
        if let Ok(entries) = std::fs::read_dir(&tasks_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                match unit_status(stem) {
                    Some(status) if status == "complete" => {}
                    _ => {
                        all_units_merged = false;
                        break;
                    }
                }
            }
        }

        let branch_clean = status_porcelain_empty;
        let ready_for_pr = all_units_merged && branch_clean && existing_pr.is_none();

        Ok(CompletionStatus {
            all_units_merged,
            branch_clean,
            existing_pr,
            ready_for_pr,
        })
    }

    /// Idempotent: a no-op when an existing PR is already reported;
    /// otherwise requires `ready_for_pr` and invokes the PR-creation
    /// interface, emitting `PRCreated` on success.
    pub async fn trigger_completion(
        &self,
        forge: &dyn PrCreator,
        status: &CompletionStatus,
        prd_id: &str,
        request: PrRequest,
    ) -> Result<Option<String>> {
        if status.existing_pr.is_some() {
            return Ok(status.existing_pr.clone());
        }
        if !status.ready_for_pr {
            return Err(crate::error::Error::WrongPrecondition {
                expected: "ready_for_pr".to_string(),
                found: "not ready".to_string(),
            });
        }

        let head_branch = request.head_branch.clone();
        let pr_info = forge.create_pr(request).await?;
        info!(prd_id, pr_url = %pr_info.url, "pull request created");
        self.bus.publish(
            EventKind::PrCreated,
            prd_id,
            serde_json::json!({"url": pr_info.url, "number": pr_info.number, "head_branch": head_branch}),
        );
        Ok(Some(pr_info.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::PrInfo;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubForge {
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl PrCreator for StubForge {
        async fn create_pr(&self, request: PrRequest) -> Result<PrInfo> {
            *self.calls.lock().unwrap() += 1;
            Ok(PrInfo {
                url: format!("https://example.invalid/pr/{}", request.head_branch),
                number: 1,
            })
        }
    }

    fn checker() -> CompletionChecker {
        CompletionChecker::new(Arc::new(Bus::new(8)))
    }

    #[test]
    fn all_units_merged_true_when_every_task_complete() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("specs/tasks/feat-1");
        std::fs::create_dir_all(&tasks).unwrap();
        std::fs::write(tasks.join("01-a.md"), "").unwrap();
        let statuses: HashMap<&str, &str> = [("01-a", "complete")].into_iter().collect();

        let checker = checker();
        let status = checker
            .check(dir.path(), "feat-1", |id| statuses.get(id).map(|s| s.to_string()), true, None)
            .unwrap();
        assert!(status.all_units_merged);
        assert!(status.ready_for_pr);
    }

    #[test]
    fn not_ready_when_a_unit_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("specs/tasks/feat-1");
        std::fs::create_dir_all(&tasks).unwrap();
        std::fs::write(tasks.join("01-a.md"), "").unwrap();

        let checker = checker();
        let status = checker.check(dir.path(), "feat-1", |_| None, true, None).unwrap();
        assert!(!status.all_units_merged);
        assert!(!status.ready_for_pr);
    }

    #[tokio::test]
    async fn trigger_completion_is_noop_with_existing_pr() {
        let checker = checker();
        let forge = StubForge { calls: Mutex::new(0) };
        let status = CompletionStatus {
            all_units_merged: true,
            branch_clean: true,
            existing_pr: Some("https://example.invalid/pr/9".to_string()),
            ready_for_pr: false,
        };
        let request = PrRequest {
            title: "t".to_string(),
            body: "b".to_string(),
            head_branch: "feature/x".to_string(),
        };
        let result = checker.trigger_completion(&forge, &status, "feat-1", request).await.unwrap();
        assert_eq!(result, Some("https://example.invalid/pr/9".to_string()));
        assert_eq!(*forge.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn trigger_completion_creates_pr_when_ready() {
        let checker = checker();
        let forge = StubForge { calls: Mutex::new(0) };
        let status = CompletionStatus {
            all_units_merged: true,
            branch_clean: true,
            existing_pr: None,
            ready_for_pr: true,
        };
        let request = PrRequest {
            title: "t".to_string(),
            body: "b".to_string(),
            head_branch: "feature/x".to_string(),
        };
        let result = checker.trigger_completion(&forge, &status, "feat-1", request).await.unwrap();
        assert!(result.unwrap().contains("feature/x"));
        assert_eq!(*forge.calls.lock().unwrap(), 1);
    }
}
