use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::git::runner::Runner;
use crate::oracle::{Oracle, OraclePhase};
use crate::prompts::PromptEngine;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub branch: String,
    pub conflict_attempts: u32,
}

/// Global merge-lock holder. Exposes `merge(branch)`, which blocks to
/// acquire the single process-wide merge mutex, then runs
/// fetch -> rebase -> resolve-conflicts -> force-push, and enqueues the
/// branch name for batched deletion.
pub struct MergeManager {
    runner: Arc<dyn Runner>,
    oracle: Arc<dyn Oracle>,
    target_branch: String,
    max_conflict_attempts: u32,
    lock: Mutex<()>,
    pending_deletes: Mutex<Vec<String>>,
}

impl MergeManager {
    pub fn new(runner: Arc<dyn Runner>, oracle: Arc<dyn Oracle>, target_branch: String, max_conflict_attempts: u32) -> Self {
        Self {
            runner,
            oracle,
            target_branch,
            max_conflict_attempts,
            lock: Mutex::new(()),
            pending_deletes: Mutex::new(Vec::new()),
        }
    }

    fn git(&self, dir: &std::path::Path, args: &[&str]) -> std::result::Result<String, String> {
        let output = self.runner.run(dir, args);
        if output.success {
            Ok(output.stdout)
        } else {
            Err(output.stderr)
        }
    }

    /// Run the full merge pipeline for a worktree's branch. Only one call
    /// across the whole process is ever in flight, enforced by `self.lock`.
    pub async fn merge(&self, worktree_path: &PathBuf, branch: &str) -> Result<MergeOutcome> {
        let _guard = self.lock.lock().expect("merge lock poisoned");

        self.git(worktree_path, &["fetch", "origin", &self.target_branch])
            .map_err(|e| Error::Merge(format!("fetch failed: {e}")))?;

        let target_ref = format!("origin/{}", self.target_branch);
        let rebase_output = self.runner.run(worktree_path, &["rebase", &target_ref]);
        let mut conflict_attempts = 0;

        if !rebase_output.success {
            let combined = format!("{}\n{}", rebase_output.stdout, rebase_output.stderr);
            if !(combined.contains("CONFLICT") || combined.contains("could not apply")) {
                return Err(Error::Merge(format!("rebase failed: {}", rebase_output.stderr)));
            }

            loop {
                conflict_attempts += 1;
                if conflict_attempts > self.max_conflict_attempts {
                    let _ = self.git(worktree_path, &["rebase", "--abort"]);
                    return Err(Error::Merge(format!(
                        "conflict resolution exhausted after {} attempts",
                        self.max_conflict_attempts
                    )));
                }

                let conflicted = self
                    .git(worktree_path, &["diff", "--name-only", "--diff-filter=U"])
                    .map_err(|e| Error::Merge(format!("failed to list conflicted files: {e}")))?;
                let files: Vec<&str> = conflicted.lines().filter(|l| !l.is_empty()).collect();

                if files.is_empty() {
                    self.git(worktree_path, &["rebase", "--continue"])
                        .map_err(|e| Error::Merge(format!("rebase --continue failed: {e}")))?;
                    break;
                }

                warn!(attempt = conflict_attempts, files = ?files, "resolving merge conflicts via oracle");
                self.resolve_conflicts(worktree_path, &files).await?;
            }
        }

        self.git(
            worktree_path,
            &["push", "--force-with-lease", "origin", branch],
        )
        .map_err(|e| Error::Merge(format!("push --force-with-lease failed: {e}")))?;

        self.pending_deletes.lock().expect("pending deletes lock poisoned").push(branch.to_string());

        info!(branch, conflict_attempts, "merge completed");
        Ok(MergeOutcome {
            branch: branch.to_string(),
            conflict_attempts,
        })
    }

    async fn resolve_conflicts(&self, worktree_path: &PathBuf, files: &[&str]) -> Result<()> {
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("worktree".to_string(), worktree_path.display().to_string());
        vars.insert("files".to_string(), files.join("\n"));
        let prompt = engine.render("conflict_resolve", &vars)?;

        self.oracle
            .invoke(OraclePhase::ConflictResolve, &prompt, worktree_path)
            .await?;

        for file in files {
            self.git(worktree_path, &["add", file])
                .map_err(|e| Error::Merge(format!("failed to stage resolved file {file}: {e}")))?;
        }
        Ok(())
    }

    /// Iterate the pending-deletes queue, deleting remote then local.
    /// Per-branch failures are logged and do not abort the flush.
    pub fn flush_deletes(&self, repo_root: &std::path::Path) {
        let branches = std::mem::take(&mut *self.pending_deletes.lock().expect("pending deletes lock poisoned"));
        for branch in branches {
            if let Err(e) = self.git(repo_root, &["push", "origin", "--delete", &branch]) {
                warn!(branch, error = %e, "failed to delete remote branch");
            }
            if let Err(e) = self.git(repo_root, &["branch", "-D", &branch]) {
                warn!(branch, error = %e, "failed to delete local branch");
            }
        }
    }
}
