use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::error::{Error, Result};
use crate::git::ops::{GitOps, GitOpsOptions};
use crate::git::runner::Runner;
use crate::process::{ProcessConfig, spawn_and_stream};

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub unit_id: String,
}

/// A conditional setup command: `(marker_file, command, args)`. Only the
/// first marker found in a fresh worktree has its command run.
pub struct SetupCommand {
    pub marker: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
}

pub fn default_setup_commands() -> Vec<SetupCommand> {
    vec![
        SetupCommand { marker: "package.json", command: "npm", args: &["install"] },
        SetupCommand { marker: "pnpm-lock.yaml", command: "pnpm", args: &["install"] },
        SetupCommand { marker: "yarn.lock", command: "yarn", args: &["install"] },
        SetupCommand { marker: "Cargo.toml", command: "cargo", args: &["fetch"] },
        SetupCommand { marker: "go.mod", command: "go", args: &["mod", "download"] },
    ]
}

/// Creates, lists, and removes worktrees under a base directory.
pub struct WorktreeManager {
    runner: Arc<dyn Runner>,
    repo_root: PathBuf,
    base_dir: PathBuf,
    base_branch: String,
    branch_prefix: String,
    setup_commands: Vec<SetupCommand>,
    audit: Arc<dyn AuditSink>,
}

impl WorktreeManager {
    pub fn new(
        runner: Arc<dyn Runner>,
        repo_root: PathBuf,
        base_dir: PathBuf,
        base_branch: String,
        branch_prefix: String,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            runner,
            repo_root,
            base_dir,
            base_branch,
            branch_prefix,
            setup_commands: default_setup_commands(),
            audit,
        }
    }

    fn branch_name(&self, unit_id: &str) -> String {
        format!("{}{unit_id}", self.branch_prefix)
    }

    fn git(&self, args: &[&str]) -> std::result::Result<String, String> {
        let output = self.runner.run(&self.repo_root, args);
        if output.success {
            Ok(output.stdout)
        } else {
            Err(output.stderr)
        }
    }

    /// Create a worktree for a work unit at `<base>/<unit_id>`, run the
    /// first matching conditional setup command, and remove the worktree
    /// again if setup fails.
    pub async fn create(&self, unit_id: &str) -> Result<WorktreeInfo> {
        let branch = self.branch_name(unit_id);
        let path = self.base_dir.join(unit_id);

        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::Worktree(format!("failed to create base dir: {e}")))?;

        self.git(&["fetch", "origin", &self.base_branch])
            .map_err(|e| Error::Worktree(format!("fetch failed: {e}")))?;

        let start_point = format!("origin/{}", self.base_branch);
        let path_str = path.to_string_lossy().into_owned();
        self.git(&["worktree", "add", "-b", &branch, &path_str, &start_point])
            .map_err(|e| Error::Worktree(format!("git worktree add failed: {e}")))?;

        let canonical = path.canonicalize().unwrap_or(path);

        if let Some(setup) = self.matching_setup(&canonical) {
            if let Err(e) = self.run_setup(&canonical, setup).await {
                warn!(unit_id, error = %e, "setup command failed, removing worktree");
                let _ = self.remove(&canonical);
                return Err(e);
            }
        }

        info!(unit_id, branch = %branch, path = %canonical.display(), "created worktree");
        Ok(WorktreeInfo {
            path: canonical,
            branch,
            unit_id: unit_id.to_string(),
        })
    }

    fn matching_setup(&self, path: &Path) -> Option<&SetupCommand> {
        self.setup_commands.iter().find(|s| path.join(s.marker).exists())
    }

    async fn run_setup(&self, path: &Path, setup: &SetupCommand) -> Result<()> {
        info!(command = setup.command, "running worktree setup");
        let config = ProcessConfig {
            command: setup.command.to_string(),
            args: setup.args.iter().map(|s| s.to_string()).collect(),
            working_dir: path.to_path_buf(),
            timeout: None,
            log_prefix: format!("setup:{}", setup.command),
            env: vec![],
            stdin_data: None,
        };
        let output = spawn_and_stream(config).await?;
        if !output.success() {
            return Err(Error::Worktree(format!(
                "setup command '{}' exited with code {}",
                setup.command, output.exit_code
            )));
        }
        Ok(())
    }

    /// Remove a worktree via `git worktree remove --force` followed by a
    /// directory removal for anything git left behind.
    pub fn remove(&self, worktree_path: &Path) -> Result<()> {
        let _ = self.git(&["worktree", "prune"]);
        let path_str = worktree_path.to_string_lossy().into_owned();
        self.git(&["worktree", "remove", "--force", &path_str])
            .map_err(|e| Error::Worktree(format!("failed to remove worktree: {e}")))?;
        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)
                .map_err(|e| Error::Worktree(format!("failed to remove worktree dir: {e}")))?;
        }
        info!(path = %worktree_path.display(), "removed worktree");
        Ok(())
    }

    /// List worktrees under the base directory, symlink-resolving both the
    /// candidate path and the configured base so stale/foreign entries are
    /// excluded.
    pub fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let _ = self.git(&["worktree", "prune"]);
        let raw = self
            .git(&["worktree", "list", "--porcelain"])
            .map_err(|e| Error::Worktree(format!("failed to list worktrees: {e}")))?;

        let base = self.base_dir.canonicalize().unwrap_or_else(|_| self.base_dir.clone());
        let mut result = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_branch: Option<String> = None;

        let flush = |path: &Option<PathBuf>, branch: &Option<String>, out: &mut Vec<WorktreeInfo>| {
            if let Some(path) = path {
                let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
                if resolved != base && resolved.starts_with(&base) {
                    let unit_id = resolved
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default()
                        .to_string();
                    out.push(WorktreeInfo {
                        path: resolved,
                        branch: branch.clone().unwrap_or_else(|| unit_id.clone()),
                        unit_id,
                    });
                }
            }
        };

        for line in raw.lines() {
            if let Some(path_str) = line.strip_prefix("worktree ") {
                flush(&current_path, &current_branch, &mut result);
                current_path = Some(PathBuf::from(path_str));
                current_branch = None;
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                current_branch = branch_ref.strip_prefix("refs/heads/").map(str::to_string);
            }
        }
        flush(&current_path, &current_branch, &mut result);

        Ok(result)
    }

    /// A worktree is resumable when at least one spec file under
    /// `specs/tasks/<unit_id>/` has frontmatter status other than `pending`.
    pub fn is_resumable(&self, worktree_path: &Path, unit_id: &str) -> bool {
        let tasks_dir = worktree_path.join("specs").join("tasks").join(unit_id);
        let Ok(entries) = std::fs::read_dir(&tasks_dir) else {
            return false;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Some(status) = extract_frontmatter_field(&content, "status") {
                if status != "pending" {
                    return true;
                }
            }
        }
        false
    }

    /// Build a `GitOps` bound to a worktree this manager created.
    pub fn git_ops(&self, path: &Path, allow_destructive: bool, audit: Arc<dyn AuditSink>) -> Result<GitOps> {
        GitOps::new(
            self.runner.clone(),
            path,
            &self.base_dir,
            GitOpsOptions {
                allow_destructive,
                ..Default::default()
            },
            audit,
        )
    }
}

fn extract_frontmatter_field(content: &str, field: &str) -> Option<String> {
    let body = content.strip_prefix("---\n")?;
    let end = body.find("\n---")?;
    let frontmatter = &body[..end];
    for line in frontmatter.lines() {
        if let Some(rest) = line.strip_prefix(&format!("{field}:")) {
            return Some(rest.trim().trim_matches('"').to_string());
        }
    }
    None
}
