use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditSink};
use crate::error::{Error, GitGuardKind, Result};
use crate::git::runner::Runner;

/// Process-global registry mapping a canonical repo path to its write lock.
///
/// Entries are created lazily on first use and never evicted: for a
/// long-lived process this is bounded by the number of distinct repos it
/// ever touches, which is small in practice.
fn lock_registry() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut registry = lock_registry().lock().expect("lock registry poisoned");
    registry
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Construction-time policy restricting which branches/remotes a `GitOps`
/// instance may write to.
#[derive(Debug, Clone, Default)]
pub struct BranchGuard {
    pub expected_branch: Option<String>,
    pub allowed_branch_prefixes: Vec<String>,
    pub allowed_remotes: Vec<String>,
    pub protected_branches: Vec<String>,
}

impl BranchGuard {
    pub fn with_defaults() -> Self {
        Self {
            protected_branches: vec!["main".to_string(), "master".to_string()],
            ..Default::default()
        }
    }

    fn check_branch(&self, branch: &str) -> std::result::Result<(), GitGuardKind> {
        if self.protected_branches.iter().any(|b| b == branch) {
            return Err(GitGuardKind::ProtectedBranch);
        }
        if let Some(expected) = &self.expected_branch {
            if expected != branch {
                return Err(GitGuardKind::UnexpectedBranch);
            }
            return Ok(());
        }
        if !self.allowed_branch_prefixes.is_empty()
            && !self
                .allowed_branch_prefixes
                .iter()
                .any(|p| branch.starts_with(p.as_str()))
        {
            return Err(GitGuardKind::UnexpectedBranch);
        }
        Ok(())
    }

    fn check_remote(&self, remote: &str) -> std::result::Result<(), GitGuardKind> {
        if !self.allowed_remotes.is_empty() && !self.allowed_remotes.iter().any(|r| r == remote) {
            return Err(GitGuardKind::UnexpectedRemote);
        }
        Ok(())
    }
}

/// Options controlling how construction treats the bound path.
#[derive(Debug, Clone, Default)]
pub struct GitOpsOptions {
    /// Skip checks 8/9 (worktree-ness, worktree-base containment). Set this
    /// only for a `GitOps` intentionally bound to the main repository root.
    pub allow_repo_root: bool,
    pub allow_destructive: bool,
    pub branch_guard: BranchGuard,
}

#[derive(Debug, Clone)]
pub struct GitStatus {
    pub clean: bool,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub conflicted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub no_verify: bool,
    pub author: Option<String>,
    pub allow_empty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub force: bool,
    pub force_with_lease: bool,
    pub set_upstream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub ff_only: bool,
    pub no_ff: bool,
    pub no_commit: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    pub directories: bool,
    pub force: bool,
}

/// Path-bound safe git facade. Every invocation flows through a value bound
/// at construction to exactly one canonical, absolute repository path, so
/// mis-directed operations are impossible.
pub struct GitOps {
    runner: Arc<dyn Runner>,
    repo_path: PathBuf,
    options: GitOpsOptions,
    audit: Arc<dyn AuditSink>,
    lock: Arc<Mutex<()>>,
}

impl GitOps {
    /// Run the nine construction-time checks, in order, and bind to `path`.
    pub fn new(
        runner: Arc<dyn Runner>,
        path: impl AsRef<Path>,
        worktree_base: impl AsRef<Path>,
        options: GitOpsOptions,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let raw = path.as_ref();

        // (1) non-empty
        if raw.as_os_str().is_empty() {
            return Err(guard_err(GitGuardKind::EmptyPath, "path must not be empty"));
        }
        // (2) absolute
        if !raw.is_absolute() {
            return Err(guard_err(
                GitGuardKind::RelativePath,
                format!("path must be absolute: {}", raw.display()),
            ));
        }
        // (3) exists
        if !raw.exists() {
            return Err(guard_err(
                GitGuardKind::PathNotFound,
                format!("path does not exist: {}", raw.display()),
            ));
        }
        // (4) is a directory
        if !raw.is_dir() {
            return Err(guard_err(
                GitGuardKind::NotDirectory,
                format!("path is not a directory: {}", raw.display()),
            ));
        }
        // (5) canonical after symlink resolution
        let canonical = raw.canonicalize().map_err(|_| {
            guard_err(
                GitGuardKind::NonCanonicalPath,
                format!("failed to canonicalize: {}", raw.display()),
            )
        })?;

        // (6) git recognizes it as a working tree
        let output = runner.run(&canonical, &["rev-parse", "--show-toplevel"]);
        if !output.success {
            return Err(guard_err(
                GitGuardKind::NotGitRepo,
                format!("not a git working tree: {}", output.stderr.trim()),
            ));
        }
        let toplevel = PathBuf::from(output.stdout.trim());
        let toplevel = toplevel.canonicalize().unwrap_or(toplevel);

        // (7) resolved toplevel equals the canonical input
        if toplevel != canonical {
            return Err(guard_err(
                GitGuardKind::PathMismatch,
                format!(
                    "resolved toplevel {} does not match bound path {}",
                    toplevel.display(),
                    canonical.display()
                ),
            ));
        }

        if !options.allow_repo_root {
            // (8) git dir must contain a "worktrees" segment
            let git_dir_output = runner.run(&canonical, &["rev-parse", "--git-dir"]);
            let git_dir = git_dir_output.stdout.trim();
            if !git_dir_output.success || !git_dir.contains("worktrees") {
                return Err(guard_err(
                    GitGuardKind::RepoRootNotAllowed,
                    "path is the main repository, not a worktree",
                ));
            }

            // (9) canonical path must be the worktree base or a descendant of it
            let base = worktree_base
                .as_ref()
                .canonicalize()
                .unwrap_or_else(|_| worktree_base.as_ref().to_path_buf());
            if canonical != base && !canonical.starts_with(&base) {
                return Err(guard_err(
                    GitGuardKind::OutsideWorktreeBase,
                    format!(
                        "{} is not under worktree base {}",
                        canonical.display(),
                        base.display()
                    ),
                ));
            }
        }

        let lock = lock_for(&canonical);

        Ok(Self {
            runner,
            repo_path: canonical,
            options,
            audit,
            lock,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Re-verify the per-call runtime invariants: path still exists, is a
    /// directory, and `rev-parse --show-toplevel` still equals the bound
    /// path. Catches external deletion/mount changes between operations.
    fn runtime_check(&self) -> std::result::Result<(), GitGuardKind> {
        if !self.repo_path.exists() {
            return Err(GitGuardKind::PathNotFound);
        }
        if !self.repo_path.is_dir() {
            return Err(GitGuardKind::NotDirectory);
        }
        let output = self.runner.run(&self.repo_path, &["rev-parse", "--show-toplevel"]);
        if !output.success {
            return Err(GitGuardKind::NotGitRepo);
        }
        let toplevel = PathBuf::from(output.stdout.trim());
        let toplevel = toplevel.canonicalize().unwrap_or(toplevel);
        if toplevel != self.repo_path {
            return Err(GitGuardKind::PathMismatch);
        }
        Ok(())
    }

    fn current_branch_unchecked(&self) -> Option<String> {
        let output = self.runner.run(&self.repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]);
        output.success.then(|| output.stdout.trim().to_string())
    }

    /// Run one call through the full construction + runtime + guard
    /// pipeline, emitting exactly one audit entry. `is_write` selects the
    /// per-path lock; `destructive` gates on `AllowDestructive`; `branch_op`
    /// is true for operations that must respect the branch guard.
    fn call(
        &self,
        operation: &str,
        args: &[&str],
        is_write: bool,
        destructive: bool,
        branch_op: bool,
        remote: Option<&str>,
    ) -> Result<String> {
        let start = Instant::now();
        let mut checks = vec!["runtime_path_exists", "runtime_is_directory", "runtime_toplevel_matches"];

        let _guard: Option<MutexGuard<'_, ()>> = if is_write {
            Some(self.lock.lock().expect("per-repo git lock poisoned"))
        } else {
            None
        };

        if let Err(kind) = self.runtime_check() {
            return self.fail(operation, args, remote, &checks, start, kind, None);
        }

        if destructive {
            checks.push("destructive_allowed");
            if !self.options.allow_destructive {
                return self.fail(
                    operation,
                    args,
                    remote,
                    &checks,
                    start,
                    GitGuardKind::DestructiveNotAllowed,
                    None,
                );
            }
        }

        let branch = self.current_branch_unchecked();
        if branch_op {
            checks.push("branch_guard");
            if let Some(branch) = &branch {
                if let Err(kind) = self.options.branch_guard.check_branch(branch) {
                    return self.fail(operation, args, remote, &checks, start, kind, Some(branch.clone()));
                }
            }
            if let Some(remote) = remote {
                checks.push("remote_guard");
                if let Err(kind) = self.options.branch_guard.check_remote(remote) {
                    return self.fail(operation, args, remote.into(), &checks, start, kind, branch.clone());
                }
            }
        }

        checks.push("subprocess");
        let output = self.runner.run(&self.repo_path, args);
        let duration = start.elapsed();

        self.audit.record(AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: operation.to_string(),
            repo_path: self.repo_path.clone(),
            branch,
            remote: remote.map(str::to_string),
            args: args.iter().map(|s| s.to_string()).collect(),
            safety_checks: checks.iter().map(|s| s.to_string()).collect(),
            checks_passed: output.success,
            failure_reason: (!output.success).then(|| output.stderr.trim().to_string()),
            duration_ms: duration.as_millis(),
            error: (!output.success).then(|| output.stderr.trim().to_string()),
        })?;

        if output.success {
            Ok(output.stdout)
        } else {
            warn!(operation, error = %output.stderr.trim(), "git operation failed");
            Err(Error::Git(output.stderr.trim().to_string()))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        operation: &str,
        args: &[&str],
        remote: Option<&str>,
        checks: &[&str],
        start: Instant,
        kind: GitGuardKind,
        branch: Option<String>,
    ) -> Result<String> {
        let duration = start.elapsed();
        let reason = kind.to_string();
        self.audit.record(AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: operation.to_string(),
            repo_path: self.repo_path.clone(),
            branch,
            remote: remote.map(str::to_string),
            args: args.iter().map(|s| s.to_string()).collect(),
            safety_checks: checks.iter().map(|s| s.to_string()).collect(),
            checks_passed: false,
            failure_reason: Some(reason.clone()),
            duration_ms: duration.as_millis(),
            error: None,
        })?;
        Err(Error::GitGuard {
            kind,
            message: reason,
        })
    }

    // --- Read operations (no lock, no destructive gate, no branch guard) ---

    pub fn status(&self) -> Result<GitStatus> {
        let raw = self.call("status", &["status", "--porcelain"], false, false, false, None)?;
        let mut status = GitStatus {
            clean: true,
            staged: vec![],
            modified: vec![],
            untracked: vec![],
            conflicted: vec![],
        };
        for line in raw.lines() {
            if line.len() < 3 {
                continue;
            }
            status.clean = false;
            let (index, worktree) = (&line[0..1], &line[1..2]);
            let path = line[3..].to_string();
            match (index, worktree) {
                ("U", _) | (_, "U") | ("A", "A") | ("D", "D") => status.conflicted.push(path),
                ("?", "?") => status.untracked.push(path),
                (_, "M") | (_, "D") => {
                    status.modified.push(path.clone());
                    if index != " " && index != "?" {
                        status.staged.push(path);
                    }
                }
                (i, _) if i != " " && i != "?" => status.staged.push(path),
                _ => {}
            }
        }
        Ok(status)
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self
            .call("rev_parse", &["rev-parse", rev], false, false, false, None)?
            .trim()
            .to_string())
    }

    pub fn diff(&self, base: &str, head: &str) -> Result<String> {
        self.call("diff", &["diff", &format!("{base}..{head}")], false, false, false, None)
    }

    pub fn log(&self, opts: &[&str]) -> Result<Vec<Commit>> {
        let format = "%H\x01%an\x01%aI\x01%s\x01%b\x00";
        let mut args = vec!["log", &format!("--format={format}")[..]];
        args.extend_from_slice(opts);
        let raw = self.call("log", &args, false, false, false, None)?;
        let mut commits = Vec::new();
        for record in raw.split('\0') {
            let record = record.trim_start_matches('\n');
            if record.is_empty() {
                continue;
            }
            let fields: Vec<&str> = record.splitn(5, '\x01').collect();
            if fields.len() == 5 {
                commits.push(Commit {
                    hash: fields[0].to_string(),
                    author: fields[1].to_string(),
                    date: fields[2].to_string(),
                    subject: fields[3].to_string(),
                    body: fields[4].trim_end_matches('\n').to_string(),
                });
            }
        }
        Ok(commits)
    }

    pub fn current_branch(&self) -> Result<String> {
        self.call(
            "current_branch",
            &["rev-parse", "--abbrev-ref", "HEAD"],
            false,
            false,
            false,
            None,
        )
        .map(|s| s.trim().to_string())
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        let local_ref = format!("refs/heads/{name}");
        let local = self.call(
            "branch_exists_local",
            &["show-ref", "--verify", "--quiet", &local_ref],
            false,
            false,
            false,
            None,
        );
        if local.is_ok() {
            return Ok(true);
        }
        let remote_ref = format!("refs/remotes/origin/{name}");
        let remote = self.call(
            "branch_exists_remote",
            &["show-ref", "--verify", "--quiet", &remote_ref],
            false,
            false,
            false,
            None,
        );
        Ok(remote.is_ok())
    }

    // --- Write operations (take the per-repo lock) ---

    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add"];
        args.extend_from_slice(paths);
        self.call("add", &args, true, false, true, None).map(|_| ())
    }

    pub fn add_all(&self) -> Result<()> {
        self.call("add_all", &["add", "-A"], true, false, true, None).map(|_| ())
    }

    pub fn reset(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["reset"];
        args.extend_from_slice(paths);
        self.call("reset", &args, true, false, true, None).map(|_| ())
    }

    pub fn commit(&self, message: &str, opts: &CommitOptions) -> Result<()> {
        let mut args = vec!["commit", "-m", message];
        if opts.no_verify {
            args.push("--no-verify");
        }
        if opts.allow_empty {
            args.push("--allow-empty");
        }
        if let Some(author) = &opts.author {
            args.push("--author");
            args.push(author);
        }
        self.call("commit", &args, true, false, true, None).map(|_| ())
    }

    pub fn checkout_branch(&self, branch: &str, create: bool) -> Result<()> {
        let args: Vec<&str> = if create {
            vec!["checkout", "-b", branch]
        } else {
            vec!["checkout", branch]
        };
        self.call("checkout_branch", &args, true, false, true, None).map(|_| ())
    }

    pub fn checkout_files(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["checkout", "--"];
        args.extend_from_slice(paths);
        self.call("checkout_files", &args, true, true, true, None).map(|_| ())
    }

    pub fn clean(&self, opts: &CleanOptions) -> Result<()> {
        let mut args = vec!["clean"];
        if opts.force {
            args.push("-f");
        }
        if opts.directories {
            args.push("-d");
        }
        self.call("clean", &args, true, true, true, None).map(|_| ())
    }

    pub fn reset_hard(&self, reference: &str) -> Result<()> {
        self.call("reset_hard", &["reset", "--hard", reference], true, true, true, None)
            .map(|_| ())
    }

    pub fn fetch(&self, remote: &str, reference: &str) -> Result<()> {
        self.call("fetch", &["fetch", remote, reference], true, false, true, Some(remote))
            .map(|_| ())
    }

    pub fn push(&self, remote: &str, branch: &str, opts: &PushOptions) -> Result<()> {
        let mut args = vec!["push"];
        if opts.force {
            args.push("--force");
        } else if opts.force_with_lease {
            args.push("--force-with-lease");
        }
        if opts.set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote);
        args.push(branch);
        let destructive = opts.force || opts.force_with_lease;
        self.call("push", &args, true, destructive, true, Some(remote)).map(|_| ())
    }

    pub fn merge(&self, branch: &str, opts: &MergeOptions) -> Result<()> {
        let mut args = vec!["merge"];
        if opts.ff_only {
            args.push("--ff-only");
        }
        if opts.no_ff {
            args.push("--no-ff");
        }
        if opts.no_commit {
            args.push("--no-commit");
        }
        if let Some(message) = &opts.message {
            args.push("-m");
            args.push(message);
        }
        args.push(branch);
        self.call("merge", &args, true, false, true, None).map(|_| ())
    }

    pub fn merge_abort(&self) -> Result<()> {
        self.call("merge_abort", &["merge", "--abort"], true, false, false, None)
            .map(|_| ())
    }

    pub fn rebase_abort(&self) -> Result<()> {
        self.call("rebase_abort", &["rebase", "--abort"], true, false, false, None)
            .map(|_| ())
    }

    pub fn rebase_continue(&self) -> Result<()> {
        self.call("rebase_continue", &["rebase", "--continue"], true, false, false, None)
            .map(|_| ())
    }

    pub fn rebase_onto(&self, target: &str) -> Result<String> {
        self.call("rebase", &["rebase", target], true, false, false, None)
    }

    pub fn diff_cached_name_only(&self) -> Result<Vec<String>> {
        let raw = self.call("diff_cached", &["diff", "--cached", "--name-only"], false, false, false, None)?;
        Ok(raw.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    pub fn diff_conflicted_files(&self) -> Result<Vec<String>> {
        let raw = self.call(
            "diff_conflicted",
            &["diff", "--name-only", "--diff-filter=U"],
            false,
            false,
            false,
            None,
        )?;
        Ok(raw.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

fn guard_err(kind: GitGuardKind, message: impl Into<String>) -> Error {
    Error::GitGuard {
        kind,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::git::runner::StubRunner;

    fn repo_fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().canonicalize().unwrap();
        (dir, path)
    }

    fn make_ops(runner: Arc<StubRunner>, path: &Path, allow_destructive: bool) -> GitOps {
        runner.expect(&["rev-parse", "--show-toplevel"], &format!("{}\n", path.display()));
        runner.expect(&["rev-parse", "--git-dir"], "/repo/.git/worktrees/feat-1\n");
        GitOps::new(
            runner,
            path,
            path,
            GitOpsOptions {
                allow_destructive,
                ..Default::default()
            },
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap()
    }

    #[test]
    fn construction_rejects_relative_path() {
        let runner = Arc::new(StubRunner::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let err = GitOps::new(runner, "relative/path", "relative", GitOpsOptions::default(), audit).unwrap_err();
        assert!(matches!(
            err,
            Error::GitGuard {
                kind: GitGuardKind::RelativePath,
                ..
            }
        ));
    }

    #[test]
    fn construction_rejects_nonexistent_path() {
        let runner = Arc::new(StubRunner::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let err = GitOps::new(runner, "/definitely/not/a/real/path", "/", GitOpsOptions::default(), audit)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::GitGuard {
                kind: GitGuardKind::PathNotFound,
                ..
            }
        ));
    }

    #[test]
    fn construction_rejects_main_repo_root_by_default() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        runner.expect(&["rev-parse", "--show-toplevel"], &format!("{}\n", path.display()));
        runner.expect(&["rev-parse", "--git-dir"], ".git\n");
        let audit = Arc::new(MemoryAuditSink::new());
        let err = GitOps::new(runner, &path, &path, GitOpsOptions::default(), audit).unwrap_err();
        assert!(matches!(
            err,
            Error::GitGuard {
                kind: GitGuardKind::RepoRootNotAllowed,
                ..
            }
        ));
    }

    #[test]
    fn construction_allows_repo_root_when_opted_in() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        runner.expect(&["rev-parse", "--show-toplevel"], &format!("{}\n", path.display()));
        let audit = Arc::new(MemoryAuditSink::new());
        let ops = GitOps::new(
            runner,
            &path,
            &path,
            GitOpsOptions {
                allow_repo_root: true,
                ..Default::default()
            },
            audit,
        )
        .unwrap();
        assert_eq!(ops.repo_path(), path);
    }

    #[test]
    fn destructive_refused_without_opt_in_runs_zero_subprocesses() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        let ops = make_ops(runner.clone(), &path, false);
        runner.expect(&["rev-parse", "--abbrev-ref", "HEAD"], "feature/x\n");

        let err = ops.reset_hard("HEAD").unwrap_err();
        assert!(matches!(
            err,
            Error::GitGuard {
                kind: GitGuardKind::DestructiveNotAllowed,
                ..
            }
        ));
        // No `reset --hard` call should have been made.
        assert!(runner.calls().iter().all(|c| c != &vec!["reset", "--hard", "HEAD"]));
    }

    #[test]
    fn protected_branch_blocks_write_operation() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        let ops = make_ops(runner.clone(), &path, true);
        runner.expect(&["rev-parse", "--abbrev-ref", "HEAD"], "main\n");

        let err = ops.reset_hard("HEAD").unwrap_err();
        assert!(matches!(
            err,
            Error::GitGuard {
                kind: GitGuardKind::ProtectedBranch,
                ..
            }
        ));
    }

    #[test]
    fn successful_status_call_parses_porcelain() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        let ops = make_ops(runner.clone(), &path, false);
        runner.expect(
            &["status", "--porcelain"],
            "M  staged.txt\n?? untracked.txt\nUU conflicted.txt\n",
        );

        let status = ops.status().unwrap();
        assert!(!status.clean);
        assert_eq!(status.staged, vec!["staged.txt"]);
        assert_eq!(status.untracked, vec!["untracked.txt"]);
        assert_eq!(status.conflicted, vec!["conflicted.txt"]);
    }

    #[test]
    fn audited_on_both_success_and_failure() {
        let (_dir, path) = repo_fixture();
        let runner = Arc::new(StubRunner::new());
        let audit = Arc::new(MemoryAuditSink::new());
        runner.expect(&["rev-parse", "--show-toplevel"], &format!("{}\n", path.display()));
        runner.expect(&["rev-parse", "--git-dir"], "/repo/.git/worktrees/feat-1\n");
        let ops = GitOps::new(runner.clone(), &path, &path, GitOpsOptions::default(), audit.clone()).unwrap();
        runner.expect(&["rev-parse", "--abbrev-ref", "HEAD"], "feature/x\n");

        let _ = ops.reset_hard("HEAD");
        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].checks_passed);
        assert_eq!(entries[0].failure_reason.as_deref(), Some("DestructiveNotAllowed"));
    }
}
