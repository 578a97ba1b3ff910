mod common;

use std::sync::Arc;

use featureloop::audit::MemoryAuditSink;
use featureloop::git::runner::GitRunner;
use featureloop::git::worktree::WorktreeManager;

fn manager(repo_dir: &std::path::Path, base_dir: std::path::PathBuf) -> WorktreeManager {
    WorktreeManager::new(
        Arc::new(GitRunner),
        repo_dir.to_path_buf(),
        base_dir,
        "main".to_string(),
        "featureloop/".to_string(),
        Arc::new(MemoryAuditSink::new()),
    )
}

#[tokio::test]
async fn create_adds_a_worktree_on_a_fresh_branch() {
    let (_bare, repo) = common::setup_git_repo();
    let base = tempfile::tempdir().unwrap();
    let mgr = manager(repo.path(), base.path().to_path_buf());

    let info = mgr.create("feat-1").await.unwrap();

    assert_eq!(info.unit_id, "feat-1");
    assert_eq!(info.branch, "featureloop/feat-1");
    assert!(info.path.join(".git").exists());
}

#[tokio::test]
async fn list_finds_a_created_worktree() {
    let (_bare, repo) = common::setup_git_repo();
    let base = tempfile::tempdir().unwrap();
    let mgr = manager(repo.path(), base.path().to_path_buf());

    mgr.create("feat-2").await.unwrap();
    let found = mgr.list().unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit_id, "feat-2");
    assert_eq!(found[0].branch, "featureloop/feat-2");
}

#[tokio::test]
async fn remove_deletes_the_worktree_directory() {
    let (_bare, repo) = common::setup_git_repo();
    let base = tempfile::tempdir().unwrap();
    let mgr = manager(repo.path(), base.path().to_path_buf());

    let info = mgr.create("feat-3").await.unwrap();
    assert!(info.path.exists());

    mgr.remove(&info.path).unwrap();
    assert!(!info.path.exists());
    assert!(mgr.list().unwrap().is_empty());
}

#[tokio::test]
async fn list_is_empty_when_no_worktrees_created() {
    let (_bare, repo) = common::setup_git_repo();
    let base = tempfile::tempdir().unwrap();
    let mgr = manager(repo.path(), base.path().to_path_buf());

    assert!(mgr.list().unwrap().is_empty());
}
