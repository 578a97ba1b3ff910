use clap::{Parser, Subcommand};

/// featureloop — drives feature PRDs through spec review, task generation,
/// and PR creation.
#[derive(Parser, Debug)]
#[command(name = "featureloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Worktree base directory
    #[arg(long, global = true)]
    pub worktree_dir: Option<String>,

    /// Prefix applied to generated worktree branch names
    #[arg(long, global = true)]
    pub worktree_branch_prefix: Option<String>,

    /// Branch new worktrees are created from
    #[arg(long, global = true)]
    pub base_branch: Option<String>,

    /// Maximum spec-review iterations before blocking
    #[arg(long, global = true)]
    pub max_review_iterations: Option<u32>,

    /// Malformed-review-output retries per iteration
    #[arg(long, global = true)]
    pub retry_on_malformed: Option<u32>,

    /// Push retries after a successful commit
    #[arg(long, global = true)]
    pub push_retries: Option<u32>,

    /// Conflict-resolution attempts before a merge is abandoned
    #[arg(long, global = true)]
    pub max_conflict_attempts: Option<u32>,

    /// Drift-check polling interval in seconds
    #[arg(long, global = true)]
    pub drift_check_interval_secs: Option<u64>,

    /// Agent binary to use (default: claude)
    #[arg(long, global = true)]
    pub agent_binary: Option<String>,

    /// Model for the agent to use
    #[arg(long, global = true)]
    pub agent_model: Option<String>,

    /// Agent timeout in seconds
    #[arg(long, global = true)]
    pub agent_timeout_secs: Option<u64>,

    /// Oracle backend to use (claude, codex)
    #[arg(long, global = true)]
    pub oracle_runner: Option<String>,

    /// PR-creation backend to use (github)
    #[arg(long, global = true)]
    pub forge: Option<String>,

    /// Label recorded on created PRs
    #[arg(long, global = true)]
    pub label: Option<String>,

    /// Go through the full loop without committing, pushing, or opening a PR
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Path to the JSONL audit log
    #[arg(long, global = true)]
    pub audit_log_path: Option<String>,

    /// Event bus channel capacity
    #[arg(long, global = true)]
    pub event_bus_capacity: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a PRD through the full workflow until complete, blocked, or failed
    Run {
        /// Path to the PRD markdown file
        prd_path: String,
    },
    /// Print the current workflow status for a PRD without mutating anything
    Status {
        /// Path to the PRD markdown file
        prd_path: String,
    },
    /// Resume a PRD that is sitting in `review_blocked`
    Resume {
        /// Path to the PRD markdown file
        prd_path: String,
        /// Skip straight to `validating_specs` instead of re-running review
        #[arg(long)]
        skip_review: bool,
    },
}
