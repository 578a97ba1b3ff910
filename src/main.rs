use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use featureloop::audit::JsonlAuditSink;
use featureloop::cli::{Cli, Command};
use featureloop::config::Config;
use featureloop::error::Result;
use featureloop::events::Bus;
use featureloop::feature::state::FeatureStatus;
use featureloop::feature::workflow::{Workflow, WorkflowConfig};
use featureloop::git::ops::{BranchGuard, GitOps, GitOpsOptions};
use featureloop::git::runner::GitRunner;
use featureloop::git::worktree::WorktreeManager;
use featureloop::oracle::{ClaudeOracle, CodexOracle, Oracle};

const EXIT_OK: i32 = 0;
const EXIT_REVIEW_BLOCKED: i32 = 1;
const EXIT_FAILED: i32 = 2;
const EXIT_CONFIG_ERROR: i32 = 3;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .init();
}

fn build_oracle(config: &Config) -> Arc<dyn Oracle> {
    let timeout = Some(Duration::from_secs(config.agent_timeout_secs));
    match config.oracle_runner.as_str() {
        "codex" => Arc::new(CodexOracle {
            agent_binary: config.agent_binary.clone(),
            model: config.agent_model.clone(),
            timeout,
        }),
        _ => Arc::new(ClaudeOracle {
            agent_binary: config.agent_binary.clone(),
            model: config.agent_model.clone(),
            timeout,
        }),
    }
}

/// Create (or reuse) the worktree for `prd_id` and bind a `GitOps` to it.
async fn prepare_worktree(config: &Config, prd_id: &str) -> Result<(PathBuf, GitOps)> {
    let repo_root = std::env::current_dir()?.canonicalize()?;
    let worktree_base = PathBuf::from(&config.worktree_dir);
    let runner = Arc::new(GitRunner);
    let audit = Arc::new(JsonlAuditSink::open(&config.audit_log_path)?);

    let manager = WorktreeManager::new(
        runner.clone(),
        repo_root,
        worktree_base,
        config.base_branch.clone(),
        config.worktree_branch_prefix.clone(),
        audit.clone(),
    );

    let existing = manager.list()?.into_iter().find(|w| w.unit_id == prd_id);

    let worktree_info = match existing {
        Some(info) => info,
        None => manager.create(prd_id).await?,
    };

    let branch_guard = BranchGuard {
        expected_branch: Some(worktree_info.branch.clone()),
        allowed_remotes: vec!["origin".to_string()],
        ..BranchGuard::with_defaults()
    };

    let git = GitOps::new(
        runner,
        &worktree_info.path,
        &config.worktree_dir,
        GitOpsOptions {
            allow_repo_root: false,
            allow_destructive: false,
            branch_guard,
        },
        audit,
    )?;

    Ok((worktree_info.path, git))
}

async fn run_workflow(config: &Config, prd_path: &str) -> Result<FeatureStatus> {
    let prd = featureloop::feature::prd::read(prd_path)?;
    let (worktree_path, git) = prepare_worktree(config, &prd.frontmatter.prd_id).await?;

    let bus = Arc::new(Bus::new(config.event_bus_capacity));
    let oracle = build_oracle(config);
    let workflow_config = WorkflowConfig {
        max_review_iterations: config.max_review_iterations,
        retry_on_malformed: config.retry_on_malformed,
        push_retries: config.push_retries,
        dry_run: config.dry_run,
    };

    let mut workflow = Workflow::new(
        prd.frontmatter.prd_id.clone(),
        git,
        worktree_path,
        oracle,
        bus,
        workflow_config,
    );

    if let Some(persisted) = prd.frontmatter.feature_status {
        if persisted != FeatureStatus::Pending {
            workflow.restore_status(persisted);
        }
    }

    match workflow.status() {
        FeatureStatus::Pending => {
            workflow.start().await?;
            workflow.generate_specs(&prd.body).await?;
            workflow.review_specs().await?;
        }
        FeatureStatus::ReviewingSpecs | FeatureStatus::UpdatingSpecs => {
            workflow.review_specs().await?;
        }
        FeatureStatus::ReviewBlocked => {
            workflow.resume(false).await?;
        }
        _ => {}
    }

    if workflow.status() == FeatureStatus::ValidatingSpecs {
        workflow.validate_specs().await?;
    }
    if workflow.status() == FeatureStatus::GeneratingTasks {
        workflow.generate_tasks().await?;
        workflow.commit_specs()?;
    }

    let mut frontmatter = prd.frontmatter;
    frontmatter.feature_status = Some(workflow.status());
    featureloop::feature::prd::rewrite(prd_path, &frontmatter, &prd.body)?;

    Ok(workflow.status())
}

async fn run_resume(config: &Config, prd_path: &str, skip_review: bool) -> Result<FeatureStatus> {
    let prd = featureloop::feature::prd::read(prd_path)?;
    let (worktree_path, git) = prepare_worktree(config, &prd.frontmatter.prd_id).await?;

    let bus = Arc::new(Bus::new(config.event_bus_capacity));
    let oracle = build_oracle(config);
    let workflow_config = WorkflowConfig {
        max_review_iterations: config.max_review_iterations,
        retry_on_malformed: config.retry_on_malformed,
        push_retries: config.push_retries,
        dry_run: config.dry_run,
    };

    let mut workflow = Workflow::new(
        prd.frontmatter.prd_id.clone(),
        git,
        worktree_path,
        oracle,
        bus,
        workflow_config,
    );
    workflow.restore_status(FeatureStatus::ReviewBlocked);
    workflow.resume(skip_review).await?;

    if workflow.status() == FeatureStatus::ValidatingSpecs {
        workflow.validate_specs().await?;
    }
    if workflow.status() == FeatureStatus::GeneratingTasks {
        workflow.generate_tasks().await?;
        workflow.commit_specs()?;
    }

    let mut frontmatter = prd.frontmatter;
    frontmatter.feature_status = Some(workflow.status());
    featureloop::feature::prd::rewrite(prd_path, &frontmatter, &prd.body)?;

    Ok(workflow.status())
}

fn print_status(prd_path: &str) -> Result<()> {
    let prd = featureloop::feature::prd::read(prd_path)?;
    let status = prd
        .frontmatter
        .feature_status
        .unwrap_or(FeatureStatus::Pending);
    println!("{}: {}", prd.frontmatter.prd_id, status);
    if let Some(iterations) = prd.frontmatter.spec_review_iterations {
        println!("spec_review_iterations: {iterations}");
    }
    if let Some(last) = &prd.frontmatter.last_spec_review {
        println!("last_spec_review: {last}");
    }
    Ok(())
}

fn exit_code_for(status: FeatureStatus) -> i32 {
    match status {
        FeatureStatus::Complete | FeatureStatus::UnitsComplete => EXIT_OK,
        FeatureStatus::ReviewBlocked => EXIT_REVIEW_BLOCKED,
        FeatureStatus::Failed => EXIT_FAILED,
        _ => EXIT_OK,
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    info!("featureloop starting");

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    info!(?config, "config loaded");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let exit_code = runtime.block_on(async {
        match &cli.command {
            Command::Run { prd_path } => match run_workflow(&config, prd_path).await {
                Ok(status) => {
                    info!(%status, "workflow finished");
                    exit_code_for(status)
                }
                Err(e) => {
                    error!(error = %e, "workflow failed");
                    EXIT_FAILED
                }
            },
            Command::Status { prd_path } => match print_status(prd_path) {
                Ok(()) => EXIT_OK,
                Err(e) => {
                    eprintln!("error: {e}");
                    EXIT_CONFIG_ERROR
                }
            },
            Command::Resume {
                prd_path,
                skip_review,
            } => match run_resume(&config, prd_path, *skip_review).await {
                Ok(status) => {
                    info!(%status, "resume finished");
                    exit_code_for(status)
                }
                Err(e) => {
                    error!(error = %e, "resume failed");
                    EXIT_FAILED
                }
            },
        }
    });

    std::process::exit(exit_code);
}
