use std::path::Path;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub worktree_dir: Option<String>,
    pub worktree_branch_prefix: Option<String>,
    pub base_branch: Option<String>,
    pub max_review_iterations: Option<u32>,
    pub retry_on_malformed: Option<u32>,
    pub push_retries: Option<u32>,
    pub max_conflict_attempts: Option<u32>,
    pub drift_check_interval_secs: Option<u64>,
    pub agent_binary: Option<String>,
    pub agent_model: Option<String>,
    pub agent_timeout_secs: Option<u64>,
    pub oracle_runner: Option<String>,
    pub forge: Option<String>,
    pub label: Option<String>,
    pub dry_run: Option<bool>,
    pub audit_log_path: Option<String>,
    pub event_bus_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub worktree_dir: String,
    pub worktree_branch_prefix: String,
    pub base_branch: String,
    pub max_review_iterations: u32,
    pub retry_on_malformed: u32,
    pub push_retries: u32,
    pub max_conflict_attempts: u32,
    pub drift_check_interval_secs: u64,
    pub agent_binary: String,
    pub agent_model: Option<String>,
    pub agent_timeout_secs: u64,
    pub oracle_runner: String,
    pub forge: String,
    pub label: String,
    pub dry_run: bool,
    pub audit_log_path: String,
    pub event_bus_capacity: usize,
}

const DEFAULT_CONFIG_FILE: &str = ".featureloop/config.toml";

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_from(cli, Path::new("."))
    }

    pub fn load_from(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let file_config = match &cli.config {
            Some(explicit_path) => {
                let path = Path::new(explicit_path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                let content = std::fs::read_to_string(path)?;
                parse_config(&content)?
            }
            None => {
                let path = project_dir.join(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    let content = std::fs::read_to_string(&path)?;
                    parse_config(&content)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        merge(file_config, cli)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    Ok(config)
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let oracle_runner = cli
        .oracle_runner
        .clone()
        .or(file.oracle_runner)
        .unwrap_or_else(|| "claude".to_string());

    let default_binary = match oracle_runner.as_str() {
        "codex" => "codex",
        _ => "claude",
    };
    let default_model = match oracle_runner.as_str() {
        "codex" => Some("gpt-5.3-codex"),
        _ => None,
    };

    let config = Config {
        worktree_dir: cli
            .worktree_dir
            .clone()
            .or(file.worktree_dir)
            .unwrap_or_else(|| "../featureloop-worktrees".to_string()),
        worktree_branch_prefix: cli
            .worktree_branch_prefix
            .clone()
            .or(file.worktree_branch_prefix)
            .unwrap_or_else(|| "feature/".to_string()),
        base_branch: cli
            .base_branch
            .clone()
            .or(file.base_branch)
            .unwrap_or_else(|| "main".to_string()),
        max_review_iterations: cli
            .max_review_iterations
            .or(file.max_review_iterations)
            .unwrap_or(3),
        retry_on_malformed: cli
            .retry_on_malformed
            .or(file.retry_on_malformed)
            .unwrap_or(1),
        push_retries: cli.push_retries.or(file.push_retries).unwrap_or(1),
        max_conflict_attempts: cli
            .max_conflict_attempts
            .or(file.max_conflict_attempts)
            .unwrap_or(3),
        drift_check_interval_secs: cli
            .drift_check_interval_secs
            .or(file.drift_check_interval_secs)
            .unwrap_or(300),
        agent_binary: cli
            .agent_binary
            .clone()
            .or(file.agent_binary)
            .unwrap_or_else(|| default_binary.to_string()),
        agent_model: cli
            .agent_model
            .clone()
            .or(file.agent_model)
            .or_else(|| default_model.map(str::to_string)),
        agent_timeout_secs: cli
            .agent_timeout_secs
            .or(file.agent_timeout_secs)
            .unwrap_or(600),
        oracle_runner,
        forge: cli
            .forge
            .clone()
            .or(file.forge)
            .unwrap_or_else(|| "github".to_string()),
        label: cli
            .label
            .clone()
            .or(file.label)
            .unwrap_or_else(|| "featureloop".to_string()),
        dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
        audit_log_path: cli
            .audit_log_path
            .clone()
            .or(file.audit_log_path)
            .unwrap_or_else(|| ".featureloop/audit.jsonl".to_string()),
        event_bus_capacity: cli
            .event_bus_capacity
            .or(file.event_bus_capacity)
            .unwrap_or(256),
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.oracle_runner.as_str() {
        "claude" | "codex" => {}
        other => {
            return Err(Error::ConfigValidation(format!(
                "unknown oracle_runner: {other} (expected: claude, codex)"
            )));
        }
    }
    match config.forge.as_str() {
        "github" => {}
        other => {
            return Err(Error::ConfigValidation(format!(
                "unknown forge: {other} (expected: github)"
            )));
        }
    }
    if config.max_review_iterations == 0 {
        return Err(Error::ConfigValidation(
            "max_review_iterations must be > 0".to_string(),
        ));
    }
    if config.drift_check_interval_secs == 0 {
        return Err(Error::ConfigValidation(
            "drift_check_interval_secs must be > 0".to_string(),
        ));
    }
    if config.event_bus_capacity == 0 {
        return Err(Error::ConfigValidation(
            "event_bus_capacity must be > 0".to_string(),
        ));
    }
    Ok(())
}
