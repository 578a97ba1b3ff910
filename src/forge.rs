use std::process::Command;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
}

#[derive(Debug, Clone)]
pub struct PrInfo {
    pub url: String,
    pub number: u64,
}

/// PR-creation interface, abstracted so the orchestrator never depends on a
/// specific forge backend directly.
#[async_trait::async_trait]
pub trait PrCreator: Send + Sync {
    async fn create_pr(&self, request: PrRequest) -> Result<PrInfo>;

    /// Look up an existing open PR for `head_branch`, if any.
    async fn find_existing_pr(&self, head_branch: &str) -> Result<Option<PrInfo>>;
}

/// Abstraction over `gh` CLI execution.
pub trait GhClient: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String>;
}

pub struct DefaultGhClient;

impl GhClient for DefaultGhClient {
    fn run(&self, args: &[&str]) -> Result<String> {
        retry_with_backoff(|| {
            let output = Command::new("gh")
                .args(args)
                .output()
                .map_err(|e| Error::Forge(format!("failed to run gh: {e}")))?;

            if output.status.success() {
                String::from_utf8(output.stdout).map_err(|e| Error::Forge(format!("invalid utf8 from gh: {e}")))
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::Forge(format!("gh failed: {stderr}")))
            }
        })
    }
}

fn retry_with_backoff<F, T>(f: F) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_RETRIES {
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if attempt < MAX_RETRIES => {
                warn!(attempt, error = %e, backoff_ms, "retrying gh invocation after transient error");
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!()
}

#[derive(Debug, Deserialize)]
struct GhPrView {
    number: u64,
    url: String,
}

/// `gh`-backed PR creation. `create_pr`/`find_existing_pr` run `gh`
/// synchronously on a blocking thread so they can implement the async
/// `PrCreator` trait without pulling in an HTTP client.
pub struct GitHubForge {
    base_branch: String,
    client: Box<dyn GhClient>,
}

impl GitHubForge {
    pub fn new(base_branch: impl Into<String>) -> Self {
        Self {
            base_branch: base_branch.into(),
            client: Box::new(DefaultGhClient),
        }
    }

    #[cfg(test)]
    fn with_client(base_branch: &str, client: Box<dyn GhClient>) -> Self {
        Self {
            base_branch: base_branch.to_string(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl PrCreator for GitHubForge {
    async fn create_pr(&self, request: PrRequest) -> Result<PrInfo> {
        let args = vec![
            "pr",
            "create",
            "--base",
            &self.base_branch,
            "--head",
            &request.head_branch,
            "--title",
            &request.title,
            "--body",
            &request.body,
            "--json",
            "number,url",
        ];
        let json = self.client.run(&args)?;
        let view: GhPrView = serde_json::from_str(&json).map_err(|e| Error::Forge(format!("failed to parse gh pr create output: {e}")))?;
        Ok(PrInfo {
            url: view.url,
            number: view.number,
        })
    }

    async fn find_existing_pr(&self, head_branch: &str) -> Result<Option<PrInfo>> {
        let args = vec!["pr", "list", "--head", head_branch, "--state", "open", "--json", "number,url"];
        let json = self.client.run(&args)?;
        let views: Vec<GhPrView> = serde_json::from_str(&json).map_err(|e| Error::Forge(format!("failed to parse gh pr list output: {e}")))?;
        Ok(views.into_iter().next().map(|v| PrInfo {
            url: v.url,
            number: v.number,
        }))
    }
}
