use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

/// Which call site is invoking the oracle. Used only for the process log
/// prefix; the prompt text itself fully determines the agent's behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OraclePhase {
    GenerateSpecs,
    Review,
    FeedbackApply,
    GenerateTasks,
    ConflictResolve,
    DriftClassify,
}

impl fmt::Display for OraclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OraclePhase::GenerateSpecs => "generate_specs",
            OraclePhase::Review => "review",
            OraclePhase::FeedbackApply => "feedback_apply",
            OraclePhase::GenerateTasks => "generate_tasks",
            OraclePhase::ConflictResolve => "conflict_resolve",
            OraclePhase::DriftClassify => "drift_classify",
        };
        write!(f, "{s}")
    }
}

/// A single LLM agent invocation, the oracle the core treats as an
/// external collaborator: given a phase and a rendered prompt, it returns
/// raw text. Reviewer/feedback-applier/conflict-resolver/drift-classifier
/// are all the same contract with different prompts. `async_trait` makes
/// this usable as `Arc<dyn Oracle>` across the workflow's components.
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    async fn invoke(&self, phase: OraclePhase, prompt: &str, working_dir: &Path) -> Result<String>;
}

/// Invokes the agent by passing the prompt as a `-p` positional argument.
pub struct ClaudeOracle {
    pub agent_binary: String,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

impl ClaudeOracle {
    fn build_command(&self, prompt: &str) -> (String, Vec<String>) {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("-p".to_string());
        args.push(prompt.to_string());
        (self.agent_binary.clone(), args)
    }
}

#[async_trait::async_trait]
impl Oracle for ClaudeOracle {
    async fn invoke(&self, phase: OraclePhase, prompt: &str, working_dir: &Path) -> Result<String> {
        let (command, args) = self.build_command(prompt);
        run_oracle_process(command, args, None, self.timeout, phase, working_dir).await
    }
}

/// Invokes the agent with the prompt piped over stdin.
pub struct CodexOracle {
    pub agent_binary: String,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

impl CodexOracle {
    fn build_command(&self) -> (String, Vec<String>) {
        let mut args = vec!["--quiet".to_string(), "--full-auto".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        (self.agent_binary.clone(), args)
    }
}

#[async_trait::async_trait]
impl Oracle for CodexOracle {
    async fn invoke(&self, phase: OraclePhase, prompt: &str, working_dir: &Path) -> Result<String> {
        let (command, args) = self.build_command();
        run_oracle_process(command, args, Some(prompt.to_string()), self.timeout, phase, working_dir).await
    }
}

async fn run_oracle_process(
    command: String,
    args: Vec<String>,
    stdin_data: Option<String>,
    timeout: Option<Duration>,
    phase: OraclePhase,
    working_dir: &Path,
) -> Result<String> {
    let config = ProcessConfig {
        command,
        args,
        working_dir: working_dir.to_path_buf(),
        timeout,
        log_prefix: format!("oracle:{phase}"),
        env: vec![],
        stdin_data,
    };
    let output = spawn_and_stream(config).await?;

    if let Some(sig) = output.signal {
        return Err(Error::Oracle(format!("agent killed by signal {sig}")));
    }
    if output.exit_code != 0 {
        return Err(Error::Oracle(format!("agent exited with code {}", output.exit_code)));
    }
    Ok(output.stdout_lines.join("\n"))
}
