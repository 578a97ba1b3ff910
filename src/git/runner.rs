use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::debug;

/// Result of running `git` once.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub duration: std::time::Duration,
}

/// Subprocess seam for the `git` executable.
///
/// Passed explicitly into `GitOps`/`WorktreeManager`/`MergeManager` at
/// construction, never looked up from global state, so tests can substitute
/// an in-memory stub that matches argument vectors to canned `{stdout, err}`
/// pairs instead of shelling out.
pub trait Runner: Send + Sync {
    fn run(&self, dir: &Path, args: &[&str]) -> RunOutput;

    /// Run with data piped to stdin before it is closed. Used by the
    /// conflict-resolver's `git apply`-style flows and `rebase --continue`
    /// editors that read from stdin.
    fn run_with_stdin(&self, dir: &Path, args: &[&str], stdin: &str) -> RunOutput;
}

/// Real `git` executable runner.
pub struct GitRunner;

impl Runner for GitRunner {
    fn run(&self, dir: &Path, args: &[&str]) -> RunOutput {
        let start = Instant::now();
        debug!(dir = %dir.display(), args = ?args, "git");
        let output = Command::new("git").args(args).current_dir(dir).output();
        finish(start, output)
    }

    fn run_with_stdin(&self, dir: &Path, args: &[&str], stdin: &str) -> RunOutput {
        use std::io::Write;
        let start = Instant::now();
        debug!(dir = %dir.display(), args = ?args, "git (stdin)");
        let child = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let output = child.and_then(|mut child| {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(stdin.as_bytes())?;
            }
            child.wait_with_output()
        });
        finish(start, output)
    }
}

fn finish(start: Instant, output: std::io::Result<std::process::Output>) -> RunOutput {
    let duration = start.elapsed();
    match output {
        Ok(output) => RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            duration,
        },
        Err(e) => RunOutput {
            stdout: String::new(),
            stderr: format!("failed to run git: {e}"),
            success: false,
            duration,
        },
    }
}

/// In-memory stub matching argument vectors to canned outputs, in order of
/// registration. Unmatched calls panic with the unexpected argument vector
/// so a missing stub fails the test loudly instead of hanging on a real
/// `git` invocation.
#[cfg(test)]
pub struct StubRunner {
    expectations: std::sync::Mutex<Vec<(Vec<String>, RunOutput)>>,
    calls: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
impl StubRunner {
    pub fn new() -> Self {
        Self {
            expectations: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn expect(&self, args: &[&str], stdout: &str) -> &Self {
        self.expect_result(args, stdout, "", true)
    }

    pub fn expect_result(&self, args: &[&str], stdout: &str, stderr: &str, success: bool) -> &Self {
        self.expectations.lock().unwrap().push((
            args.iter().map(|s| s.to_string()).collect(),
            RunOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                success,
                duration: std::time::Duration::from_millis(0),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, args: &[&str]) -> RunOutput {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.calls.lock().unwrap().push(owned.clone());
        let mut expectations = self.expectations.lock().unwrap();
        if let Some(pos) = expectations.iter().position(|(a, _)| a == &owned) {
            expectations.remove(pos).1
        } else {
            panic!("StubRunner: no expectation registered for {owned:?}");
        }
    }
}

#[cfg(test)]
impl Default for StubRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Runner for StubRunner {
    fn run(&self, _dir: &Path, args: &[&str]) -> RunOutput {
        self.resolve(args)
    }

    fn run_with_stdin(&self, _dir: &Path, args: &[&str], _stdin: &str) -> RunOutput {
        self.resolve(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_runner_returns_registered_output() {
        let stub = StubRunner::new();
        stub.expect(&["status", "--porcelain"], "");
        let out = stub.run(Path::new("/tmp"), &["status", "--porcelain"]);
        assert!(out.success);
        assert_eq!(stub.calls().len(), 1);
    }

    #[test]
    #[should_panic(expected = "no expectation registered")]
    fn stub_runner_panics_on_unmatched_call() {
        let stub = StubRunner::new();
        stub.run(Path::new("/tmp"), &["status"]);
    }
}
