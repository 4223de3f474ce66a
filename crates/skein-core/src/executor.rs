//! Ready-made leaf executions
//!
//! - [`FnExecution`]: wraps an async closure
//! - [`ShellExecution`]: runs a child process

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::runner::RunContext;
use crate::task::Execution;

/// Execution backed by an async closure.
///
/// The closure receives its own handle to the run context, so it can move
/// it into the returned future.
pub struct FnExecution<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnExecution<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    /// Wrap a closure
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Execution for FnExecution<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &RunContext) -> anyhow::Result<Value> {
        (self.func)(ctx.clone()).await
    }
}

/// Execution that runs a program as a child process.
///
/// Succeeds with `{stdout, stderr, exit_code}` when the process exits with
/// status zero. The child is killed if the run is cancelled.
#[derive(Debug, Clone)]
pub struct ShellExecution {
    name: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ShellExecution {
    /// Create a shell execution
    pub fn new<I, S>(name: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Execution for ShellExecution {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &RunContext) -> anyhow::Result<Value> {
        debug!(program = %self.program, args = ?self.args, "Spawning command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            warn!(program = %self.program, error = %e, "Failed to spawn command");
            anyhow::anyhow!("failed to spawn {}: {}", self.program, e)
        })?;

        // Dropping the wait future on cancellation drops the child, which
        // kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = ctx.cancellation().cancelled() => {
                anyhow::bail!("{} cancelled", self.program);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }
}
