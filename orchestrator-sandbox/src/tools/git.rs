//! Git tools that shell out to the `git` binary (no VCS crate in the corpus).

use super::Tool;
use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;

async fn run_git(workspace_root: &std::path::Path, args: &[&str]) -> SandboxResult<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace_root)
        .args(args)
        .output()
        .await
        .map_err(|e| SandboxError::ToolFailed(format!("failed to spawn git: {e}")))?;

    if !output.status.success() {
        return Err(SandboxError::ToolFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub struct GitStatusTool {
    workspace_root: PathBuf,
}

impl GitStatusTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }
    fn description(&self) -> &str {
        "Show the working tree status"
    }
    fn schema(&self) -> Value {
        serde_json::json!({})
    }
    async fn execute(&self, _args: Value) -> SandboxResult<Value> {
        let status = run_git(&self.workspace_root, &["status", "--porcelain"]).await?;
        Ok(serde_json::json!({"status": status}))
    }
}

pub struct GitDiffTool {
    workspace_root: PathBuf,
}

impl GitDiffTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }
    fn description(&self) -> &str {
        "Show unstaged changes, optionally for a single path"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"path": "string (optional)"})
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let diff = match args.get("path").and_then(Value::as_str) {
            Some(path) => run_git(&self.workspace_root, &["diff", "--", path]).await?,
            None => run_git(&self.workspace_root, &["diff"]).await?,
        };
        Ok(serde_json::json!({"diff": diff}))
    }
}

pub struct GitCommitTool {
    workspace_root: PathBuf,
}

impl GitCommitTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }
    fn description(&self) -> &str {
        "Stage all changes and create a commit"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"message": "string"})
    }
    fn requires_confirmation(&self) -> bool {
        true
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::InvalidArgs {
                tool: self.name().to_string(),
                message: "missing required string argument `message`".to_string(),
            })?;
        run_git(&self.workspace_root, &["add", "-A"]).await?;
        let out = run_git(&self.workspace_root, &["commit", "-m", message]).await?;
        Ok(serde_json::json!({"output": out}))
    }
}
