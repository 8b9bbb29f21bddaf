//! Workspace-sandboxed file tools (spec §4.12).
//!
//! Every path is resolved against a configured root and rejected if the
//! resolution escapes it, including through a symlink target.

use super::Tool;
use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

/// Resolves `path` (absolute or relative to `root`) and rejects any result,
/// direct or via symlink, that falls outside `root`.
fn resolve_in_workspace(root: &Path, path: &str) -> SandboxResult<PathBuf> {
    let candidate = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        root.join(path)
    };

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| SandboxError::ToolFailed(e.to_string()))?
    } else {
        // File doesn't exist yet (write target): canonicalize the parent and
        // rejoin the file name so the escape check still applies.
        let parent = candidate.parent().unwrap_or(root);
        let canon_parent = parent
            .canonicalize()
            .map_err(|e| SandboxError::ToolFailed(e.to_string()))?;
        canon_parent.join(candidate.file_name().unwrap_or_default())
    };

    if !resolved.starts_with(root) {
        return Err(SandboxError::PathEscape(path.to_string()));
    }

    if resolved.is_symlink() {
        let target = resolved
            .read_link()
            .map_err(|e| SandboxError::ToolFailed(e.to_string()))?;
        let target_resolved = if target.is_absolute() {
            target
        } else {
            resolved.parent().unwrap_or(root).join(target)
        };
        let target_resolved = target_resolved
            .canonicalize()
            .map_err(|e| SandboxError::ToolFailed(e.to_string()))?;
        if !target_resolved.starts_with(root) {
            return Err(SandboxError::SymlinkEscape(path.to_string()));
        }
    }

    Ok(resolved)
}

fn arg_str<'a>(args: &'a Value, key: &str, tool: &str) -> SandboxResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SandboxError::InvalidArgs {
            tool: tool.to_string(),
            message: format!("missing required string argument `{key}`"),
        })
}

pub struct ReadFileTool {
    workspace_root: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read file contents from the workspace"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"path": "string"})
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let path = arg_str(&args, "path", self.name())?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        let metadata = tokio::fs::metadata(&resolved).await?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(SandboxError::ToolFailed(format!(
                "{path} is {} bytes, exceeds the {MAX_READ_BYTES} byte read limit",
                metadata.len()
            )));
        }
        let content = tokio::fs::read_to_string(&resolved).await?;
        Ok(serde_json::json!({"path": path, "content": content}))
    }
}

pub struct WriteFileTool {
    workspace_root: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"path": "string", "content": "string"})
    }
    fn requires_confirmation(&self) -> bool {
        true
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let path = arg_str(&args, "path", self.name())?;
        let content = arg_str(&args, "content", self.name())?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(serde_json::json!({"path": path, "bytesWritten": content.len()}))
    }
}

pub struct DeleteFileTool {
    workspace_root: PathBuf,
}

impl DeleteFileTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }
    fn description(&self) -> &str {
        "Delete a file from the workspace"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"path": "string"})
    }
    fn requires_confirmation(&self) -> bool {
        true
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let path = arg_str(&args, "path", self.name())?;
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        tokio::fs::remove_file(&resolved).await?;
        Ok(serde_json::json!({"path": path, "deleted": true}))
    }
}

pub struct ListFilesTool {
    workspace_root: PathBuf,
}

impl ListFilesTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }
    fn description(&self) -> &str {
        "List files and directories under a workspace path"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"path": "string"})
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = resolve_in_workspace(&self.workspace_root, path)?;
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&resolved).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(serde_json::json!({"name": name, "isDir": is_dir}));
        }
        Ok(serde_json::json!({"path": path, "entries": entries}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_round_trip_stays_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileTool::new(dir.path().to_path_buf());
        write
            .execute(serde_json::json!({"path": "notes.txt", "content": "hello"}))
            .await
            .unwrap();

        let read = ReadFileTool::new(dir.path().to_path_buf());
        let result = read.execute(serde_json::json!({"path": "notes.txt"})).await.unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFileTool::new(dir.path().to_path_buf());
        let result = read.execute(serde_json::json!({"path": "../../etc/passwd"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn symlink_escaping_workspace_is_rejected() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "top secret").unwrap();

        let link = workspace.path().join("link.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let read = ReadFileTool::new(workspace.path().to_path_buf());
        let result = read.execute(serde_json::json!({"path": "link.txt"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_requires_confirmation_flag_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let delete = DeleteFileTool::new(dir.path().to_path_buf());
        assert!(delete.requires_confirmation());
    }
}
