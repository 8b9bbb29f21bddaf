//! Recursive text search within the workspace.

use super::Tool;
use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use walkdir::WalkDir;

const MAX_MATCHES: usize = 200;

pub struct SearchCodeTool {
    workspace_root: PathBuf,
}

impl SearchCodeTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }
    fn description(&self) -> &str {
        "Search workspace files for lines matching a regular expression"
    }
    fn schema(&self) -> Value {
        serde_json::json!({"pattern": "string", "path": "string (optional)"})
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value> {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::InvalidArgs {
                tool: self.name().to_string(),
                message: "missing required string argument `pattern`".to_string(),
            })?;
        let regex = Regex::new(pattern).map_err(|e| SandboxError::InvalidArgs {
            tool: self.name().to_string(),
            message: format!("invalid regular expression: {e}"),
        })?;

        let search_root = match args.get("path").and_then(Value::as_str) {
            Some(sub) => self.workspace_root.join(sub),
            None => self.workspace_root.clone(),
        };
        let search_root = search_root
            .canonicalize()
            .map_err(|e| SandboxError::ToolFailed(e.to_string()))?;
        if !search_root.starts_with(&self.workspace_root) {
            return Err(SandboxError::PathEscape(search_root.to_string_lossy().to_string()));
        }

        let mut matches = Vec::new();
        'walk: for entry in WalkDir::new(&search_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(serde_json::json!({
                        "path": entry.path().strip_prefix(&self.workspace_root).unwrap_or(entry.path()).to_string_lossy(),
                        "line": line_no + 1,
                        "text": line,
                    }));
                    if matches.len() >= MAX_MATCHES {
                        break 'walk;
                    }
                }
            }
        }

        Ok(serde_json::json!({"matches": matches, "truncated": matches.len() >= MAX_MATCHES}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    todo!();\n}\n").unwrap();
        let tool = SearchCodeTool::new(dir.path().canonicalize().unwrap());
        let result = tool.execute(serde_json::json!({"pattern": "todo!"})).await.unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 2);
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchCodeTool::new(dir.path().canonicalize().unwrap());
        let result = tool.execute(serde_json::json!({"pattern": "("})).await;
        assert!(result.is_err());
    }
}
