// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shell command execution tool

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Tool for executing shell commands
pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_command".to_string(),
            description: "Execute a shell command in the working directory and return its stdout, stderr, and exit code. Commands run via 'sh -c'.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("command", "The shell command to execute", true)
                .build(),
        }
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let command = input["command"]
            .as_str()
            .or_else(|| input["cmd"].as_str())
            .or_else(|| input["script"].as_str())
            .ok_or_else(|| {
                crate::error::CodaError::InvalidInput("command is required".to_string())
            })?;

        let output = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&context.working_directory)
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => {
                return Ok(ToolResult::error(
                    tool_use_id,
                    format!("Failed to spawn command: {}", e),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut text = String::new();
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("stderr:\n");
            text.push_str(&stderr);
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }
        text.push_str(&format!("\n\nexit code: {}", exit_code));

        if output.status.success() {
            Ok(ToolResult::success(tool_use_id, text))
        } else {
            Ok(ToolResult::error(tool_use_id, text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn create_test_context(temp_dir: &TempDir) -> ToolContext {
        ToolContext::new(
            temp_dir.path().to_path_buf(),
            Some(temp_dir.path().to_path_buf()),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_command_captures_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ExecuteCommandTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"command": "echo hello"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("hello"));
        assert!(result.output_text().contains("exit code: 0"));
    }

    #[tokio::test]
    async fn test_failing_command_is_error_result() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ExecuteCommandTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"command": "exit 3"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("exit code: 3"));
    }

    #[tokio::test]
    async fn test_command_captures_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ExecuteCommandTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"command": "echo oops >&2"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.output_text().contains("stderr:"));
        assert!(result.output_text().contains("oops"));
    }

    #[tokio::test]
    async fn test_command_runs_in_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("marker.txt"), "").unwrap();

        let tool = ExecuteCommandTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"command": "ls"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.output_text().contains("marker.txt"));
    }

    #[test]
    fn test_not_read_only() {
        assert!(!ExecuteCommandTool.is_read_only());
    }
}
