// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! File reading tool

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Individual lines longer than this are cut
const MAX_LINE_LENGTH: usize = 500;
/// Default number of lines returned when no limit is given
const DEFAULT_LINE_LIMIT: usize = 2000;

/// Tool for reading file contents
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a file. Returns the file content with line numbers. Supports reading a specific range with offset and limit.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("filePath", "The path to the file to read", true)
                .integer("offset", "Line number to start reading from (1-based, default 1)", false)
                .integer("limit", "Maximum number of lines to read (default 2000)", false)
                .build(),
        }
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let path_str = input["filePath"]
            .as_str()
            .or_else(|| input["file_path"].as_str())
            .or_else(|| input["path"].as_str())
            .or_else(|| input["file"].as_str())
            .ok_or_else(|| {
                crate::error::CodaError::InvalidInput("filePath is required".to_string())
            })?;

        let offset = input["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = input["limit"].as_u64().unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let path = context.resolve_path(path_str);

        if !path.exists() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("File not found: {}", path.display()),
            ));
        }

        if path.is_dir() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("{} is a directory, use list_files instead", path.display()),
            ));
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolResult::error(
                    tool_use_id,
                    format!("Failed to read file: {}", e),
                ));
            }
        };

        let total_lines = content.lines().count();
        let mut output = String::new();

        for (i, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            let display_line = if line.len() > MAX_LINE_LENGTH {
                let mut cut = MAX_LINE_LENGTH;
                while !line.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}... (line truncated)", &line[..cut])
            } else {
                line.to_string()
            };
            output.push_str(&format!("{:>6}\t{}\n", i + 1, display_line));
        }

        if output.is_empty() {
            output = format!("(file is empty or offset {} is past the end)", offset);
        } else if offset - 1 + limit < total_lines {
            output.push_str(&format!(
                "... ({} more lines, use offset to continue)\n",
                total_lines - (offset - 1) - limit
            ));
        }

        Ok(ToolResult::success(tool_use_id, output))
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

    #[test]
    fn test_tool_is_read_only() {
        let tool = ReadFileTool;
        assert!(tool.is_read_only());
        assert!(tool.mutated_paths(&serde_json::json!({"filePath": "a"})).is_empty());
    }

    #[tokio::test]
    async fn test_read_file_with_line_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        std::fs::write(&file_path, "first\nsecond\nthird").unwrap();

        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "test.txt"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("1\tfirst"));
        assert!(result.output_text().contains("3\tthird"));
    }

    #[tokio::test]
    async fn test_read_with_offset_and_limit() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        let content: String = (1..=10).map(|i| format!("line{}\n", i)).collect();
        std::fs::write(&file_path, content).unwrap();

        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "test.txt", "offset": 3, "limit": 2}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("line3"));
        assert!(result.output_text().contains("line4"));
        assert!(!result.output_text().contains("line5\n"));
        assert!(result.output_text().contains("more lines"));
    }

    #[tokio::test]
    async fn test_read_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "missing.txt"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("not found"));
    }

    #[tokio::test]
    async fn test_read_directory_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "."}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("directory"));
    }

    #[tokio::test]
    async fn test_read_truncates_long_lines() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("long.txt");
        std::fs::write(&file_path, "x".repeat(1000)).unwrap();

        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "long.txt"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("(line truncated)"));
    }

    #[tokio::test]
    async fn test_read_missing_path_param() {
        let temp_dir = TempDir::new().unwrap();
        let tool = ReadFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute("test-id".to_string(), serde_json::json!({}), &context)
            .await;

        assert!(result.is_err());
    }
}
