// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Content search tool
//!
//! Regex search across a directory tree, skipping hidden directories and
//! common build output.

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Cap on reported matching lines
const MAX_RESULTS: usize = 200;
/// Directories never descended into
const SKIP_DIRS: &[&str] = &["target", "node_modules", ".git", "dist", "build"];

/// Tool for searching file contents with a regex
pub struct SearchInFilesTool;

fn should_skip(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n) || n.starts_with('.'))
            .unwrap_or(false)
}

#[async_trait]
impl Tool for SearchInFilesTool {
    fn name(&self) -> &str {
        "search_in_files"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_in_files".to_string(),
            description: "Search file contents with a regular expression. Returns matching lines as path:line_number:line. Skips hidden directories and build output.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("pattern", "The regex pattern to search for", true)
                .string("path", "Directory to search in (default: working directory)", false)
                .string("filePattern", "Only search files whose name contains this substring, e.g. '.rs'", false)
                .build(),
        }
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let pattern = input["pattern"]
            .as_str()
            .or_else(|| input["regex"].as_str())
            .or_else(|| input["query"].as_str())
            .ok_or_else(|| {
                crate::error::CodaError::InvalidInput("pattern is required".to_string())
            })?;

        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolResult::error(
                    tool_use_id,
                    format!("Invalid regex: {}", e),
                ));
            }
        };

        let root = context.resolve_path(input["path"].as_str().unwrap_or("."));
        let file_pattern = input["filePattern"]
            .as_str()
            .or_else(|| input["file_pattern"].as_str());

        if !root.exists() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("Path not found: {}", root.display()),
            ));
        }

        let mut results: Vec<String> = Vec::new();
        let mut truncated = false;

        'outer: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !should_skip(e))
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(fp) = file_pattern {
                let name = entry.file_name().to_string_lossy();
                if !name.contains(fp) {
                    continue;
                }
            }

            // Binary or unreadable files are skipped silently
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let display = entry
                .path()
                .strip_prefix(&context.working_directory)
                .unwrap_or(entry.path())
                .display()
                .to_string();

            for (lineno, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    results.push(format!("{}:{}:{}", display, lineno + 1, line.trim_end()));
                    if results.len() >= MAX_RESULTS {
                        truncated = true;
                        break 'outer;
                    }
                }
            }
        }

        if results.is_empty() {
            return Ok(ToolResult::success(
                tool_use_id,
                format!("No matches for pattern: {}", pattern),
            ));
        }

        let mut output = results.join("\n");
        if truncated {
            output.push_str("\n... (result limit reached)");
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

    #[tokio::test]
    async fn test_search_reports_path_line_and_text() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("main.rs"),
            "fn main() {\n    todo()\n}\n",
        )
        .unwrap();

        let tool = SearchInFilesTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"pattern": "todo"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("main.rs:2:"));
        assert!(result.output_text().contains("todo()"));
    }

    #[tokio::test]
    async fn test_search_file_pattern_filter() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.rs"), "needle").unwrap();
        std::fs::write(temp_dir.path().join("b.txt"), "needle").unwrap();

        let tool = SearchInFilesTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"pattern": "needle", "filePattern": ".rs"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.output_text().contains("a.rs"));
        assert!(!result.output_text().contains("b.txt"));
    }

    #[tokio::test]
    async fn test_search_skips_hidden_and_build_dirs() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("target")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        std::fs::write(temp_dir.path().join("target/out.rs"), "needle").unwrap();
        std::fs::write(temp_dir.path().join(".git/config"), "needle").unwrap();
        std::fs::write(temp_dir.path().join("src.rs"), "needle").unwrap();

        let tool = SearchInFilesTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"pattern": "needle"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.output_text().contains("src.rs"));
        assert!(!result.output_text().contains("target"));
        assert!(!result.output_text().contains(".git"));
    }

    #[tokio::test]
    async fn test_search_invalid_regex() {
        let temp_dir = TempDir::new().unwrap();
        let tool = SearchInFilesTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"pattern": "[unclosed"}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("Invalid regex"));
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "nothing here").unwrap();

        let tool = SearchInFilesTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"pattern": "zzz_absent"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("No matches"));
    }
}
