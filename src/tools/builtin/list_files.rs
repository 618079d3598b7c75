// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Directory listing tool

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Tool for listing directory contents
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_files".to_string(),
            description: "List the entries of a directory. Directories are marked with a trailing slash. Defaults to the working directory.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("path", "The directory to list (default: working directory)", false)
                .build(),
        }
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let path_str = input["path"]
            .as_str()
            .or_else(|| input["directory"].as_str())
            .or_else(|| input["dir"].as_str())
            .unwrap_or(".");

        let path = context.resolve_path(path_str);

        if !path.exists() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("Directory not found: {}", path.display()),
            ));
        }

        if !path.is_dir() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("{} is not a directory, use read_file instead", path.display()),
            ));
        }

        let entries = match std::fs::read_dir(&path) {
            Ok(e) => e,
            Err(e) => {
                return Ok(ToolResult::error(
                    tool_use_id,
                    format!("Failed to read directory: {}", e),
                ));
            }
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            names.push(if is_dir { format!("{}/", name) } else { name });
        }
        names.sort();

        if names.is_empty() {
            return Ok(ToolResult::success(tool_use_id, "(empty directory)"));
        }

        Ok(ToolResult::success(tool_use_id, names.join("\n")))
    }
}
