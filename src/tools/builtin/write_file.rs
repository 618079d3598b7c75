// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! File writing tool
//!
//! Creates or overwrites files, creating parent directories as needed.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::diff::{summarize_diff, summarize_new_file};
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Tool for writing file contents
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file, creating it (and any parent directories) if it does not exist, or overwriting it if it does. For small changes to existing files prefer edit_file.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("filePath", "The path to the file to write", true)
                .string("content", "The full content to write", true)
                .build(),
        }
    }

    fn mutated_paths(&self, input: &Value) -> Vec<String> {
        lookup_path(input).map(String::from).into_iter().collect()
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let path_str = lookup_path(&input).ok_or_else(|| {
            crate::error::CodaError::InvalidInput("filePath is required".to_string())
        })?;

        let content = input["content"]
            .as_str()
            .or_else(|| input["text"].as_str())
            .or_else(|| input["data"].as_str())
            .ok_or_else(|| {
                crate::error::CodaError::InvalidInput("content is required".to_string())
            })?;

        let path = context.resolve_path(path_str);

        let previous = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(c) => Some(c),
                Err(_) => None,
            }
        } else {
            None
        };

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Ok(ToolResult::error(
                        tool_use_id,
                        format!("Failed to create parent directories: {}", e),
                    ));
                }
            }
        }

        match std::fs::write(&path, content) {
            Ok(_) => {
                let summary = match &previous {
                    Some(old) => summarize_diff(old, content),
                    None => summarize_new_file(content),
                };
                let verb = if previous.is_some() { "Overwrote" } else { "Created" };
                Ok(ToolResult::success(
                    tool_use_id,
                    format!(
                        "{} {} ({})\n{}",
                        verb,
                        path.display(),
                        summary.counts(),
                        summary.text
                    ),
                ))
            }
            Err(e) => Ok(ToolResult::error(
                tool_use_id,
                format!("Failed to write file: {}", e),
            )),
        }
    }
}

fn lookup_path(input: &Value) -> Option<&str> {
    input["filePath"]
        .as_str()
        .or_else(|| input["file_path"].as_str())
        .or_else(|| input["path"].as_str())
        .or_else(|| input["file"].as_str())
}
