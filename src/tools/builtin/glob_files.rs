// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Glob pattern matching tool

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Cap on reported matches
const MAX_MATCHES: usize = 500;

/// Tool for finding files by glob pattern
pub struct GlobFilesTool;

#[async_trait]
impl Tool for GlobFilesTool {
    fn name(&self) -> &str {
        "glob_files"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "glob_files".to_string(),
            description: "Find files matching a glob pattern, e.g. 'src/**/*.rs' or '*.toml'. Patterns are relative to the working directory. Returns matching paths.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("pattern", "The glob pattern to match", true)
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
            .or_else(|| input["glob"].as_str())
            .or_else(|| input["path"].as_str())
            .ok_or_else(|| {
                crate::error::CodaError::InvalidInput("pattern is required".to_string())
            })?;

        let full_pattern = if std::path::Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            context
                .working_directory
                .join(pattern)
                .to_string_lossy()
                .to_string()
        };

        let paths = match glob::glob(&full_pattern) {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResult::error(
                    tool_use_id,
                    format!("Invalid glob pattern: {}", e),
                ));
            }
        };

        let mut matches: Vec<String> = Vec::new();
        for entry in paths.flatten() {
            // Report relative to the working directory where possible
            let display = entry
                .strip_prefix(&context.working_directory)
                .unwrap_or(&entry)
                .to_string_lossy()
                .to_string();
            matches.push(display);
            if matches.len() >= MAX_MATCHES {
                break;
            }
        }
        matches.sort();

        if matches.is_empty() {
            return Ok(ToolResult::success(
                tool_use_id,
                format!("No files match pattern: {}", pattern),
            ));
        }

        let mut output = matches.join("\n");
        if matches.len() >= MAX_MATCHES {
            output.push_str("\n... (match limit reached)");
        }

        Ok(ToolResult::success(tool_use_id, output))
    }
}
