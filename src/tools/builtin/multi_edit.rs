// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Transactional multi-file edit tool
//!
//! Applies a batch of edits across files with all-or-nothing semantics.
//! Every target is snapshotted before the first write; any failure
//! restores every file to its snapshot, including removing files the
//! batch created.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{CodaError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::builtin::edit_file::{edit_conflict, fuzzy_find, render_conflict};
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Tool for atomic multi-file edits
pub struct MultiEditTool;

/// One edit within a batch
#[derive(Debug, Clone, Deserialize)]
struct EditSpec {
    #[serde(alias = "file_path", alias = "path", alias = "file")]
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(alias = "old_string", alias = "old")]
    #[serde(rename = "oldString")]
    old_string: String,
    #[serde(alias = "new_string", alias = "new")]
    #[serde(rename = "newString")]
    new_string: String,
}

/// Pre-edit state of one file
#[derive(Debug)]
enum Snapshot {
    Existed(String),
    Absent,
}

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "multi_edit"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "multi_edit".to_string(),
            description: "Apply several string-replacement edits across one or more files atomically. If any edit fails, all files are restored to their state before the batch. Edits are applied in order, so later edits see the effect of earlier ones.".to_string(),
            input_schema: SchemaBuilder::new()
                .object_array(
                    "edits",
                    "The edits to apply, in order",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "filePath": { "type": "string", "description": "File to edit" },
                            "oldString": { "type": "string", "description": "Exact string to replace (empty to create the file)" },
                            "newString": { "type": "string", "description": "Replacement string" }
                        },
                        "required": ["filePath", "oldString", "newString"]
                    }),
                    true,
                )
                .build(),
        }
    }

    fn mutated_paths(&self, input: &Value) -> Vec<String> {
        // Every target in the batch, so the dispatcher serializes
        // against writes to any of them
        let mut paths: Vec<String> = input["edits"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|e| e["filePath"].as_str().or_else(|| e["file_path"].as_str()))
            .map(String::from)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult> {
        let edits: Vec<EditSpec> = serde_json::from_value(input["edits"].clone())
            .map_err(|e| CodaError::InvalidInput(format!("invalid edits array: {}", e)))?;

        if edits.is_empty() {
            return Ok(ToolResult::error(tool_use_id, "edits array is empty"));
        }

        // Snapshot every target before touching anything
        let mut snapshots: HashMap<PathBuf, Snapshot> = HashMap::new();
        for edit in &edits {
            let path = context.resolve_path(&edit.file_path);
            if snapshots.contains_key(&path) {
                continue;
            }
            let snapshot = if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => Snapshot::Existed(content),
                    Err(e) => {
                        return Ok(ToolResult::error(
                            tool_use_id,
                            format!("Cannot snapshot {}: {}", path.display(), e),
                        ));
                    }
                }
            } else {
                Snapshot::Absent
            };
            snapshots.insert(path, snapshot);
        }

        let mut applied = 0usize;
        let mut failure: Option<String> = None;

        for (i, edit) in edits.iter().enumerate() {
            let path = context.resolve_path(&edit.file_path);
            match apply_one(&path, edit) {
                Ok(()) => applied += 1,
                Err(reason) => {
                    failure = Some(format!("edit {} of {}: {}", i + 1, edits.len(), reason));
                    break;
                }
            }
        }

        if let Some(reason) = failure {
            rollback(&snapshots)?;
            return Ok(ToolResult::error(
                tool_use_id,
                format!(
                    "Transaction rolled back, no files were changed. Failed at {}",
                    reason
                ),
            ));
        }

        let files: Vec<String> = snapshots.keys().map(|p| p.display().to_string()).collect();
        Ok(ToolResult::success(
            tool_use_id,
            format!(
                "Applied {} edit(s) across {} file(s): {}",
                applied,
                files.len(),
                files.join(", ")
            ),
        ))
    }
}

/// Apply a single edit, reporting a human-readable reason on failure
fn apply_one(path: &PathBuf, edit: &EditSpec) -> std::result::Result<(), String> {
    // Empty oldString creates the file with newString as content
    if edit.old_string.is_empty() {
        if path.exists() {
            return Err(format!(
                "{}: empty oldString creates a file, but it already exists",
                path.display()
            ));
        }
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("{}: {}", path.display(), e))?;
            }
        }
        return std::fs::write(path, &edit.new_string)
            .map_err(|e| format!("{}: {}", path.display(), e));
    }

    if !path.exists() {
        return Err(format!("{}: file not found", path.display()));
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;

    let new_content = if content.contains(&edit.old_string) {
        content.replacen(&edit.old_string, &edit.new_string, 1)
    } else {
        match fuzzy_find(&content, &edit.old_string) {
            Ok((begin, end)) => {
                let mut replaced = String::with_capacity(content.len());
                replaced.push_str(&content[..begin]);
                replaced.push_str(&edit.new_string);
                replaced.push_str(&content[end..]);
                replaced
            }
            Err(0) => {
                let error = edit_conflict(path, "string not found", &content);
                return Err(render_conflict(&error, &edit.old_string));
            }
            Err(n) => {
                let error =
                    edit_conflict(path, &format!("{} ambiguous matches", n), &content);
                return Err(render_conflict(&error, &edit.old_string));
            }
        }
    };

    std::fs::write(path, new_content).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Restore every snapshot. A failure here leaves the tree inconsistent
/// and is a hard error.
fn rollback(snapshots: &HashMap<PathBuf, Snapshot>) -> Result<()> {
    for (path, snapshot) in snapshots {
        let restore = match snapshot {
            Snapshot::Existed(content) => std::fs::write(path, content),
            Snapshot::Absent => {
                if path.exists() {
                    std::fs::remove_file(path)
                } else {
                    Ok(())
                }
            }
        };
        restore.map_err(|e| {
            CodaError::TransactionRollback(format!(
                "failed to restore {}: {}",
                path.display(),
                e
            ))
        })?;
    }
    Ok(())
}
