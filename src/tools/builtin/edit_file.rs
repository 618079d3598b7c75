// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! File edit tool
//!
//! Edits existing files using string replacement. Falls back to a
//! whitespace-insensitive match when the exact string is not found, since
//! models frequently reproduce indentation imperfectly.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CodaError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::diff::summarize_diff;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolResult};

/// Longest excerpt included in a conflict message
const PREVIEW_CHARS: usize = 200;

/// Tool for editing existing files
pub struct EditFileTool;

/// Trim a string for inclusion in an error message
pub(crate) fn preview(s: &str) -> String {
    if s.len() <= PREVIEW_CHARS {
        return s.to_string();
    }
    let mut cut = PREVIEW_CHARS;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}

/// Typed conflict for an edit target that could not be resolved.
///
/// Carries a truncated view of the file's actual content, not of the
/// search string, so the caller can see what it mismatched against.
pub(crate) fn edit_conflict(path: &std::path::Path, reason: &str, content: &str) -> CodaError {
    CodaError::EditConflict {
        path: path.display().to_string(),
        reason: reason.to_string(),
        preview: preview(content),
    }
}

/// Render a conflict as tool output the model can self-correct from
pub(crate) fn render_conflict(error: &CodaError, needle: &str) -> String {
    let mut out = format!("{}.\n\nSearched for:\n{}", error, preview(needle));
    if let CodaError::EditConflict {
        preview: file_preview,
        ..
    } = error
    {
        out.push_str("\n\nFile contains:\n");
        out.push_str(file_preview);
    }
    out
}

/// Collapse runs of whitespace and lowercase, so matches survive
/// indentation and case drift
fn normalize_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Find the byte range of a fuzzy match for `needle` in `content`
///
/// Slides a window of the needle's line count over the content and
/// compares normalized forms. Returns the matched range, or the number
/// of ambiguous matches on failure.
pub(crate) fn fuzzy_find(content: &str, needle: &str) -> std::result::Result<(usize, usize), usize> {
    let needle_norm: Vec<String> = needle.lines().map(normalize_line).collect();
    if needle_norm.is_empty() {
        return Err(0);
    }

    // Byte offset of each line start, plus one past the end
    let mut line_starts: Vec<usize> = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    let content_lines: Vec<&str> = content.lines().collect();

    let window = needle_norm.len();
    if content_lines.len() < window {
        return Err(0);
    }

    let mut matches: Vec<(usize, usize)> = Vec::new();
    for start in 0..=(content_lines.len() - window) {
        let all_match = (0..window)
            .all(|k| normalize_line(content_lines[start + k]) == needle_norm[k]);
        if all_match {
            let begin = line_starts[start];
            let last = start + window - 1;
            let end = line_starts[last] + content_lines[last].len();
            matches.push((begin, end));
        }
    }

    match matches.len() {
        1 => Ok(matches[0]),
        n => Err(n),
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".to_string(),
            description: "Edit an existing file by replacing a specific string with new content. The oldString should match exactly (including whitespace); if it does not, a whitespace-insensitive match on whole lines is attempted. Use read_file first to see the exact content.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("filePath", "The path to the file to edit", true)
                .string("oldString", "The exact string to find and replace (must be unique in the file)", true)
                .string("newString", "The string to replace it with", true)
                .boolean("replaceAll", "If true, replace all exact occurrences (default: false, fails if not unique)", false)
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
            CodaError::InvalidInput("filePath is required".to_string())
        })?;

        let old_string = input["oldString"]
            .as_str()
            .or_else(|| input["old_string"].as_str())
            .or_else(|| input["old"].as_str())
            .or_else(|| input["search"].as_str())
            .or_else(|| input["find"].as_str())
            .ok_or_else(|| {
                CodaError::InvalidInput("oldString is required".to_string())
            })?;

        let new_string = input["newString"]
            .as_str()
            .or_else(|| input["new_string"].as_str())
            .or_else(|| input["new"].as_str())
            .or_else(|| input["replace"].as_str())
            .or_else(|| input["replacement"].as_str())
            .ok_or_else(|| {
                CodaError::InvalidInput("newString is required".to_string())
            })?;

        let replace_all = input["replaceAll"]
            .as_bool()
            .or_else(|| input["replace_all"].as_bool())
            .unwrap_or(false);

        let path = context.resolve_path(path_str);

        if !path.exists() {
            return Ok(ToolResult::error(
                tool_use_id,
                format!("File not found: {}", path.display()),
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

        let occurrences = content.matches(old_string).count();

        let new_content = if occurrences == 0 {
            // Exact match failed; try the whitespace-insensitive fallback
            match fuzzy_find(&content, old_string) {
                Ok((begin, end)) => {
                    let mut replaced = String::with_capacity(content.len());
                    replaced.push_str(&content[..begin]);
                    replaced.push_str(new_string);
                    replaced.push_str(&content[end..]);
                    replaced
                }
                Err(0) => {
                    let error = edit_conflict(
                        &path,
                        "string not found, even with whitespace-insensitive matching",
                        &content,
                    );
                    return Ok(ToolResult::error(
                        tool_use_id,
                        render_conflict(&error, old_string),
                    ));
                }
                Err(n) => {
                    let error = edit_conflict(
                        &path,
                        &format!(
                            "{} fuzzy matches, cannot choose one. Provide a more specific string",
                            n
                        ),
                        &content,
                    );
                    return Ok(ToolResult::error(
                        tool_use_id,
                        render_conflict(&error, old_string),
                    ));
                }
            }
        } else if occurrences > 1 && !replace_all {
            return Ok(ToolResult::error(
                tool_use_id,
                format!(
                    "Found {} occurrences of the string. Use replaceAll=true to replace all, or provide a more specific string.",
                    occurrences
                ),
            ));
        } else if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        match std::fs::write(&path, &new_content) {
            Ok(_) => {
                let summary = summarize_diff(&content, &new_content);
                Ok(ToolResult::success(
                    tool_use_id,
                    format!(
                        "Edited {} ({})\n{}",
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
    fn test_tool_name() {
        let tool = EditFileTool;
        assert_eq!(tool.name(), "edit_file");
        assert!(!tool.is_read_only());
    }

    #[test]
    fn test_mutated_paths_from_input() {
        let tool = EditFileTool;
        let input = serde_json::json!({"filePath": "src/main.rs", "oldString": "a", "newString": "b"});
        assert_eq!(tool.mutated_paths(&input), vec!["src/main.rs".to_string()]);
    }

    // ===== Exact matching =====

    #[tokio::test]
    async fn test_edit_single_occurrence() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("edit_test.txt");
        std::fs::write(&file_path, "Hello World").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "World",
                    "newString": "Rust"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "Hello Rust");
    }

    #[tokio::test]
    async fn test_edit_replaces_first_match_only() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("edit_test.txt");
        std::fs::write(&file_path, "foo bar foo").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "foo",
                    "newString": "baz"
                }),
                &context,
            )
            .await
            .unwrap();

        // Ambiguous without replaceAll
        assert!(result.is_error());
        assert!(result.output_text().contains("2 occurrences"));
    }

    #[tokio::test]
    async fn test_edit_replace_all() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("edit_test.txt");
        std::fs::write(&file_path, "foo bar foo").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "foo",
                    "newString": "baz",
                    "replaceAll": true
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "baz bar baz");
    }

    // ===== Fuzzy matching =====

    #[test]
    fn test_fuzzy_find_tolerates_indentation() {
        let content = "fn main() {\n        println!(\"hi\");\n}\n";
        let needle = "fn main() {\n    println!(\"hi\");\n}";
        let (begin, end) = fuzzy_find(content, needle).unwrap();
        assert_eq!(&content[begin..end], "fn main() {\n        println!(\"hi\");\n}");
    }

    #[test]
    fn test_fuzzy_find_tolerates_case() {
        let content = "let X = 1;\n";
        assert!(fuzzy_find(content, "LET x = 1;").is_ok());
    }

    #[test]
    fn test_fuzzy_find_reports_ambiguity() {
        let content = "a\nb\na\nb\n";
        assert_eq!(fuzzy_find(content, "a\nb"), Err(2));
    }

    #[test]
    fn test_fuzzy_find_no_match() {
        assert_eq!(fuzzy_find("x\ny\n", "q"), Err(0));
    }

    #[tokio::test]
    async fn test_edit_falls_back_to_fuzzy() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("fuzzy.rs");
        std::fs::write(&file_path, "fn main() {\n        let x = 1;\n}\n").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        // Wrong indentation in oldString
        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "let x = 1;",
                    "newString": "        let x = 2;"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        let content = std::fs::read_to_string(&file_path).unwrap();
        assert!(content.contains("let x = 2;"));
    }

    // ===== Conflicts =====

    #[tokio::test]
    async fn test_edit_conflict_previews_file_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.txt");
        std::fs::write(&file_path, "hello world").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "goodbye",
                    "newString": "x"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("Edit conflict"));
        // The message shows what the file actually holds, so the caller
        // can correct its search string
        assert!(result.output_text().contains("hello world"));
    }

    #[tokio::test]
    async fn test_edit_conflict_previews_are_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("edit_test.txt");
        std::fs::write(&file_path, "w".repeat(500)).unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let long_needle = "z".repeat(500);
        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": long_needle,
                    "newString": "new"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("Edit conflict"));
        // Both the needle echo and the file preview are capped
        assert!(!result.output_text().contains(&"z".repeat(201)));
        assert!(!result.output_text().contains(&"w".repeat(201)));
        assert!(result.output_text().contains("..."));
    }

    #[tokio::test]
    async fn test_edit_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": "/nonexistent/file.txt",
                    "oldString": "old",
                    "newString": "new"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(result.is_error());
        assert!(result.output_text().contains("not found"));
    }

    #[tokio::test]
    async fn test_edit_missing_params_are_errors() {
        let temp_dir = TempDir::new().unwrap();
        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"oldString": "old", "newString": "new"}),
                &context,
            )
            .await;
        assert!(result.is_err());

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({"filePath": "a.txt", "newString": "new"}),
                &context,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_edit_alternative_param_names() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        std::fs::write(&file_path, "Hello World").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "path": file_path.to_string_lossy().to_string(),
                    "old_string": "World",
                    "new_string": "Rust"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "Hello Rust");
    }

    #[tokio::test]
    async fn test_edit_success_includes_diff() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("d.txt");
        std::fs::write(&file_path, "a\nb\nc\n").unwrap();

        let tool = EditFileTool;
        let context = create_test_context(&temp_dir);

        let result = tool
            .execute(
                "test-id".to_string(),
                serde_json::json!({
                    "filePath": file_path.to_string_lossy().to_string(),
                    "oldString": "b",
                    "newString": "B"
                }),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.is_error());
        assert!(result.output_text().contains("- b"));
        assert!(result.output_text().contains("+ B"));
        assert!(result.output_text().contains("+1 -1"));
    }
}
