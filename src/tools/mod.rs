// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Coda
//!
//! Provides the framework for tools that the LLM can use to interact with
//! the filesystem and execute commands. Tools declare whether they are
//! read-only; the dispatcher uses that to decide cache eligibility and
//! which calls need per-path serialization.

pub mod builtin;
pub mod cache;
pub mod definition;
pub mod diff;
pub mod dispatcher;

pub use cache::ToolCache;
pub use definition::*;
pub use dispatcher::ToolDispatcher;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;

/// Output longer than this is truncated before being returned to the model
pub const MAX_OUTPUT_CHARS: usize = 50_000;

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Current working directory
    pub working_directory: PathBuf,
    /// Detected project root (if any)
    pub project_root: Option<PathBuf>,
    /// Current session ID
    pub session_id: uuid::Uuid,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(
        working_directory: PathBuf,
        project_root: Option<PathBuf>,
        session_id: uuid::Uuid,
    ) -> Self {
        Self {
            working_directory,
            project_root,
            session_id,
        }
    }

    /// Resolve a possibly-relative path against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_directory.join(p)
        }
    }
}

/// Result of tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The tool_use_id this result corresponds to
    pub tool_use_id: String,
    /// The output of the tool
    pub output: ToolOutput,
}

/// Output from a tool
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Successful output
    Success(String),
    /// Error output
    Error(String),
}

impl ToolResult {
    /// Create a successful result
    pub fn success(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            output: ToolOutput::Success(truncate_output(output.into())),
        }
    }

    /// Create an error result
    pub fn error(tool_use_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            output: ToolOutput::Error(truncate_output(error.into())),
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self.output, ToolOutput::Error(_))
    }

    /// Get the output text
    pub fn output_text(&self) -> &str {
        match &self.output {
            ToolOutput::Success(s) => s,
            ToolOutput::Error(s) => s,
        }
    }
}

/// Cap output size, keeping the head and noting what was dropped
fn truncate_output(mut output: String) -> String {
    if output.len() <= MAX_OUTPUT_CHARS {
        return output;
    }
    // Cut on a char boundary at or below the cap
    let mut cut = MAX_OUTPUT_CHARS;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = output.len() - cut;
    output.truncate(cut);
    output.push_str(&format!("\n... (output truncated, {} bytes omitted)", dropped));
    output
}

/// Trait for implementing tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition for the LLM
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with given input
    async fn execute(
        &self,
        tool_use_id: String,
        input: Value,
        context: &ToolContext,
    ) -> Result<ToolResult>;

    /// Whether this tool only observes state
    ///
    /// Read-only tools may have their results cached within a turn;
    /// mutating tools are serialized per target path.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Every path a mutating call will touch, as far as the input reveals
    /// them. The dispatcher locks all of them (in sorted order) before
    /// executing, so concurrent writes to any shared file serialize.
    fn mutated_paths(&self, _input: &Value) -> Vec<String> {
        Vec::new()
    }

    /// Get the tool name
    fn name(&self) -> &str;
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Aliases mapping alternate names to canonical tool names
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Build the default tool aliases
    fn default_aliases() -> HashMap<String, String> {
        let mut aliases = HashMap::new();
        // Common alternate names models reach for
        aliases.insert("cat".to_string(), "read_file".to_string());
        aliases.insert("read".to_string(), "read_file".to_string());
        aliases.insert("write".to_string(), "write_file".to_string());
        aliases.insert("edit".to_string(), "edit_file".to_string());
        aliases.insert("edit_multiple_files".to_string(), "multi_edit".to_string());
        aliases.insert("ls".to_string(), "list_files".to_string());
        aliases.insert("glob".to_string(), "glob_files".to_string());
        aliases.insert("find".to_string(), "glob_files".to_string());
        aliases.insert("grep".to_string(), "search_in_files".to_string());
        aliases.insert("search".to_string(), "search_in_files".to_string());
        aliases.insert("bash".to_string(), "execute_command".to_string());
        aliases.insert("shell".to_string(), "execute_command".to_string());
        aliases.insert("run".to_string(), "execute_command".to_string());
        aliases
    }

    /// Create a registry with all built-in tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(builtin::ReadFileTool));
        registry.register(Arc::new(builtin::WriteFileTool));
        registry.register(Arc::new(builtin::EditFileTool));
        registry.register(Arc::new(builtin::MultiEditTool));
        registry.register(Arc::new(builtin::ListFilesTool));
        registry.register(Arc::new(builtin::GlobFilesTool));
        registry.register(Arc::new(builtin::SearchInFilesTool));
        registry.register(Arc::new(builtin::ExecuteCommandTool));

        registry.aliases = Self::default_aliases();

        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name, resolving aliases if needed
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(self.resolve_alias(name))
    }

    /// Resolve an alias to the canonical tool name
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(|s| s.as_str()).unwrap_or(name)
    }

    /// Get all tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// List all tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_tool_context_creation() {
        let context = ToolContext::new(
            PathBuf::from("/tmp"),
            Some(PathBuf::from("/home/user/project")),
            uuid::Uuid::new_v4(),
        );

        assert_eq!(context.working_directory, PathBuf::from("/tmp"));
        assert!(context.project_root.is_some());
    }

    #[test]
    fn test_resolve_path_relative_and_absolute() {
        let context = ToolContext::new(PathBuf::from("/work"), None, uuid::Uuid::new_v4());

        assert_eq!(context.resolve_path("src/main.rs"), PathBuf::from("/work/src/main.rs"));
        assert_eq!(context.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_tool_result_success() {
        let result = ToolResult::success("id123", "Success output");

        assert!(!result.is_error());
        assert_eq!(result.tool_use_id, "id123");
        assert_eq!(result.output_text(), "Success output");
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("id456", "Error message");

        assert!(result.is_error());
        assert_eq!(result.tool_use_id, "id456");
        assert_eq!(result.output_text(), "Error message");
    }

    #[test]
    fn test_truncate_output_caps_size() {
        let big = "x".repeat(MAX_OUTPUT_CHARS + 100);
        let result = ToolResult::success("id", big);
        assert!(result.output_text().len() < MAX_OUTPUT_CHARS + 100);
        assert!(result.output_text().contains("output truncated"));
    }

    #[test]
    fn test_truncate_output_leaves_small_alone() {
        let result = ToolResult::success("id", "small");
        assert_eq!(result.output_text(), "small");
    }

    #[test]
    fn test_tool_registry_with_builtins() {
        let registry = ToolRegistry::with_builtins();

        assert_eq!(registry.len(), 8);
        assert!(registry.get("read_file").is_some());
        assert!(registry.get("write_file").is_some());
        assert!(registry.get("edit_file").is_some());
        assert!(registry.get("multi_edit").is_some());
        assert!(registry.get("list_files").is_some());
        assert!(registry.get("glob_files").is_some());
        assert!(registry.get("search_in_files").is_some());
        assert!(registry.get("execute_command").is_some());
    }

    #[test]
    fn test_tool_registry_get_nonexistent() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.get("nonexistent_tool").is_none());
    }

    #[test]
    fn test_tool_registry_aliases_resolve() {
        let registry = ToolRegistry::with_builtins();

        assert_eq!(registry.get("cat").unwrap().name(), "read_file");
        assert_eq!(registry.get("ls").unwrap().name(), "list_files");
        assert_eq!(registry.get("grep").unwrap().name(), "search_in_files");
        assert_eq!(registry.get("bash").unwrap().name(), "execute_command");
        assert_eq!(registry.get("edit_multiple_files").unwrap().name(), "multi_edit");
    }

    #[test]
    fn test_tool_registry_resolve_alias() {
        let registry = ToolRegistry::with_builtins();

        assert_eq!(registry.resolve_alias("cat"), "read_file");
        assert_eq!(registry.resolve_alias("read_file"), "read_file");
        assert_eq!(registry.resolve_alias("nonexistent"), "nonexistent");
    }

    #[test]
    fn test_read_only_classification() {
        let registry = ToolRegistry::with_builtins();

        for name in ["read_file", "list_files", "glob_files", "search_in_files"] {
            assert!(registry.get(name).unwrap().is_read_only(), "{name}");
        }
        for name in ["write_file", "edit_file", "multi_edit", "execute_command"] {
            assert!(!registry.get(name).unwrap().is_read_only(), "{name}");
        }
    }

    #[test]
    fn test_tool_registry_definitions() {
        let registry = ToolRegistry::with_builtins();
        let definitions = registry.definitions();

        assert_eq!(definitions.len(), 8);
        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
    }
}
