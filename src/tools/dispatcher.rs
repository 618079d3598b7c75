// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Concurrent tool dispatch
//!
//! Runs a batch of tool calls concurrently. Read-only calls consult the
//! shared cache; mutating calls acquire a per-path lock so two writes to
//! the same file within one batch cannot interleave. Failures are
//! isolated per call, so one broken tool never poisons its siblings.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::tools::{ToolCache, ToolContext, ToolRegistry, ToolResult};

/// One tool call requested by the model
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Dispatches batches of tool calls against a registry
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    cache: Arc<ToolCache>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl ToolDispatcher {
    /// Create a dispatcher with an injected cache
    pub fn new(registry: Arc<ToolRegistry>, cache: Arc<ToolCache>, timeout: Duration) -> Self {
        Self {
            registry,
            cache,
            path_locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Access the injected cache
    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Definitions of every registered tool, for the model request
    pub fn definitions(&self) -> Vec<crate::llm::provider::ToolDefinition> {
        self.registry.definitions()
    }

    /// Execute a batch of calls concurrently
    ///
    /// Results come back in the same order as the input calls.
    pub async fn dispatch_batch(
        &self,
        calls: Vec<ToolInvocation>,
        context: &ToolContext,
    ) -> Vec<ToolResult> {
        let futures = calls
            .into_iter()
            .map(|call| self.dispatch_one(call, context));
        join_all(futures).await
    }

    /// Execute a single call with caching, locking, and timeout applied
    pub async fn dispatch_one(
        &self,
        call: ToolInvocation,
        context: &ToolContext,
    ) -> ToolResult {
        let tool = match self.registry.get(&call.name) {
            Some(t) => Arc::clone(t),
            None => {
                warn!(tool = %call.name, "unknown tool requested");
                return ToolResult::error(
                    call.id,
                    format!(
                        "Unknown tool: {}. Available tools: {}",
                        call.name,
                        self.registry.names().join(", ")
                    ),
                );
            }
        };

        let canonical_name = tool.name().to_string();

        if tool.is_read_only() {
            if let Some(cached) = self.cache.get(&canonical_name, &call.input).await {
                debug!(tool = %canonical_name, "tool cache hit");
                return ToolResult::success(call.id, cached);
            }
        }

        // Serialize mutating calls that share any target path. Locks are
        // taken in sorted, deduplicated order so two batches can never
        // deadlock on each other.
        let mut paths = tool.mutated_paths(&call.input);
        paths.sort();
        paths.dedup();
        let mut path_locks = Vec::with_capacity(paths.len());
        for path in &paths {
            path_locks.push(self.lock_for_path(path).await);
        }
        let mut held = Vec::with_capacity(path_locks.len());
        for lock in &path_locks {
            held.push(lock.lock().await);
        }

        let execution = tool.execute(call.id.clone(), call.input.clone(), context);
        let result = match tokio::time::timeout(self.timeout, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %canonical_name, error = %e, "tool execution failed");
                ToolResult::error(call.id, format!("Tool execution failed: {}", e))
            }
            Err(_) => {
                warn!(tool = %canonical_name, "tool execution timed out");
                ToolResult::error(
                    call.id,
                    format!(
                        "Tool {} timed out after {}s",
                        canonical_name,
                        self.timeout.as_secs()
                    ),
                )
            }
        };

        if !result.is_error() {
            if tool.is_read_only() {
                self.cache
                    .insert(&canonical_name, &call.input, result.output_text().to_string())
                    .await;
            } else {
                // Cached reads of the mutated files are now stale
                for path in &paths {
                    self.cache.invalidate_path(path).await;
                }
            }
        }

        result
    }

    async fn lock_for_path(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().await;
        Arc::clone(
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
