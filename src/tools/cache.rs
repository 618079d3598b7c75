// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Result cache for read-only tools
//!
//! Keyed by tool name plus canonicalized arguments, so semantically equal
//! calls hit the same entry regardless of JSON key order. Only successful
//! results are cached; mutations invalidate entries touching the same
//! path.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry {
    output: String,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Hit and miss counts for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Cache for read-only tool results, shared across a turn
pub struct ToolCache {
    state: Mutex<CacheState>,
    /// Entries older than this are evicted on lookup. None disables expiry.
    ttl: Option<Duration>,
}

impl ToolCache {
    /// Create a cache with no expiry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl: None,
        }
    }

    /// Create a cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl: Some(ttl),
        }
    }

    /// Build the canonical cache key for a call
    pub fn cache_key(tool_name: &str, args: &Value) -> String {
        format!("{}:{}", tool_name, canonical_json(args))
    }

    /// Look up a cached result
    pub async fn get(&self, tool_name: &str, args: &Value) -> Option<String> {
        let key = Self::cache_key(tool_name, args);
        let mut state = self.state.lock().await;

        if let Some(ttl) = self.ttl {
            if let Some(entry) = state.entries.get(&key) {
                if entry.inserted_at.elapsed() > ttl {
                    state.entries.remove(&key);
                }
            }
        }

        match state.entries.get(&key) {
            Some(entry) => {
                let output = entry.output.clone();
                state.hits += 1;
                Some(output)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a successful result
    pub async fn insert(&self, tool_name: &str, args: &Value, output: String) {
        let key = Self::cache_key(tool_name, args);
        let mut state = self.state.lock().await;
        state.entries.insert(
            key,
            CacheEntry {
                output,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry whose arguments reference the given path
    ///
    /// Keys embed the canonical argument JSON, so a substring check on the
    /// path is sufficient to catch reads of a mutated file.
    pub async fn invalidate_path(&self, path: &str) {
        if path.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        state.entries.retain(|key, _| !key.contains(path));
    }

    /// Drop everything
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
    }

    /// Current counters
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Render JSON with object keys in sorted order at every level
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
