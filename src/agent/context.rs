// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation context management
//!
//! Bounds the history sent to the provider. The bound adapts to the
//! instruction: exploratory work keeps more history, narrow edits keep
//! less. When history exceeds the bound, older messages are pruned by
//! lexical relevance to the current instruction, never splitting an
//! assistant tool call from its results.

use crate::config::ContextConfig;
use crate::llm::message::{Conversation, Message, Role};
use crate::llm::provider::SystemSegment;

const EXPLORATORY_KEYWORDS: &[&str] = &[
    "explore",
    "investigate",
    "understand",
    "find",
    "search",
    "analyze",
    "review",
    "audit",
    "why",
    "how",
];

const NARROW_KEYWORDS: &[&str] = &["fix", "rename", "typo", "bump", "change", "replace", "delete"];

/// Manages the history window and system prompt segments
#[derive(Debug, Clone)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// History bound (in messages) for this instruction
    ///
    /// Exploratory instructions widen the window toward the max, narrow
    /// single-edit instructions shrink it toward the min.
    pub fn window_for(&self, instruction: &str) -> usize {
        let lower = instruction.to_lowercase();
        let exploratory = EXPLORATORY_KEYWORDS.iter().any(|k| lower.contains(k));
        let narrow = NARROW_KEYWORDS.iter().any(|k| lower.contains(k))
            && instruction.split_whitespace().count() <= 12;

        if exploratory {
            self.config.max_window
        } else if narrow {
            self.config.min_window
        } else {
            self.config.base_window
        }
    }

    /// Build the message list to send, pruned to the adaptive window
    pub fn prepare(&self, conversation: &Conversation, instruction: &str) -> Vec<Message> {
        let window = self.window_for(instruction);
        let messages = &conversation.messages;

        if messages.len() <= window {
            return messages.clone();
        }

        // Group an assistant tool-use message with the following results
        // message so pruning cannot orphan either half
        let blocks = group_blocks(messages);

        // The most recent half of the window is always kept
        let recent_budget = window / 2;
        let mut kept: Vec<bool> = vec![false; blocks.len()];
        let mut used = 0usize;
        for (i, block) in blocks.iter().enumerate().rev() {
            if used + block.len() > recent_budget && used > 0 {
                break;
            }
            kept[i] = true;
            used += block.len();
        }

        // Older blocks compete on relevance for the remaining budget
        let mut candidates: Vec<(usize, f64)> = blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| !kept[*i])
            .map(|(i, block)| {
                let score = block
                    .iter()
                    .map(|m| relevance(instruction, m))
                    .fold(0.0f64, f64::max);
                (i, score)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (i, _) in candidates {
            if used + blocks[i].len() > window {
                continue;
            }
            kept[i] = true;
            used += blocks[i].len();
        }

        blocks
            .into_iter()
            .zip(kept)
            .filter(|(_, keep)| *keep)
            .flat_map(|(block, _)| block)
            .collect()
    }

    /// System prompt segments, with the stable prefix marked cacheable
    ///
    /// The static prompt text is byte-identical across turns, so
    /// providers with prompt caching can reuse it. Per-run details go in
    /// a separate non-cacheable segment.
    pub fn system_segments(&self, stable_prompt: &str, dynamic_context: &str) -> Vec<SystemSegment> {
        let mut segments = vec![SystemSegment {
            text: stable_prompt.to_string(),
            cacheable: self.config.prompt_caching,
        }];
        if !dynamic_context.is_empty() {
            segments.push(SystemSegment {
                text: dynamic_context.to_string(),
                cacheable: false,
            });
        }
        segments
    }
}

/// Split messages into prune-atomic blocks
fn group_blocks(messages: &[Message]) -> Vec<Vec<Message>> {
    let mut blocks: Vec<Vec<Message>> = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        if msg.role == Role::Assistant && msg.has_tool_use() {
            // The next message carries the tool results for this call
            if i + 1 < messages.len() {
                blocks.push(vec![msg.clone(), messages[i + 1].clone()]);
                i += 2;
                continue;
            }
        }
        blocks.push(vec![msg.clone()]);
        i += 1;
    }
    blocks
}

/// Word-overlap relevance between the instruction and a message
fn relevance(instruction: &str, message: &Message) -> f64 {
    let inst_words: std::collections::HashSet<String> = instruction
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect();
    if inst_words.is_empty() {
        return 0.0;
    }

    let text = message.text().unwrap_or_default().to_lowercase();
    let overlap = inst_words
        .iter()
        .filter(|w| text.contains(w.as_str()))
        .count();
    overlap as f64 / inst_words.len() as f64
}
