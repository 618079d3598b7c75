// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent output frames
//!
//! The controller reports progress as a stream of JSON-serializable
//! frames. Frontends render them; the `Done` frame is always the last
//! one emitted, even after an error.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::llm::provider::Usage;

/// One result within a tool batch frame
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultFrame {
    pub tool_use_id: String,
    pub tool_name: String,
    pub output: String,
    pub is_error: bool,
}

/// Progress frames emitted while a run executes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed assistant text
    Text { text: String },
    /// A tool call the model requested, with its full parsed arguments
    ToolInput {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Results of one dispatched batch
    ToolResultsBatch { results: Vec<ToolResultFrame> },
    /// A transient provider failure is being retried
    Retrying {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// A failure that ends the run
    Error { message: String, transient: bool },
    /// Terminal frame with run totals
    Done {
        turns: u32,
        usage: Usage,
        aborted: bool,
    },
}

/// Sender half used by the controller
pub type AgentEventSender = mpsc::UnboundedSender<AgentEvent>;
/// Receiver half consumed by the frontend
pub type AgentEventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Create an event channel pair
pub fn event_channel() -> (AgentEventSender, AgentEventReceiver) {
    mpsc::unbounded_channel()
}
