// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider abstraction
//!
//! Every vendor adapter implements [`LlmProvider`] and emits the same
//! canonical [`StreamEvent`] sequence, so the agent loop never branches on
//! vendor identity. Adapters own all wire-protocol knowledge, including the
//! typed classification of vendor error responses.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::{ApiError, Result};
use crate::llm::message::Message;

/// Canonical streaming event emitted by every provider adapter.
///
/// The tool-call lifecycle is always Started -> zero or more ArgsDelta ->
/// Ready; adapters buffer partial argument JSON internally and only emit
/// `ToolCallReady` once the assembled input has parsed.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text
    TextDelta { text: String },

    /// A tool invocation has opened; arguments may still be streaming
    ToolCallStarted { id: String, name: String },

    /// A fragment of the serialized tool arguments (informational; the
    /// dispatcher must never act on these)
    ToolCallArgsDelta { id: String, partial: String },

    /// The tool invocation is complete with fully parsed arguments
    ToolCallReady {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The provider finished its turn
    TurnFinished {
        reason: FinishReason,
        usage: Option<Usage>,
    },

    /// In-band protocol error, classified at the boundary
    StreamError { error: ApiError },
}

/// Why a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion, no pending tool calls
    EndTurn,
    /// The assistant requested tool execution
    ToolUse,
    /// Output token budget exhausted
    MaxTokens,
}

/// Token usage for a single provider call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl Usage {
    /// Accumulate another call's usage into this one
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// One segment of the system prompt. Stable segments may be marked
/// cacheable; providers without prompt caching join all segments into a
/// plain string.
#[derive(Debug, Clone)]
pub struct SystemSegment {
    pub text: String,
    pub cacheable: bool,
}

/// Declaration of a tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

/// JSON schema of a tool's input object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: serde_json::Value,
    pub required: Vec<String>,
}

/// Metadata for a model a provider can serve
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tools: bool,
    /// USD per 1K input tokens
    pub input_cost_per_1k: f64,
    /// USD per 1K output tokens
    pub output_cost_per_1k: f64,
}

/// A request for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Vec<SystemSegment>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: Vec::new(),
            tools: Vec::new(),
            max_tokens: 8192,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, segments: Vec<SystemSegment>) -> Self {
        self.system = segments;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Plain-string rendering of the system prompt, for providers that do
    /// not support cache-marked segments.
    pub fn system_text(&self) -> Option<String> {
        if self.system.is_empty() {
            return None;
        }
        Some(
            self.system
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

/// A boxed canonical event stream
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A streaming language-model backend with tool calling
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name ("anthropic", "openai", "ollama")
    fn name(&self) -> &str;

    /// Models this provider can serve
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Whether the given model id is served here
    fn supports_model(&self, model: &str) -> bool {
        self.available_models().iter().any(|m| m.id == model)
    }

    /// Get model info by ID
    fn get_model_info(&self, model: &str) -> Option<ModelInfo> {
        self.available_models().into_iter().find(|m| m.id == model)
    }

    /// Stream a completion as canonical events
    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream>;

    /// Non-streaming completion, assembled from the event stream.
    ///
    /// Collects text and ready tool calls into a single assistant message;
    /// callers that render incrementally should use [`complete_stream`]
    /// instead.
    ///
    /// [`complete_stream`]: LlmProvider::complete_stream
    async fn complete(&self, request: CompletionRequest) -> Result<Message> {
        use futures::StreamExt;
        use crate::llm::message::ContentBlock;

        let mut stream = self.complete_stream(request).await?;
        let mut text = String::new();
        let mut blocks: Vec<ContentBlock> = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::ToolCallReady { id, name, input } => {
                    blocks.push(ContentBlock::ToolUse { id, name, input });
                }
                StreamEvent::StreamError { error } => return Err(error.into()),
                _ => {}
            }
        }

        if !text.is_empty() {
            blocks.insert(0, ContentBlock::Text { text });
        }
        Ok(Message::assistant_blocks(blocks))
    }

    /// Rough token count for budgeting; adapters may override when the
    /// vendor has a real tokenizer endpoint.
    fn count_tokens(&self, text: &str, _model: &str) -> Result<u32> {
        Ok((text.len() as u32 / 4).max(1))
    }
}
