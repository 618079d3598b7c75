// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI API provider adapter
//!
//! Delta-accumulation protocol: tool calls are addressed by a positional
//! index within the turn, and each chunk may carry a fragment of a call's
//! id, name, or serialized arguments. Fragments are concatenated per index
//! in arrival order; the single parse attempt happens when the finish
//! chunk arrives.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ApiError, CodaError, Result};
use crate::llm::message::{ContentBlock, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, EventStream, FinishReason, LlmProvider, ModelInfo, StreamEvent,
    ToolDefinition, Usage,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Create with a custom base URL (proxies, compatible gateways)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Convert internal messages to the chat-completions format. Tool
    /// results become `role: tool` messages keyed by tool_call_id.
    fn convert_messages(&self, request: &CompletionRequest) -> Vec<OpenAiMessage> {
        let mut out = Vec::new();

        if let Some(system) = request.system_text() {
            out.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for m in request.messages.iter().filter(|m| m.role != Role::System) {
            match &m.content {
                MessageContent::Text(text) => out.push(OpenAiMessage {
                    role: match m.role {
                        Role::Assistant => "assistant".to_string(),
                        _ => "user".to_string(),
                    },
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                }),
                MessageContent::Blocks(blocks) => {
                    let mut text_parts: Vec<String> = Vec::new();
                    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
                    let mut tool_results: Vec<(String, String)> = Vec::new();

                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => text_parts.push(text.clone()),
                            ContentBlock::ToolUse { id, name, input } => {
                                tool_calls.push(OpenAiToolCall {
                                    id: id.clone(),
                                    call_type: "function".to_string(),
                                    function: OpenAiFunctionCall {
                                        name: name.clone(),
                                        arguments: input.to_string(),
                                    },
                                });
                            }
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => {
                                tool_results.push((tool_use_id.clone(), content.clone()));
                            }
                        }
                    }

                    if m.role == Role::Assistant {
                        out.push(OpenAiMessage {
                            role: "assistant".to_string(),
                            content: if text_parts.is_empty() {
                                None
                            } else {
                                Some(text_parts.join("\n"))
                            },
                            tool_calls: if tool_calls.is_empty() {
                                None
                            } else {
                                Some(tool_calls)
                            },
                            tool_call_id: None,
                        });
                    } else {
                        for (tool_call_id, content) in tool_results {
                            out.push(OpenAiMessage {
                                role: "tool".to_string(),
                                content: Some(content),
                                tool_calls: None,
                                tool_call_id: Some(tool_call_id),
                            });
                        }
                        if !text_parts.is_empty() {
                            out.push(OpenAiMessage {
                                role: "user".to_string(),
                                content: Some(text_parts.join("\n")),
                                tool_calls: None,
                                tool_call_id: None,
                            });
                        }
                    }
                }
            }
        }

        out
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|t| OpenAiTool {
                tool_type: "function".to_string(),
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: serde_json::json!({
                        "type": t.input_schema.schema_type,
                        "properties": t.input_schema.properties,
                        "required": t.input_schema.required,
                    }),
                },
            })
            .collect()
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: self.convert_messages(request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream,
            stream_options: stream.then(|| OpenAiStreamOptions {
                include_usage: true,
            }),
        }
    }

    /// Classify an error response once, at the protocol boundary
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> CodaError {
        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorBody>(body) {
            let detail = error_response.error;
            match (status, detail.code.as_deref()) {
                (401, _) => CodaError::Api(ApiError::AuthenticationFailed),
                (429, _) => CodaError::Api(ApiError::RateLimited(
                    retry_after.unwrap_or(10) as u32
                )),
                (_, Some("context_length_exceeded")) => {
                    CodaError::Api(ApiError::ContextTooLong {
                        current: 0,
                        limit: 0,
                    })
                }
                (_, Some("model_not_found")) | (404, _) => {
                    CodaError::Api(ApiError::ModelNotFound(detail.message))
                }
                (400, _) => CodaError::Api(ApiError::InvalidResponse(detail.message)),
                _ => CodaError::Api(ApiError::ServerError {
                    status,
                    message: detail.message,
                }),
            }
        } else {
            CodaError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

/// Accumulator for one positional tool-call index
#[derive(Debug, Default)]
struct CallAccum {
    id: String,
    name: String,
    args: String,
    started_emitted: bool,
}

/// Normalization state carried across one stream
#[derive(Debug, Default)]
struct StreamState {
    calls: BTreeMap<u32, CallAccum>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    finished: bool,
}

/// Fold one parsed chunk into the state, producing canonical events.
///
/// The finish chunk triggers the per-index parse flush; OpenAI sends the
/// usage-bearing chunk after finish_reason, so `TurnFinished` waits for
/// end of stream (`flush_finish`).
fn fold_chunk(state: &mut StreamState, chunk: OpenAiStreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(usage) = chunk.usage {
        state.usage = Some(Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            ..Default::default()
        });
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return events;
    };

    if let Some(content) = choice.delta.content {
        if !content.is_empty() {
            events.push(StreamEvent::TextDelta { text: content });
        }
    }

    for tc in choice.delta.tool_calls.unwrap_or_default() {
        let accum = state.calls.entry(tc.index).or_default();
        if let Some(id) = tc.id {
            accum.id = id;
        }
        if let Some(function) = tc.function {
            if let Some(name) = function.name {
                accum.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                accum.args.push_str(&arguments);
                if accum.started_emitted {
                    events.push(StreamEvent::ToolCallArgsDelta {
                        id: effective_id(accum, tc.index),
                        partial: arguments,
                    });
                }
            }
        }
        // Emit Started once the call is addressable by name
        if !accum.started_emitted && !accum.name.is_empty() {
            accum.started_emitted = true;
            events.push(StreamEvent::ToolCallStarted {
                id: effective_id(accum, tc.index),
                name: accum.name.clone(),
            });
        }
    }

    if let Some(reason) = choice.finish_reason {
        state.finish_reason = Some(reason);
        events.extend(flush_ready_calls(state));
    }

    events
}

/// Some gateways omit the call id; synthesize a positional one.
fn effective_id(accum: &CallAccum, index: u32) -> String {
    if accum.id.is_empty() {
        format!("call_{}", index)
    } else {
        accum.id.clone()
    }
}

/// Parse every accumulated call exactly once, in index order
fn flush_ready_calls(state: &mut StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let calls = std::mem::take(&mut state.calls);

    for (index, accum) in calls {
        let input = if accum.args.trim().is_empty() {
            Ok(serde_json::Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(&accum.args)
        };
        match input {
            Ok(input) => events.push(StreamEvent::ToolCallReady {
                id: effective_id(&accum, index),
                name: accum.name.clone(),
                input,
            }),
            Err(e) => events.push(StreamEvent::StreamError {
                error: ApiError::InvalidResponse(format!(
                    "tool call {} arguments failed to parse: {}",
                    effective_id(&accum, index),
                    e
                )),
            }),
        }
    }

    events
}

/// Emit the terminal event once the `[DONE]` sentinel arrives
fn flush_finish(state: &mut StreamState) -> Vec<StreamEvent> {
    if state.finished {
        return vec![];
    }
    state.finished = true;

    let reason = match state.finish_reason.as_deref() {
        Some("tool_calls") => FinishReason::ToolUse,
        Some("length") => FinishReason::MaxTokens,
        _ => FinishReason::EndTurn,
    };
    vec![StreamEvent::TurnFinished {
        reason,
        usage: state.usage.take(),
    }]
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gpt-4o".to_string(),
                display_name: "GPT-4o".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_tools: true,
                input_cost_per_1k: 0.0025,
                output_cost_per_1k: 0.01,
            },
            ModelInfo {
                id: "gpt-4o-mini".to_string(),
                display_name: "GPT-4o mini".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_tools: true,
                input_cost_per_1k: 0.00015,
                output_cost_per_1k: 0.0006,
            },
            ModelInfo {
                id: "gpt-4.1".to_string(),
                display_name: "GPT-4.1".to_string(),
                context_window: 1_000_000,
                max_output_tokens: 32_768,
                supports_tools: true,
                input_cost_per_1k: 0.002,
                output_cost_per_1k: 0.008,
            },
        ]
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let body = self.build_request(&request, true);

        let response = self
            .client
            .post(&self.base_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(super::classify_transport_error)?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        let byte_stream = response.bytes_stream();

        let event_stream = byte_stream
            .map(|result| result.map_err(|e| CodaError::Api(ApiError::StreamError(e.to_string()))))
            .scan(
                (String::new(), StreamState::default()),
                |(buffer, state), result| {
                    let chunk = match result {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                        Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                    };

                    buffer.push_str(&chunk);

                    let mut events = Vec::new();

                    // SSE data lines, one JSON chunk each
                    while let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim().to_string();
                        *buffer = buffer[pos + 1..].to_string();

                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };

                        if data == "[DONE]" {
                            events.extend(flush_finish(state).into_iter().map(Ok));
                            continue;
                        }

                        match serde_json::from_str::<OpenAiStreamChunk>(data) {
                            Ok(parsed) => {
                                events.extend(fold_chunk(state, parsed).into_iter().map(Ok));
                            }
                            Err(e) => {
                                events.push(Ok(StreamEvent::StreamError {
                                    error: ApiError::InvalidResponse(format!(
                                        "unparseable stream chunk: {}",
                                        e
                                    )),
                                }));
                            }
                        }
                    }

                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}
