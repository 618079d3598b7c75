// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic API provider adapter
//!
//! Block-streaming protocol: a tool_use block opens with the tool name and
//! an empty input object, argument JSON arrives as incremental fragments,
//! and the input is only parseable once the block-stop event fires. The
//! adapter buffers fragments per block index and emits `ToolCallReady`
//! exactly once, at block close, after a single parse of the assembled
//! text. A parse failure at close is a `StreamError`, never empty args.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ApiError, CodaError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, EventStream, FinishReason, LlmProvider, ModelInfo, StreamEvent,
    ToolDefinition, Usage,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Convert internal messages to Anthropic format
    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };

                let content = match &m.content {
                    MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
                    MessageContent::Blocks(blocks) => {
                        let converted: Vec<AnthropicContentBlock> = blocks
                            .iter()
                            .map(|b| match b {
                                ContentBlock::Text { text } => {
                                    AnthropicContentBlock::Text { text: text.clone() }
                                }
                                ContentBlock::ToolUse { id, name, input } => {
                                    AnthropicContentBlock::ToolUse {
                                        id: id.clone(),
                                        name: name.clone(),
                                        input: input.clone(),
                                    }
                                }
                                ContentBlock::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => AnthropicContentBlock::ToolResult {
                                    tool_use_id: tool_use_id.clone(),
                                    content: content.clone(),
                                    is_error: *is_error,
                                },
                            })
                            .collect();
                        AnthropicContent::Blocks(converted)
                    }
                };

                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            })
            .collect()
    }

    /// Build the request body. Cacheable system segments become content
    /// blocks tagged with `cache_control: ephemeral`; if no segment is
    /// cacheable the system prompt goes out as a plain string.
    fn build_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let system = if request.system.is_empty() {
            None
        } else if request.system.iter().any(|s| s.cacheable) {
            Some(AnthropicSystem::Blocks(
                request
                    .system
                    .iter()
                    .map(|s| AnthropicSystemBlock {
                        block_type: "text".to_string(),
                        text: s.text.clone(),
                        cache_control: s.cacheable.then(|| CacheControl {
                            control_type: "ephemeral".to_string(),
                        }),
                    })
                    .collect(),
            ))
        } else {
            request.system_text().map(AnthropicSystem::Text)
        };

        AnthropicRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            system,
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: Some(stream),
        }
    }

    /// Extract Retry-After header value (numeric form only)
    fn extract_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Parse token counts from a message like
    /// "prompt is too long: 215300 tokens > 200000 maximum"
    fn parse_token_counts(message: &str) -> (u32, u32) {
        let numbers: Vec<u32> = message
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|s| s.parse().ok())
            .collect();

        match numbers.as_slice() {
            [current, limit, ..] => (*current, *limit),
            [single] => (*single, 0),
            _ => (0, 0),
        }
    }

    /// Classify an error response once, at the protocol boundary
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> CodaError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) {
            match error_response.error.error_type.as_str() {
                "authentication_error" => CodaError::Api(ApiError::AuthenticationFailed),
                "rate_limit_error" => {
                    let retry_secs = retry_after.unwrap_or(10) as u32;
                    CodaError::Api(ApiError::RateLimited(retry_secs))
                }
                "not_found_error" => {
                    CodaError::Api(ApiError::ModelNotFound(error_response.error.message))
                }
                "invalid_request_error" => {
                    let msg = &error_response.error.message;
                    if msg.contains("too long") || (msg.contains("tokens") && msg.contains("maximum"))
                    {
                        let (current, limit) = Self::parse_token_counts(msg);
                        CodaError::Api(ApiError::ContextTooLong { current, limit })
                    } else {
                        CodaError::Api(ApiError::InvalidResponse(error_response.error.message))
                    }
                }
                _ => CodaError::Api(ApiError::ServerError {
                    status,
                    message: error_response.error.message,
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

/// One raw SSE event from the wire, before normalization
#[derive(Debug)]
enum WireEvent {
    BlockStartText {
        index: usize,
    },
    BlockStartToolUse {
        index: usize,
        id: String,
        name: String,
    },
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        index: usize,
        partial_json: String,
    },
    BlockStop {
        index: usize,
    },
    MessageDelta {
        stop_reason: Option<String>,
        usage: Option<Usage>,
    },
    MessageStop,
    Error {
        error_type: String,
        message: String,
    },
}

/// A tool_use block whose argument JSON is still streaming
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

/// Normalization state carried across one stream
#[derive(Debug, Default)]
struct StreamState {
    pending: HashMap<usize, PendingCall>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
    saw_tool_call: bool,
}

/// Parse a Server-Sent Event into a wire event
fn parse_sse_event(event_str: &str) -> Option<WireEvent> {
    let mut event_type = None;
    let mut data = None;

    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("event: ") {
            event_type = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest.to_string());
        }
    }

    let event_type = event_type?;
    let data = data?;

    match event_type.as_str() {
        "content_block_start" => {
            let parsed: serde_json::Value = serde_json::from_str(&data).ok()?;
            let index = parsed["index"].as_u64()? as usize;
            let block = &parsed["content_block"];

            match block["type"].as_str()? {
                "text" => Some(WireEvent::BlockStartText { index }),
                "tool_use" => Some(WireEvent::BlockStartToolUse {
                    index,
                    id: block["id"].as_str()?.to_string(),
                    name: block["name"].as_str()?.to_string(),
                }),
                _ => None,
            }
        }
        "content_block_delta" => {
            let parsed: serde_json::Value = serde_json::from_str(&data).ok()?;
            let index = parsed["index"].as_u64()? as usize;
            let delta = &parsed["delta"];

            match delta["type"].as_str()? {
                "text_delta" => Some(WireEvent::TextDelta {
                    text: delta["text"].as_str()?.to_string(),
                }),
                "input_json_delta" => Some(WireEvent::InputJsonDelta {
                    index,
                    partial_json: delta["partial_json"].as_str()?.to_string(),
                }),
                _ => None,
            }
        }
        "content_block_stop" => {
            let parsed: serde_json::Value = serde_json::from_str(&data).ok()?;
            let index = parsed["index"].as_u64()? as usize;
            Some(WireEvent::BlockStop { index })
        }
        "message_delta" => {
            let parsed: serde_json::Value = serde_json::from_str(&data).ok()?;
            let delta = &parsed["delta"];

            let stop_reason = delta["stop_reason"].as_str().map(String::from);
            let usage = parsed.get("usage").map(|u| Usage {
                input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                cache_creation_input_tokens: u["cache_creation_input_tokens"].as_u64().unwrap_or(0)
                    as u32,
                cache_read_input_tokens: u["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
            });

            Some(WireEvent::MessageDelta { stop_reason, usage })
        }
        "message_stop" => Some(WireEvent::MessageStop),
        "error" => {
            let parsed: serde_json::Value = serde_json::from_str(&data).ok()?;
            Some(WireEvent::Error {
                error_type: parsed["error"]["type"].as_str()?.to_string(),
                message: parsed["error"]["message"].as_str()?.to_string(),
            })
        }
        _ => None,
    }
}

/// Fold one wire event into the normalization state, producing canonical
/// events. Tool argument fragments are only relayed as informational
/// deltas; the single parse happens at block stop.
fn fold_wire_event(state: &mut StreamState, event: WireEvent) -> Vec<StreamEvent> {
    match event {
        WireEvent::BlockStartText { .. } => vec![],
        WireEvent::BlockStartToolUse { index, id, name } => {
            state.saw_tool_call = true;
            let started = StreamEvent::ToolCallStarted {
                id: id.clone(),
                name: name.clone(),
            };
            state.pending.insert(
                index,
                PendingCall {
                    id,
                    name,
                    args: String::new(),
                },
            );
            vec![started]
        }
        WireEvent::TextDelta { text } => vec![StreamEvent::TextDelta { text }],
        WireEvent::InputJsonDelta {
            index,
            partial_json,
        } => {
            if let Some(call) = state.pending.get_mut(&index) {
                call.args.push_str(&partial_json);
                vec![StreamEvent::ToolCallArgsDelta {
                    id: call.id.clone(),
                    partial: partial_json,
                }]
            } else {
                vec![]
            }
        }
        WireEvent::BlockStop { index } => {
            let Some(call) = state.pending.remove(&index) else {
                return vec![];
            };
            // An empty fragment buffer means the call takes no arguments
            let input = if call.args.trim().is_empty() {
                Ok(serde_json::Value::Object(serde_json::Map::new()))
            } else {
                serde_json::from_str(&call.args)
            };
            match input {
                Ok(input) => vec![StreamEvent::ToolCallReady {
                    id: call.id,
                    name: call.name,
                    input,
                }],
                Err(e) => vec![StreamEvent::StreamError {
                    error: ApiError::InvalidResponse(format!(
                        "tool call {} arguments failed to parse: {}",
                        call.id, e
                    )),
                }],
            }
        }
        WireEvent::MessageDelta { stop_reason, usage } => {
            if stop_reason.is_some() {
                state.stop_reason = stop_reason;
            }
            if usage.is_some() {
                state.usage = usage;
            }
            vec![]
        }
        WireEvent::MessageStop => {
            let reason = match state.stop_reason.as_deref() {
                Some("tool_use") => FinishReason::ToolUse,
                Some("max_tokens") => FinishReason::MaxTokens,
                _ if state.saw_tool_call => FinishReason::ToolUse,
                _ => FinishReason::EndTurn,
            };
            vec![StreamEvent::TurnFinished {
                reason,
                usage: state.usage.take(),
            }]
        }
        WireEvent::Error {
            error_type,
            message,
        } => {
            let error = match error_type.as_str() {
                "overloaded_error" => ApiError::ServerError {
                    status: 529,
                    message,
                },
                "rate_limit_error" => ApiError::RateLimited(10),
                _ => ApiError::StreamError(format!("{}: {}", error_type, message)),
            };
            vec![StreamEvent::StreamError { error }]
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-sonnet-4-20250514".to_string(),
                display_name: "Claude Sonnet 4".to_string(),
                context_window: 200_000,
                max_output_tokens: 64_000,
                supports_tools: true,
                input_cost_per_1k: 0.003,
                output_cost_per_1k: 0.015,
            },
            ModelInfo {
                id: "claude-3-5-sonnet-20241022".to_string(),
                display_name: "Claude 3.5 Sonnet".to_string(),
                context_window: 200_000,
                max_output_tokens: 8_192,
                supports_tools: true,
                input_cost_per_1k: 0.003,
                output_cost_per_1k: 0.015,
            },
            ModelInfo {
                id: "claude-3-5-haiku-20241022".to_string(),
                display_name: "Claude 3.5 Haiku".to_string(),
                context_window: 200_000,
                max_output_tokens: 8_192,
                supports_tools: true,
                input_cost_per_1k: 0.001,
                output_cost_per_1k: 0.005,
            },
        ]
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let body = self.build_request(&request, true);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(super::classify_transport_error)?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            // Extract Retry-After before consuming the body
            let retry_after = Self::extract_retry_after(response.headers());
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

                    // SSE events are separated by blank lines
                    while let Some(pos) = buffer.find("\n\n") {
                        let event_str = buffer[..pos].to_string();
                        *buffer = buffer[pos + 2..].to_string();

                        if let Some(wire) = parse_sse_event(&event_str) {
                            events.extend(fold_wire_event(state, wire).into_iter().map(Ok));
                        }
                    }

                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<AnthropicSystem>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicSystem {
    Text(String),
    Blocks(Vec<AnthropicSystemBlock>),
}

#[derive(Debug, Serialize)]
struct AnthropicSystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::SystemSegment;

    fn sse(event: &str, data: &str) -> String {
        format!("event: {}\ndata: {}", event, data)
    }

    // ===== SSE Parsing Tests =====

    #[test]
    fn test_parse_text_delta() {
        let event = parse_sse_event(&sse(
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"text_delta","text":"hello"}}"#,
        ))
        .unwrap();
        assert!(matches!(event, WireEvent::TextDelta { text } if text == "hello"));
    }

    #[test]
    fn test_parse_tool_use_block_start() {
        let event = parse_sse_event(&sse(
            "content_block_start",
            r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file","input":{}}}"#,
        ))
        .unwrap();
        match event {
            WireEvent::BlockStartToolUse { index, id, name } => {
                assert_eq!(index, 1);
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "read_file");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_event_ignored() {
        assert!(parse_sse_event(&sse("ping", "{}")).is_none());
        assert!(parse_sse_event("not an sse event").is_none());
    }

    // ===== Normalization Tests =====

    #[test]
    fn test_tool_call_assembled_across_fragments() {
        let mut state = StreamState::default();

        let started = fold_wire_event(
            &mut state,
            WireEvent::BlockStartToolUse {
                index: 0,
                id: "toolu_1".to_string(),
                name: "edit_file".to_string(),
            },
        );
        assert!(matches!(
            started[0],
            StreamEvent::ToolCallStarted { ref name, .. } if name == "edit_file"
        ));

        // Three fragments, none individually valid JSON
        for fragment in [r#"{"filePath":"#, r#""a.txt","old"#, r#"String":"x"}"#] {
            let events = fold_wire_event(
                &mut state,
                WireEvent::InputJsonDelta {
                    index: 0,
                    partial_json: fragment.to_string(),
                },
            );
            assert!(matches!(events[0], StreamEvent::ToolCallArgsDelta { .. }));
        }

        let ready = fold_wire_event(&mut state, WireEvent::BlockStop { index: 0 });
        assert_eq!(ready.len(), 1);
        match &ready[0] {
            StreamEvent::ToolCallReady { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "edit_file");
                assert_eq!(input["filePath"], "a.txt");
                assert_eq!(input["oldString"], "x");
            }
            other => panic!("expected ToolCallReady, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_args_at_close_is_stream_error() {
        let mut state = StreamState::default();
        fold_wire_event(
            &mut state,
            WireEvent::BlockStartToolUse {
                index: 0,
                id: "toolu_1".to_string(),
                name: "read_file".to_string(),
            },
        );
        fold_wire_event(
            &mut state,
            WireEvent::InputJsonDelta {
                index: 0,
                partial_json: r#"{"filePath": "#.to_string(),
            },
        );

        let events = fold_wire_event(&mut state, WireEvent::BlockStop { index: 0 });
        assert!(matches!(
            events[0],
            StreamEvent::StreamError {
                error: ApiError::InvalidResponse(_)
            }
        ));
    }

    #[test]
    fn test_empty_args_parse_as_empty_object() {
        let mut state = StreamState::default();
        fold_wire_event(
            &mut state,
            WireEvent::BlockStartToolUse {
                index: 0,
                id: "toolu_1".to_string(),
                name: "list_files".to_string(),
            },
        );
        let events = fold_wire_event(&mut state, WireEvent::BlockStop { index: 0 });
        match &events[0] {
            StreamEvent::ToolCallReady { input, .. } => {
                assert!(input.as_object().unwrap().is_empty());
            }
            other => panic!("expected ToolCallReady, got {:?}", other),
        }
    }

    #[test]
    fn test_turn_finished_carries_reason_and_usage() {
        let mut state = StreamState::default();
        fold_wire_event(
            &mut state,
            WireEvent::MessageDelta {
                stop_reason: Some("tool_use".to_string()),
                usage: Some(Usage {
                    input_tokens: 20,
                    output_tokens: 10,
                    ..Default::default()
                }),
            },
        );
        let events = fold_wire_event(&mut state, WireEvent::MessageStop);
        match &events[0] {
            StreamEvent::TurnFinished { reason, usage } => {
                assert_eq!(*reason, FinishReason::ToolUse);
                assert_eq!(usage.unwrap().output_tokens, 10);
            }
            other => panic!("expected TurnFinished, got {:?}", other),
        }
    }

    #[test]
    fn test_in_band_error_event_classification() {
        let mut state = StreamState::default();
        let events = fold_wire_event(
            &mut state,
            WireEvent::Error {
                error_type: "overloaded_error".to_string(),
                message: "Overloaded".to_string(),
            },
        );
        match &events[0] {
            StreamEvent::StreamError { error } => {
                assert!(error.is_transient());
            }
            other => panic!("expected StreamError, got {:?}", other),
        }
    }

    // ===== Request Construction Tests =====

    #[test]
    fn test_cacheable_system_segments_get_cache_control() {
        let provider = AnthropicProvider::new("test-key");
        let request = CompletionRequest::new("claude-3-5-haiku-20241022", vec![]).with_system(
            vec![
                SystemSegment {
                    text: "stable".to_string(),
                    cacheable: true,
                },
                SystemSegment {
                    text: "volatile".to_string(),
                    cacheable: false,
                },
            ],
        );

        let body = provider.build_request(&request, false);
        let json = serde_json::to_value(&body).unwrap();
        let system = json["system"].as_array().unwrap();
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
        assert!(system[1].get("cache_control").is_none());
    }

    #[test]
    fn test_plain_system_prompt_stays_a_string() {
        let provider = AnthropicProvider::new("test-key");
        let request = CompletionRequest::new("claude-3-5-haiku-20241022", vec![]).with_system(
            vec![SystemSegment {
                text: "just text".to_string(),
                cacheable: false,
            }],
        );

        let body = provider.build_request(&request, false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], "just text");
    }

    // ===== Error Classification Tests =====

    #[test]
    fn test_parse_error_authentication() {
        let provider = AnthropicProvider::new("bad-key");
        let err = provider.parse_error(
            401,
            r#"{"error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
            None,
        );
        assert!(matches!(
            err,
            CodaError::Api(ApiError::AuthenticationFailed)
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_error_rate_limited_uses_retry_after() {
        let provider = AnthropicProvider::new("key");
        let err = provider.parse_error(
            429,
            r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#,
            Some(30),
        );
        assert!(matches!(err, CodaError::Api(ApiError::RateLimited(30))));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_error_context_too_long() {
        let provider = AnthropicProvider::new("key");
        let err = provider.parse_error(
            400,
            r#"{"error":{"type":"invalid_request_error","message":"prompt is too long: 215300 tokens > 200000 maximum"}}"#,
            None,
        );
        assert!(matches!(
            err,
            CodaError::Api(ApiError::ContextTooLong {
                current: 215300,
                limit: 200000
            })
        ));
    }

    #[test]
    fn test_parse_error_unparseable_body() {
        let provider = AnthropicProvider::new("key");
        let err = provider.parse_error(500, "upstream exploded", None);
        assert!(matches!(
            err,
            CodaError::Api(ApiError::ServerError { status: 500, .. })
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_token_counts() {
        assert_eq!(
            AnthropicProvider::parse_token_counts(
                "prompt is too long: 215300 tokens > 200000 maximum"
            ),
            (215300, 200000)
        );
        assert_eq!(AnthropicProvider::parse_token_counts("no numbers"), (0, 0));
    }
}
