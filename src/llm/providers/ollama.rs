// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama local model provider adapter
//!
//! Whole-call protocol: Ollama's /api/chat NDJSON stream delivers each
//! tool call complete in a single chunk, so no argument buffering is
//! needed; the adapter still emits the full canonical lifecycle
//! (Started then Ready) for uniformity with the streaming vendors.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, CodaError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, EventStream, FinishReason, LlmProvider, ModelInfo, StreamEvent,
    ToolDefinition, Usage,
};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama local model provider
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the default base URL
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_OLLAMA_URL.to_string(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn connect_error(e: reqwest::Error) -> CodaError {
        if e.is_timeout() {
            CodaError::Api(ApiError::Timeout)
        } else if e.is_connect() {
            CodaError::Api(ApiError::Network(
                "Ollama is not running. Start the Ollama app or run 'ollama serve'".to_string(),
            ))
        } else {
            CodaError::Http(e)
        }
    }

    /// Convert internal messages to Ollama format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };

                match &m.content {
                    MessageContent::Text(text) => OllamaMessage {
                        role: role.to_string(),
                        content: text.clone(),
                        tool_calls: None,
                    },
                    MessageContent::Blocks(blocks) => {
                        let mut text_parts: Vec<String> = Vec::new();
                        let mut tool_calls: Vec<OllamaToolCall> = Vec::new();

                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } => text_parts.push(text.clone()),
                                // Ollama has no tool-call ids; order pairs calls with results
                                ContentBlock::ToolUse { name, input, .. } => {
                                    tool_calls.push(OllamaToolCall {
                                        function: OllamaFunctionCall {
                                            name: name.clone(),
                                            arguments: input.clone(),
                                        },
                                    });
                                }
                                ContentBlock::ToolResult { content, .. } => {
                                    text_parts.push(content.clone());
                                }
                            }
                        }

                        OllamaMessage {
                            role: role.to_string(),
                            content: text_parts.join("\n"),
                            tool_calls: if tool_calls.is_empty() {
                                None
                            } else {
                                Some(tool_calls)
                            },
                        }
                    }
                }
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|t| OllamaTool {
                tool_type: "function".to_string(),
                function: OllamaFunction {
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

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            // Ollama has no prompt caching; segments fall back to a plain string
            system: request.system_text(),
            stream,
            options: Some(OllamaOptions {
                temperature: Some(request.temperature),
                num_predict: Some(request.max_tokens as i64),
            }),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
        }
    }

    fn parse_error(&self, status: u16, body: &str) -> CodaError {
        if let Ok(error_response) = serde_json::from_str::<OllamaError>(body) {
            let message = error_response.error;
            if message.contains("model") && message.contains("not found") {
                CodaError::Api(ApiError::ModelNotFound(message))
            } else {
                CodaError::Api(ApiError::ServerError { status, message })
            }
        } else {
            CodaError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalization state carried across one stream
#[derive(Debug, Default)]
struct StreamState {
    next_call: usize,
    saw_tool_call: bool,
    finished: bool,
}

/// Fold one NDJSON chunk into canonical events
fn fold_chunk(state: &mut StreamState, chunk: OllamaStreamResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(tool_calls) = chunk.message.tool_calls {
        for tc in tool_calls {
            state.saw_tool_call = true;
            let id = format!("tool_{}", state.next_call);
            state.next_call += 1;

            events.push(StreamEvent::ToolCallStarted {
                id: id.clone(),
                name: tc.function.name.clone(),
            });
            // The call arrives complete; Ready follows immediately
            events.push(StreamEvent::ToolCallReady {
                id,
                name: tc.function.name,
                input: tc.function.arguments,
            });
        }
    }

    if !chunk.message.content.is_empty() {
        events.push(StreamEvent::TextDelta {
            text: chunk.message.content,
        });
    }

    if chunk.done && !state.finished {
        state.finished = true;
        events.push(StreamEvent::TurnFinished {
            reason: if state.saw_tool_call {
                FinishReason::ToolUse
            } else {
                FinishReason::EndTurn
            },
            usage: Some(Usage {
                input_tokens: chunk.prompt_eval_count.unwrap_or(0) as u32,
                output_tokens: chunk.eval_count.unwrap_or(0) as u32,
                ..Default::default()
            }),
        });
    }

    events
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        // Common local models; actual availability depends on what's pulled
        vec![
            ModelInfo {
                id: "qwen2.5-coder:14b".to_string(),
                display_name: "Qwen 2.5 Coder 14B".to_string(),
                context_window: 32_768,
                max_output_tokens: 8_192,
                supports_tools: true,
                input_cost_per_1k: 0.0,
                output_cost_per_1k: 0.0,
            },
            ModelInfo {
                id: "llama3.2:latest".to_string(),
                display_name: "Llama 3.2".to_string(),
                context_window: 128_000,
                max_output_tokens: 8_192,
                supports_tools: true,
                input_cost_per_1k: 0.0,
                output_cost_per_1k: 0.0,
            },
        ]
    }

    fn supports_model(&self, model: &str) -> bool {
        // Any pulled model can be served; checked at request time
        !model.is_empty()
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(&request, true);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::connect_error)?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
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

                    // NDJSON: one complete JSON object per line
                    while let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim().to_string();
                        *buffer = buffer[pos + 1..].to_string();

                        if line.is_empty() {
                            continue;
                        }

                        if let Ok(parsed) = serde_json::from_str::<OllamaStreamResponse>(&line) {
                            events.extend(fold_chunk(state, parsed).into_iter().map(Ok));
                        }
                    }

                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamResponse {
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}
