// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent loop controller
//!
//! Drives the instruction-to-completion loop: stream a model turn,
//! dispatch any tool calls it requested, feed the results back, and
//! repeat until the model finishes or the turn bound is hit. Transient
//! provider failures retry with backoff; text accumulated before a
//! stream failure is never discarded.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::context::ContextManager;
use crate::agent::dedup::InstructionDebouncer;
use crate::agent::events::{AgentEvent, AgentEventSender, ToolResultFrame};
use crate::agent::usage::UsageTracker;
use crate::config::{AgentConfig, RetryConfig};
use crate::error::{CodaError, Result};
use crate::llm::message::{ContentBlock, Conversation, Message};
use crate::llm::provider::{
    CompletionRequest, FinishReason, LlmProvider, StreamEvent, Usage,
};
use crate::llm::retry::with_retry;
use crate::tools::dispatcher::{ToolDispatcher, ToolInvocation};
use crate::tools::ToolContext;

/// Outcome of one instruction run
#[derive(Debug)]
pub struct RunOutcome {
    /// Final assistant text (partial if the run aborted mid-stream)
    pub text: String,
    /// Model turns consumed
    pub turns: u32,
    /// True when the run ended without a clean finish
    pub aborted: bool,
    /// Token totals across all turns
    pub usage: Usage,
}

/// Everything one successful model turn produced
struct TurnData {
    text: String,
    calls: Vec<ToolInvocation>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
}

/// A failed turn still carries whatever text had streamed
struct TurnFailure {
    error: CodaError,
    partial_text: String,
}

/// Drives the streaming tool-call loop for one session
pub struct AgentController {
    provider: Arc<dyn LlmProvider>,
    dispatcher: ToolDispatcher,
    context_manager: ContextManager,
    debouncer: InstructionDebouncer,
    usage: UsageTracker,
    agent_config: AgentConfig,
    retry_config: RetryConfig,
    model: String,
    system_prompt: String,
}

impl AgentController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: ToolDispatcher,
        context_manager: ContextManager,
        agent_config: AgentConfig,
        retry_config: RetryConfig,
        model: String,
        system_prompt: String,
    ) -> Self {
        let window = std::time::Duration::from_secs(agent_config.dedup_window_secs);
        Self {
            provider,
            dispatcher,
            context_manager,
            debouncer: InstructionDebouncer::new(window),
            usage: UsageTracker::new(),
            agent_config,
            retry_config,
            model,
            system_prompt,
        }
    }

    /// Session usage so far
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Run one instruction to completion
    ///
    /// Emits progress frames on `events`; the last frame is always
    /// `Done`. The conversation is updated in place so follow-up
    /// instructions see this run's history.
    pub async fn run(
        &mut self,
        conversation: &mut Conversation,
        instruction: &str,
        tool_context: &ToolContext,
        events: &AgentEventSender,
    ) -> Result<RunOutcome> {
        if !self.debouncer.accept(tool_context.session_id, instruction) {
            let message = "Duplicate instruction ignored (submitted again within the debounce window)".to_string();
            let _ = events.send(AgentEvent::Error {
                message: message.clone(),
                transient: false,
            });
            let _ = events.send(AgentEvent::Done {
                turns: 0,
                usage: Usage::default(),
                aborted: true,
            });
            return Err(CodaError::DuplicateInstruction(message));
        }

        conversation.push(Message::user(instruction));
        info!(model = %self.model, "starting agent run");

        let mut run_usage = Usage::default();
        let mut final_text = String::new();
        let mut turns = 0u32;

        while turns < self.agent_config.max_turns {
            turns += 1;
            debug!(turn = turns, "model turn");

            let turn = match self.turn_with_retry(conversation, instruction, events).await {
                Ok(turn) => turn,
                Err(failure) => {
                    // Stream died; keep what the model already said
                    if !failure.partial_text.is_empty() {
                        conversation.push(Message::assistant(failure.partial_text.clone()));
                        final_text = failure.partial_text;
                    }
                    let _ = events.send(AgentEvent::Error {
                        message: failure.error.to_string(),
                        transient: failure.error.is_transient(),
                    });
                    let _ = events.send(AgentEvent::Done {
                        turns,
                        usage: run_usage,
                        aborted: true,
                    });
                    return Ok(RunOutcome {
                        text: final_text,
                        turns,
                        aborted: true,
                        usage: run_usage,
                    });
                }
            };

            if let Some(usage) = &turn.usage {
                run_usage.add(usage);
                self.usage.record(usage);
            }

            if turn.calls.is_empty() {
                conversation.push(Message::assistant(turn.text.clone()));
                final_text = turn.text;
                let _ = events.send(AgentEvent::Done {
                    turns,
                    usage: run_usage,
                    aborted: false,
                });
                return Ok(RunOutcome {
                    text: final_text,
                    turns,
                    aborted: false,
                    usage: run_usage,
                });
            }

            // Record the assistant's turn, text and tool calls together
            let mut blocks: Vec<ContentBlock> = Vec::new();
            if !turn.text.is_empty() {
                final_text = turn.text.clone();
                blocks.push(ContentBlock::Text { text: turn.text });
            }
            for call in &turn.calls {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            conversation.push(Message::assistant_blocks(blocks));

            let names: Vec<(String, String)> = turn
                .calls
                .iter()
                .map(|c| (c.id.clone(), c.name.clone()))
                .collect();
            let results = self
                .dispatcher
                .dispatch_batch(turn.calls, tool_context)
                .await;

            let frames: Vec<ToolResultFrame> = results
                .iter()
                .map(|r| ToolResultFrame {
                    tool_use_id: r.tool_use_id.clone(),
                    tool_name: names
                        .iter()
                        .find(|(id, _)| *id == r.tool_use_id)
                        .map(|(_, n)| n.clone())
                        .unwrap_or_default(),
                    output: r.output_text().to_string(),
                    is_error: r.is_error(),
                })
                .collect();
            let _ = events.send(AgentEvent::ToolResultsBatch { results: frames });

            // All results go back in a single message
            let result_blocks: Vec<ContentBlock> = results
                .into_iter()
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.tool_use_id.clone(),
                    content: r.output_text().to_string(),
                    is_error: if r.is_error() { Some(true) } else { None },
                })
                .collect();
            conversation.push(Message::tool_results(result_blocks));

            if turn.finish == Some(FinishReason::MaxTokens) {
                warn!("model hit its output token limit mid-turn");
            }
        }

        // Turn bound exhausted with tool calls still pending
        warn!(max_turns = self.agent_config.max_turns, "turn bound reached, aborting run");
        let marker = format!(
            "[run aborted: turn bound of {} reached before the model finished]",
            self.agent_config.max_turns
        );
        conversation.push(Message::assistant(marker.clone()));
        let _ = events.send(AgentEvent::Error {
            message: marker,
            transient: false,
        });
        let _ = events.send(AgentEvent::Done {
            turns,
            usage: run_usage,
            aborted: true,
        });
        Ok(RunOutcome {
            text: final_text,
            turns,
            aborted: true,
            usage: run_usage,
        })
    }

    /// One model turn, retrying transient failures with backoff
    async fn turn_with_retry(
        &self,
        conversation: &Conversation,
        instruction: &str,
        events: &AgentEventSender,
    ) -> std::result::Result<TurnData, TurnFailure> {
        // Partial text of the most recent failed attempt, kept so an
        // exhausted retry still surfaces what the model had said
        let partial = std::sync::Mutex::new(String::new());

        with_retry(
            || async {
                self.stream_one_turn(conversation, instruction, events)
                    .await
                    .map_err(|failure| {
                        if let Ok(mut slot) = partial.lock() {
                            *slot = failure.partial_text;
                        }
                        failure.error
                    })
            },
            &self.retry_config,
            "model turn",
            |attempt, error, delay| {
                let _ = events.send(AgentEvent::Retrying {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
            },
        )
        .await
        .map_err(|error| TurnFailure {
            error,
            partial_text: partial
                .lock()
                .map(|mut s| std::mem::take(&mut *s))
                .unwrap_or_default(),
        })
    }

    /// Issue one streaming request and fold its events
    async fn stream_one_turn(
        &self,
        conversation: &Conversation,
        instruction: &str,
        events: &AgentEventSender,
    ) -> std::result::Result<TurnData, TurnFailure> {
        let messages = self.context_manager.prepare(conversation, instruction);
        let segments = self
            .context_manager
            .system_segments(&self.system_prompt, "");
        let request = CompletionRequest::new(&self.model, messages)
            .with_system(segments)
            .with_tools(self.dispatcher.definitions())
            .with_max_tokens(self.agent_config.max_tokens)
            .with_temperature(self.agent_config.temperature);

        let mut stream = match self.provider.complete_stream(request).await {
            Ok(s) => s,
            Err(error) => {
                return Err(TurnFailure {
                    error,
                    partial_text: String::new(),
                })
            }
        };

        let mut text = String::new();
        let mut calls: Vec<ToolInvocation> = Vec::new();
        let mut finish: Option<FinishReason> = None;
        let mut usage: Option<Usage> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamEvent::TextDelta { text: delta }) => {
                    text.push_str(&delta);
                    let _ = events.send(AgentEvent::Text { text: delta });
                }
                Ok(StreamEvent::ToolCallStarted { id, name }) => {
                    debug!(id = %id, tool = %name, "tool call started");
                }
                Ok(StreamEvent::ToolCallArgsDelta { .. }) => {
                    // Argument fragments are buffered by the adapter;
                    // nothing to surface until the call is ready
                }
                Ok(StreamEvent::ToolCallReady { id, name, input }) => {
                    let _ = events.send(AgentEvent::ToolInput {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    calls.push(ToolInvocation { id, name, input });
                }
                Ok(StreamEvent::TurnFinished {
                    reason,
                    usage: turn_usage,
                }) => {
                    finish = Some(reason);
                    usage = turn_usage;
                }
                Ok(StreamEvent::StreamError { error }) => {
                    return Err(TurnFailure {
                        error: CodaError::Api(error),
                        partial_text: text,
                    });
                }
                Err(error) => {
                    return Err(TurnFailure {
                        error,
                        partial_text: text,
                    });
                }
            }
        }

        Ok(TurnData {
            text,
            calls,
            finish,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::event_channel;
    use crate::config::ContextConfig;
    use crate::llm::provider::{EventStream, ModelInfo};
    use crate::tools::{ToolCache, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider that replays a script of event lists, one per turn
    struct ScriptedProvider {
        turns: Mutex<Vec<Vec<Result<StreamEvent>>>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<Result<StreamEvent>>>) -> Self {
            Self {
                turns: Mutex::new(turns),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn available_models(&self) -> Vec<ModelInfo> {
            Vec::new()
        }

        async fn complete_stream(&self, _request: CompletionRequest) -> Result<EventStream> {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                panic!("scripted provider exhausted");
            }
            let events = turns.remove(0);
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn text_turn(text: &str) -> Vec<Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::TextDelta {
                text: text.to_string(),
            }),
            Ok(StreamEvent::TurnFinished {
                reason: FinishReason::EndTurn,
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    ..Default::default()
                }),
            }),
        ]
    }

    fn tool_turn(id: &str, name: &str, input: serde_json::Value) -> Vec<Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::ToolCallStarted {
                id: id.to_string(),
                name: name.to_string(),
            }),
            Ok(StreamEvent::ToolCallReady {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }),
            Ok(StreamEvent::TurnFinished {
                reason: FinishReason::ToolUse,
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    ..Default::default()
                }),
            }),
        ]
    }

    fn controller_with(provider: ScriptedProvider) -> AgentController {
        let registry = Arc::new(ToolRegistry::with_builtins());
        let dispatcher = ToolDispatcher::new(
            registry,
            Arc::new(ToolCache::new()),
            std::time::Duration::from_secs(30),
        );
        AgentController::new(
            Arc::new(provider),
            dispatcher,
            ContextManager::new(ContextConfig::default()),
            AgentConfig {
                max_turns: 4,
                dedup_window_secs: 3,
                tool_timeout_secs: 30,
                max_tokens: 1024,
                temperature: 0.0,
            },
            RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 4,
                jitter: 0.0,
            },
            "test-model".to_string(),
            "You are a coding assistant.".to_string(),
        )
    }

    fn tool_context(temp_dir: &TempDir) -> ToolContext {
        ToolContext::new(
            temp_dir.path().to_path_buf(),
            Some(temp_dir.path().to_path_buf()),
            uuid::Uuid::new_v4(),
        )
    }

    fn drain(mut rx: crate::agent::events::AgentEventReceiver) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_text_only_run_finishes_in_one_turn() {
        let mut controller = controller_with(ScriptedProvider::new(vec![text_turn("All done.")]));
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "say hello", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.text, "All done.");
        assert_eq!(outcome.turns, 1);
        assert!(!outcome.aborted);
        assert_eq!(outcome.usage.input_tokens, 10);

        let events = drain(rx);
        assert!(matches!(events.last(), Some(AgentEvent::Done { aborted: false, .. })));
        // user + assistant
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_turn_then_final_text() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f.txt"), "file body").unwrap();

        let mut controller = controller_with(ScriptedProvider::new(vec![
            tool_turn("t1", "read_file", serde_json::json!({"filePath": "f.txt"})),
            text_turn("The file says: file body"),
        ]));
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "what is in f.txt", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.turns, 2);
        assert!(!outcome.aborted);

        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolInput { name, .. } if name == "read_file")));
        let batch = events.iter().find_map(|e| match e {
            AgentEvent::ToolResultsBatch { results } => Some(results),
            _ => None,
        });
        let batch = batch.expect("tool results frame");
        assert!(batch[0].output.contains("file body"));

        // user, assistant tool_use, tool results, final assistant
        assert_eq!(conv.len(), 4);
        assert!(conv.messages[1].has_tool_use());
    }

    #[tokio::test]
    async fn test_turn_bound_aborts_looping_model() {
        // Model that calls a tool every single turn
        let turns: Vec<Vec<Result<StreamEvent>>> = (0..10)
            .map(|i| {
                tool_turn(
                    &format!("t{}", i),
                    "list_files",
                    serde_json::json!({"path": "."}),
                )
            })
            .collect();
        let mut controller = controller_with(ScriptedProvider::new(turns));
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "loop forever", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert!(outcome.aborted);
        assert_eq!(outcome.turns, 4);
        // Abort marker recorded in the conversation
        assert!(conv
            .last()
            .and_then(|m| m.text())
            .is_some_and(|t| t.contains("turn bound")));
        let events = drain(rx);
        assert!(matches!(events.last(), Some(AgentEvent::Done { aborted: true, .. })));
    }

    #[tokio::test]
    async fn test_transient_stream_error_retries() {
        let mut controller = controller_with(ScriptedProvider::new(vec![
            vec![Ok(StreamEvent::StreamError {
                error: crate::error::ApiError::Network("connection reset".to_string()),
            })],
            text_turn("Recovered."),
        ]));
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "do the thing", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.text, "Recovered.");
        assert!(!outcome.aborted);
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Retrying { attempt: 1, .. })));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_aborts_and_keeps_partial_text() {
        // max_retries is 2, so a third consecutive failure exhausts the
        // budget and the run aborts with the last attempt's text
        let failing_turn = || {
            vec![
                Ok(StreamEvent::TextDelta {
                    text: "partial answer".to_string(),
                }),
                Ok(StreamEvent::StreamError {
                    error: crate::error::ApiError::Network("connection reset".to_string()),
                }),
            ]
        };
        let mut controller = controller_with(ScriptedProvider::new(vec![
            failing_turn(),
            failing_turn(),
            failing_turn(),
        ]));
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "flaky provider", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert!(outcome.aborted);
        assert_eq!(outcome.text, "partial answer");
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Retrying { attempt: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Retrying { attempt: 2, .. })));
        assert!(matches!(events.last(), Some(AgentEvent::Done { aborted: true, .. })));
    }

    #[tokio::test]
    async fn test_fatal_stream_error_preserves_partial_text() {
        let mut controller = controller_with(ScriptedProvider::new(vec![vec![
            Ok(StreamEvent::TextDelta {
                text: "Here is the start of".to_string(),
            }),
            Ok(StreamEvent::StreamError {
                error: crate::error::ApiError::AuthenticationFailed,
            }),
        ]]));
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "explain this", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert!(outcome.aborted);
        assert_eq!(outcome.text, "Here is the start of");
        // Partial text is kept in history
        assert!(conv
            .last_assistant()
            .and_then(|m| m.text())
            .is_some_and(|t| t.contains("Here is the start of")));
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { transient: false, .. })));
        assert!(matches!(events.last(), Some(AgentEvent::Done { aborted: true, .. })));
    }

    #[tokio::test]
    async fn test_duplicate_instruction_rejected_without_provider_call() {
        let mut controller = controller_with(ScriptedProvider::new(vec![text_turn("once")]));
        let temp_dir = TempDir::new().unwrap();
        let context = tool_context(&temp_dir);
        let (tx, _rx) = event_channel();
        let mut conv = Conversation::new();

        controller
            .run(&mut conv, "same thing", &context, &tx)
            .await
            .unwrap();

        // Script is exhausted; a second provider call would panic, so a
        // rejection here proves the gate fired before the provider
        let (tx2, rx2) = event_channel();
        let err = controller
            .run(&mut conv, "same thing", &context, &tx2)
            .await
            .unwrap_err();

        assert!(matches!(err, CodaError::DuplicateInstruction(_)));
        let events = drain(rx2);
        assert!(matches!(events.last(), Some(AgentEvent::Done { aborted: true, .. })));
    }

    #[tokio::test]
    async fn test_usage_rolls_up_across_turns() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller = controller_with(ScriptedProvider::new(vec![
            tool_turn("t1", "list_files", serde_json::json!({"path": "."})),
            text_turn("done"),
        ]));
        let (tx, _rx) = event_channel();
        let mut conv = Conversation::new();

        let outcome = controller
            .run(&mut conv, "count usage", &tool_context(&temp_dir), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.usage.input_tokens, 20);
        assert_eq!(outcome.usage.output_tokens, 10);
        assert_eq!(controller.usage().turns_recorded(), 2);
    }
}
