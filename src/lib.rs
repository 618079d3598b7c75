// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Coda - streaming tool-call engine for an AI coding assistant.
//!
//! This crate exposes the runtime used by the `coda` CLI (`src/main.rs`):
//! - `llm`: provider abstraction, canonical stream events, and the
//!   Anthropic/OpenAI/Ollama adapters that normalize three vendor
//!   streaming protocols into one event union
//! - `agent`: the instruction loop controller, duplicate-instruction
//!   debounce, context bounding, and usage accounting
//! - `tools`: built-in filesystem and shell tools, the transactional
//!   multi-file editor, the read-only result cache, and concurrent
//!   dispatch
//! - `config`: layered TOML settings

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;

pub use error::{CodaError, Result};
