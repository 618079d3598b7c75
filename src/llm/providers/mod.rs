// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider implementations

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::Settings;
use crate::error::{ApiError, CodaError, Result};
use crate::llm::provider::LlmProvider;

/// Classify a transport-level request failure into a typed API error
///
/// Timeouts and connection failures are transient and retried; anything
/// else surfaces as a plain HTTP error.
pub(crate) fn classify_transport_error(e: reqwest::Error) -> CodaError {
    if e.is_timeout() {
        CodaError::Api(ApiError::Timeout)
    } else if e.is_connect() {
        CodaError::Api(ApiError::Network(e.to_string()))
    } else {
        CodaError::Http(e)
    }
}

/// Build a provider by name from settings
///
/// Remote providers require their API key in the environment; a missing
/// key is a configuration error, not something to retry.
pub fn create_provider(name: &str, settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    match name {
        "anthropic" => {
            let key = require_api_key(&settings.providers.anthropic.api_key_env)?;
            let provider = match &settings.providers.anthropic.base_url {
                Some(url) => AnthropicProvider::with_base_url(key, url.clone()),
                None => AnthropicProvider::new(key),
            };
            Ok(Arc::new(provider))
        }
        "openai" => {
            let key = require_api_key(&settings.providers.openai.api_key_env)?;
            let provider = match &settings.providers.openai.base_url {
                Some(url) => OpenAiProvider::with_base_url(key, url.clone()),
                None => OpenAiProvider::new(key),
            };
            Ok(Arc::new(provider))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::with_base_url(
            settings.providers.ollama.base_url.clone(),
        ))),
        other => Err(CodaError::Config(format!(
            "unknown provider '{}' (expected anthropic, openai, or ollama)",
            other
        ))),
    }
}

fn require_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .map_err(|_| CodaError::Api(ApiError::MissingApiKey(env_var.to_string())))
}
