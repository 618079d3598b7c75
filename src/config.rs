// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Coda
//!
//! Handles loading settings from ~/.config/coda/config.toml. API keys are
//! never stored in the file; each provider section names the environment
//! variable to read the key from.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CodaError, Result};

/// Main settings structure, stored in ~/.config/coda/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// LLM provider settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Agent loop behavior
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retry/backoff behavior for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Conversation context bounds
    #[serde(default)]
    pub context: ContextConfig,
}

/// Configuration for LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Anthropic configuration
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// OpenAI configuration
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Ollama local model configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Environment variable holding the API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,

    /// Default model
    #[serde(default = "default_anthropic_model")]
    pub model: String,

    /// Custom API base URL (for proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_anthropic_api_key_env(),
            model: default_anthropic_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    /// Default model
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Custom API base URL (for proxies and compatible gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_api_key_env(),
            model: default_openai_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the local Ollama server
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

/// Agent loop behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum provider round-trips per instruction
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Trailing window for instruction deduplication, in seconds
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Upper bound on a single tool execution, in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Maximum tokens requested per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            dedup_window_secs: default_dedup_window_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Retry/backoff behavior for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter percentage (0.0 to 1.0) for randomizing delays
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Conversation context bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Baseline trailing message count before adaptive adjustment
    #[serde(default = "default_base_window")]
    pub base_window: usize,

    /// Floor for the adaptive window
    #[serde(default = "default_min_window")]
    pub min_window: usize,

    /// Ceiling for the adaptive window
    #[serde(default = "default_max_window")]
    pub max_window: usize,

    /// Mark the stable system prompt prefix as cacheable when supported
    #[serde(default = "default_true")]
    pub prompt_caching: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            base_window: default_base_window(),
            min_window: default_min_window(),
            max_window: default_max_window(),
            prompt_caching: true,
        }
    }
}

fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

fn default_max_turns() -> u32 {
    8
}

fn default_dedup_window_secs() -> u64 {
    3
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_base_window() -> usize {
    20
}

fn default_min_window() -> usize {
    8
}

fn default_max_window() -> usize {
    40
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Path to the config file: ~/.config/coda/config.toml
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| CodaError::Config("could not determine config directory".to_string()))?;
        Ok(base.join("coda").join("config.toml"))
    }

    /// Load settings from the default path, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load settings from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Resolve the API key for a provider from its configured env var.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        let env_var = match provider {
            "anthropic" => &self.providers.anthropic.api_key_env,
            "openai" => &self.providers.openai.api_key_env,
            _ => return None,
        };
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }

    /// Default model for a provider name.
    pub fn model_for(&self, provider: &str) -> Option<&str> {
        match provider {
            "anthropic" => Some(self.providers.anthropic.model.as_str()),
            "openai" => Some(self.providers.openai.model.as_str()),
            "ollama" => Some(self.providers.ollama.model.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.agent.max_turns, 8);
        assert_eq!(settings.agent.dedup_window_secs, 3);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.context.base_window, 20);
        assert!(settings.context.prompt_caching);
    }

    #[test]
    fn test_max_turns_within_expected_band() {
        let settings = Settings::default();
        assert!(settings.agent.max_turns >= 5 && settings.agent.max_turns <= 10);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(settings.agent.max_turns, 8);
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_turns = 5

[providers.anthropic]
model = "claude-opus-4"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.agent.max_turns, 5);
        assert_eq!(settings.providers.anthropic.model, "claude-opus-4");
        // Untouched sections keep their defaults
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(
            settings.providers.anthropic.api_key_env,
            "ANTHROPIC_API_KEY"
        );
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "agent = not valid toml {").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_model_for_known_providers() {
        let settings = Settings::default();
        assert_eq!(settings.model_for("anthropic").unwrap(), "claude-sonnet-4-20250514");
        assert_eq!(settings.model_for("openai").unwrap(), "gpt-4o");
        assert_eq!(settings.model_for("ollama").unwrap(), "qwen2.5-coder:14b");
        assert!(settings.model_for("unknown").is_none());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let settings = Settings::default();
        let serialized = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.agent.max_turns, settings.agent.max_turns);
        assert_eq!(parsed.context.max_window, settings.context.max_window);
    }
}
