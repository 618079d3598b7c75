// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Coda
//!
//! This module defines all error types used throughout the engine. Transience
//! is decided here, once, from the typed variants; callers never inspect
//! message strings to decide whether to retry.

use thiserror::Error;

/// Main error type for Coda operations
#[derive(Error, Debug)]
pub enum CodaError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Edit target not found, neither exactly nor fuzzily
    #[error("Edit conflict in {path}: {reason}")]
    EditConflict {
        path: String,
        reason: String,
        /// Truncated view of the actual file content so the caller can
        /// correct its search string.
        preview: String,
    },

    /// A multi-file transaction failed and all snapshots were restored
    #[error("Transaction rolled back after failure: {0}")]
    TransactionRollback(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Agent loop errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Duplicate instruction rejected by the debounce window
    #[error("Duplicate instruction: {0}")]
    DuplicateInstruction(String),
}

impl CodaError {
    /// Whether this error is worth retrying with backoff.
    ///
    /// Only provider-side transport failures qualify; configuration,
    /// tool, and edit failures never do.
    pub fn is_transient(&self) -> bool {
        match self {
            CodaError::Api(api_error) => api_error.is_transient(),
            _ => false,
        }
    }
}

/// API-specific error types
///
/// Carried inside stream events, so it must stay cloneable.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Missing credentials before any request was made
    #[error("Missing API key: set {0}")]
    MissingApiKey(String),

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Context window exceeded
    #[error("Context too long: {current} tokens exceeds limit of {limit}")]
    ContextTooLong { current: u32, limit: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl ApiError {
    /// Transient failures are retried by the agent loop; everything else
    /// aborts the turn immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::RateLimited(_) => true,
            ApiError::Timeout => true,
            ApiError::StreamError(_) => true,
            // Retry on 5xx only
            ApiError::ServerError { status, .. } => *status >= 500 && *status < 600,

            ApiError::AuthenticationFailed => false,
            ApiError::MissingApiKey(_) => false,
            ApiError::ModelNotFound(_) => false,
            ApiError::ContextTooLong { .. } => false,
            ApiError::InvalidResponse(_) => false,
        }
    }
}

/// Result type alias for Coda operations
pub type Result<T> = std::result::Result<T, CodaError>;

impl From<toml::de::Error> for CodaError {
    fn from(err: toml::de::Error) -> Self {
        CodaError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for CodaError {
    fn from(err: toml::ser::Error) -> Self {
        CodaError::Toml(err.to_string())
    }
}
