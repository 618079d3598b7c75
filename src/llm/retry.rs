// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for provider calls with exponential backoff
//!
//! Transience is decided by the typed error classification
//! ([`CodaError::is_transient`]); this module only schedules the attempts.

use crate::config::RetryConfig;
use crate::error::{ApiError, CodaError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Calculate the delay before the given retry attempt.
///
/// Exponential backoff (base * 2^attempt, capped) with symmetric jitter.
/// A rate-limit error carrying a Retry-After hint overrides the schedule.
pub fn calculate_delay(config: &RetryConfig, attempt: u32, error: &CodaError) -> Duration {
    if let CodaError::Api(ApiError::RateLimited(retry_after_secs)) = error {
        if *retry_after_secs > 0 {
            return Duration::from_secs(*retry_after_secs as u64);
        }
    }

    let exponential_ms = config.base_delay_ms.saturating_mul(2u64.pow(attempt));
    let capped_ms = exponential_ms.min(config.max_delay_ms);

    let jitter_range = (capped_ms as f64 * config.jitter) as i64;
    let jitter_ms = if jitter_range > 0 {
        rand::rng().random_range(-jitter_range..=jitter_range)
    } else {
        0
    };

    let final_ms = (capped_ms as i64 + jitter_ms).max(0) as u64;
    Duration::from_millis(final_ms)
}

/// Retry an async operation with exponential backoff.
///
/// `on_retry` fires before each sleep with the attempt number (1-based),
/// the error that triggered it, and the chosen delay; the agent loop uses
/// it to surface "retrying" notices. Fatal errors and retry exhaustion
/// return the last error unchanged.
pub async fn with_retry<F, Fut, T, N>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
    mut on_retry: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(u32, &CodaError, Duration),
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    debug!(operation = operation_name, %error, "fatal error, not retrying");
                    return Err(error);
                }

                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        retries = config.max_retries,
                        "retries exhausted"
                    );
                    return Err(error);
                }

                let delay = calculate_delay(config, attempt, &error);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                on_retry(attempt + 1, &error, delay);

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
