// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session usage accounting
//!
//! Accumulates token usage reported by the provider across turns.
//! Missing usage on a turn leaves the totals unchanged; accounting never
//! blocks or fails a run.

use crate::llm::provider::{ModelInfo, Usage};

/// Running totals for one session
#[derive(Debug, Default, Clone)]
pub struct UsageTracker {
    totals: Usage,
    turns_recorded: u32,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one turn's usage into the totals
    pub fn record(&mut self, usage: &Usage) {
        self.totals.add(usage);
        self.turns_recorded += 1;
    }

    /// Totals so far
    pub fn totals(&self) -> &Usage {
        &self.totals
    }

    pub fn turns_recorded(&self) -> u32 {
        self.turns_recorded
    }

    /// Estimated cost in dollars for these totals under the given model
    ///
    /// Cache reads are billed at the input rate; providers discount them
    /// but the rate difference is not modeled here.
    pub fn estimated_cost(&self, model: &ModelInfo) -> f64 {
        let input = self.totals.input_tokens + self.totals.cache_read_input_tokens;
        let creation = self.totals.cache_creation_input_tokens;
        ((input + creation) as f64 / 1000.0) * model.input_cost_per_1k
            + (self.totals.output_tokens as f64 / 1000.0) * model.output_cost_per_1k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(input_rate: f64, output_rate: f64) -> ModelInfo {
        ModelInfo {
            id: "test-model".to_string(),
            display_name: "Test".to_string(),
            context_window: 100_000,
            max_output_tokens: 4_096,
            supports_tools: true,
            input_cost_per_1k: input_rate,
            output_cost_per_1k: output_rate,
        }
    }

    #[test]
    fn test_totals_accumulate_across_turns() {
        let mut tracker = UsageTracker::new();
        tracker.record(&Usage {
            input_tokens: 100,
            output_tokens: 20,
            ..Default::default()
        });
        tracker.record(&Usage {
            input_tokens: 150,
            output_tokens: 30,
            ..Default::default()
        });

        assert_eq!(tracker.totals().input_tokens, 250);
        assert_eq!(tracker.totals().output_tokens, 50);
        assert_eq!(tracker.turns_recorded(), 2);
    }

    #[test]
    fn test_estimated_cost() {
        let mut tracker = UsageTracker::new();
        tracker.record(&Usage {
            input_tokens: 1000,
            output_tokens: 2000,
            ..Default::default()
        });

        let cost = tracker.estimated_cost(&model(0.003, 0.015));
        assert!((cost - (0.003 + 0.030)).abs() < 1e-9);
    }

    #[test]
    fn test_cache_tokens_counted_as_input() {
        let mut tracker = UsageTracker::new();
        tracker.record(&Usage {
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_input_tokens: 1000,
            cache_read_input_tokens: 1000,
        });

        let cost = tracker.estimated_cost(&model(0.003, 0.015));
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tracker_is_free() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.estimated_cost(&model(0.003, 0.015)), 0.0);
    }
}
