// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Duplicate instruction suppression
//!
//! Rapid resubmission of the same instruction (double-clicked send,
//! client retries) is debounced: an identical instruction within the
//! window is rejected, after the window it is accepted again.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Debounces repeated instructions per session
#[derive(Debug)]
pub struct InstructionDebouncer {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl InstructionDebouncer {
    /// Create a debouncer with the given trailing window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Fingerprint for a submission: whitespace-normalized instruction
    /// scoped to the session
    fn fingerprint(session_id: Uuid, instruction: &str) -> String {
        let normalized = instruction.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{}:{}", session_id, normalized)
    }

    /// Record a submission and say whether it should run
    pub fn accept(&mut self, session_id: Uuid, instruction: &str) -> bool {
        self.accept_at(session_id, instruction, Instant::now())
    }

    fn accept_at(&mut self, session_id: Uuid, instruction: &str, now: Instant) -> bool {
        let key = Self::fingerprint(session_id, instruction);
        match self.last_seen.get(&key) {
            Some(&seen) if now.duration_since(seen) < self.window => {
                // Trailing window: the rejected attempt still refreshes it
                self.last_seen.insert(key, now);
                false
            }
            _ => {
                self.last_seen.insert(key, now);
                true
            }
        }
    }

    /// Drop fingerprints older than the window to bound memory
    pub fn prune(&mut self) {
        let window = self.window;
        let now = Instant::now();
        self.last_seen
            .retain(|_, &mut seen| now.duration_since(seen) < window);
    }
}
