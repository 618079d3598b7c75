// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent loop
//!
//! The controller drives streaming model turns and tool dispatch;
//! supporting modules handle dedup, usage accounting, context bounding,
//! and the output frame protocol.

pub mod context;
pub mod controller;
pub mod dedup;
pub mod events;
pub mod usage;

pub use context::ContextManager;
pub use controller::{AgentController, RunOutcome};
pub use dedup::InstructionDebouncer;
pub use events::{event_channel, AgentEvent, AgentEventReceiver, AgentEventSender};
pub use usage::UsageTracker;
