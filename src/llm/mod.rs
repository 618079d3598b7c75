// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Coda
//!
//! Provides abstraction over different LLM providers.

pub mod message;
pub mod provider;
pub mod providers;
pub mod retry;

pub use message::*;
pub use provider::*;
