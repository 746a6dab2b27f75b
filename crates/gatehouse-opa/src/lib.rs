// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Adapter for the Open Policy Agent command line.
//!
//! [`PolicyEngine`] is the seam the bundler depends on; [`CommandPolicyEngine`]
//! shells out to `opa`, and [`testing::ScriptedPolicyEngine`] stands in for it
//! in tests.

mod command;
mod engine;
mod error;
pub mod testing;

pub use command::{CommandPolicyEngine, DEFAULT_BINARY, DEFAULT_TIMEOUT};
pub use engine::{EngineOutcome, PolicyEngine};
pub use error::{OpaError, Result};
