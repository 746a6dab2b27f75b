// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

/// Failures to run the policy engine or to understand what it printed.
///
/// Expected tool failures (a policy that does not compile, a failing test)
/// are not errors; they are reported as [`crate::EngineOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum OpaError {
	#[error("policy engine binary not found: {binary}")]
	NotInstalled { binary: String },

	#[error("opa {subcommand} timed out after {timeout:?}")]
	Timeout {
		subcommand: &'static str,
		timeout: Duration,
	},

	#[error("opa {subcommand} failed: {stderr}")]
	CommandFailed {
		subcommand: &'static str,
		stderr: String,
	},

	#[error("unexpected opa {subcommand} output: {reason}")]
	InvalidOutput {
		subcommand: &'static str,
		reason: String,
	},

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OpaError>;
