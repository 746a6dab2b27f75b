// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A scripted [`PolicyEngine`] for tests in this and downstream crates.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{EngineOutcome, PolicyEngine};
use crate::error::{OpaError, Result};

/// Bytes written to the output path by a successful scripted build.
pub const FAKE_TARBALL: &[u8] = b"fake bundle tarball";

/// Returns canned results and records which operations were invoked.
pub struct ScriptedPolicyEngine {
	pub installed: bool,
	pub version: String,
	pub check: EngineOutcome,
	pub test: EngineOutcome,
	/// `None` makes `test_coverage` fail.
	pub coverage: Option<f64>,
	pub build: EngineOutcome,
	/// Operations invoked so far, in order.
	pub calls: Mutex<Vec<&'static str>>,
}

impl Default for ScriptedPolicyEngine {
	fn default() -> Self {
		Self {
			installed: true,
			version: "0.70.0".to_string(),
			check: EngineOutcome::Ok,
			test: EngineOutcome::Ok,
			coverage: Some(100.0),
			build: EngineOutcome::Ok,
			calls: Mutex::new(Vec::new()),
		}
	}
}

impl ScriptedPolicyEngine {
	pub fn calls(&self) -> Vec<&'static str> {
		self.calls.lock().unwrap().clone()
	}

	fn record(&self, op: &'static str) {
		self.calls.lock().unwrap().push(op);
	}
}

#[async_trait]
impl PolicyEngine for ScriptedPolicyEngine {
	async fn binary_exists(&self) -> bool {
		self.record("binary_exists");
		self.installed
	}

	async fn version(&self) -> Result<String> {
		self.record("version");
		Ok(self.version.clone())
	}

	async fn check(&self, _dir: &Path) -> Result<EngineOutcome> {
		self.record("check");
		Ok(self.check.clone())
	}

	async fn test(&self, _dir: &Path) -> Result<EngineOutcome> {
		self.record("test");
		Ok(self.test.clone())
	}

	async fn test_coverage(&self, _dir: &Path) -> Result<f64> {
		self.record("test_coverage");
		self.coverage.ok_or_else(|| OpaError::CommandFailed {
			subcommand: "test",
			stderr: "scripted coverage failure".to_string(),
		})
	}

	async fn build(&self, _source_dir: &Path, output: &Path) -> Result<EngineOutcome> {
		self.record("build");
		if self.build.is_ok() {
			tokio::fs::write(output, FAKE_TARBALL).await?;
		}
		Ok(self.build.clone())
	}
}
