// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Result of an engine operation that can fail in an expected way.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineOutcome {
	Ok,
	/// The tool ran and reported failure. `payload` is its structured JSON
	/// output when it printed any, otherwise its stderr as a JSON string.
	Failed { payload: serde_json::Value },
}

impl EngineOutcome {
	pub fn is_ok(&self) -> bool {
		matches!(self, EngineOutcome::Ok)
	}
}

/// Trait abstracting the policy engine binary for testability.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
	/// Whether the engine binary can be executed at all.
	async fn binary_exists(&self) -> bool;

	/// The engine's reported version, e.g. `0.70.0`.
	async fn version(&self) -> Result<String>;

	/// Static check of every policy under `dir`.
	async fn check(&self, dir: &Path) -> Result<EngineOutcome>;

	/// Run the policy test suite under `dir`.
	async fn test(&self, dir: &Path) -> Result<EngineOutcome>;

	/// Run the test suite with coverage and return the percentage (0-100).
	///
	/// Only meaningful after [`PolicyEngine::test`] succeeded, so a failing
	/// run is an error rather than an outcome.
	async fn test_coverage(&self, dir: &Path) -> Result<f64>;

	/// Package `source_dir` into a bundle tarball at `output`.
	async fn build(&self, source_dir: &Path, output: &Path) -> Result<EngineOutcome>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_outcome_serializes_with_status_tag() {
		let failed = EngineOutcome::Failed {
			payload: serde_json::json!({ "errors": [] }),
		};
		let json = serde_json::to_value(&failed).unwrap();
		assert_eq!(json["status"], "failed");
		assert_eq!(json["payload"]["errors"], serde_json::json!([]));

		assert_eq!(
			serde_json::to_value(EngineOutcome::Ok).unwrap(),
			serde_json::json!({ "status": "ok" })
		);
	}

	#[test]
	fn test_is_ok() {
		assert!(EngineOutcome::Ok.is_ok());
		assert!(!EngineOutcome::Failed {
			payload: serde_json::Value::Null
		}
		.is_ok());
	}
}
