// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use gatehouse_opa::{EngineOutcome, PolicyEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::content::BundleContent;
use crate::error::{BundlerError, Result};
use crate::layout::{layout, LayoutReport};

/// Policy test settings applied before packaging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
	/// Run the bundle's policy tests and refuse to package on failure.
	pub enabled: bool,
	/// Minimum coverage percentage (0-100). Only checked when `enabled`.
	pub coverage_threshold: Option<f64>,
}

impl TestOptions {
	pub fn validate(&self) -> Result<()> {
		match self.coverage_threshold {
			Some(t) if !(0.0..=100.0).contains(&t) => Err(BundlerError::InvalidTestOptions(format!(
				"coverage threshold must be between 0 and 100, got {t}"
			))),
			_ => Ok(()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
	pub layout: LayoutReport,
	/// Measured coverage, when a threshold was checked.
	pub coverage: Option<f64>,
}

/// Lay `content` out in `work_dir`, optionally test it, and package it into
/// `output`.
///
/// Stages run strictly in order and the first failure aborts:
/// workdir and binary checks, layout, tests, coverage, build. `output` must
/// not be used unless this returns `Ok`.
#[instrument(skip(engine, content, tests), fields(environment = %content.environment, work_dir = %work_dir.display()))]
pub async fn create_bundle(
	engine: &dyn PolicyEngine,
	content: &BundleContent,
	work_dir: &Path,
	output: &Path,
	tests: &TestOptions,
) -> Result<BuildReport> {
	if !tokio::fs::metadata(work_dir)
		.await
		.map(|m| m.is_dir())
		.unwrap_or(false)
	{
		return Err(BundlerError::WorkdirNotFound(work_dir.to_path_buf()));
	}
	if !engine.binary_exists().await {
		return Err(BundlerError::OpaNotFound);
	}
	tests.validate()?;

	let layout_report = layout(content, work_dir).await?;
	debug!(files = layout_report.files.len(), "bundle laid out");

	let mut coverage = None;
	if tests.enabled {
		if let EngineOutcome::Failed { payload } = engine.test(work_dir).await? {
			warn!("policy tests failed");
			return Err(BundlerError::OpaTestsFailed { payload });
		}

		if let Some(threshold) = tests.coverage_threshold {
			let measured = engine
				.test_coverage(work_dir)
				.await
				.map_err(BundlerError::OpaCoverageFailed)?;
			if measured < threshold {
				warn!(coverage = measured, threshold, "coverage below threshold");
				return Err(BundlerError::OpaCoverageTooLow {
					coverage: measured,
					threshold,
				});
			}
			coverage = Some(measured);
		}
	} else if tests.coverage_threshold.is_some() {
		debug!("coverage threshold ignored because tests are disabled");
	}

	if let EngineOutcome::Failed { payload } = engine.build(work_dir, output).await? {
		if let Err(e) = tokio::fs::remove_file(output).await {
			if e.kind() != std::io::ErrorKind::NotFound {
				warn!(error = %e, output = %output.display(), "failed to remove partial bundle");
			}
		}
		let stderr = match payload {
			serde_json::Value::String(s) => s,
			other => other.to_string(),
		};
		return Err(BundlerError::OpaBundleCreationError { stderr });
	}

	info!(output = %output.display(), ?coverage, "bundle created");
	Ok(BuildReport {
		layout: layout_report,
		coverage,
	})
}
