// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Publish schedule configuration.

use std::path::PathBuf;
use std::time::Duration;

use gatehouse_server_db::Environment;
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_SCHEDULE: &str = "*/5 * * * *";

#[derive(Debug, Clone, PartialEq)]
pub struct CronConfig {
	/// Cron expression driving the publish job. Five-field expressions are
	/// accepted.
	pub schedule: String,
	/// Fixed interval between runs. When set it replaces `schedule`.
	pub interval: Option<Duration>,
	pub environments: Vec<Environment>,
	/// Parent directory for per-cycle scratch directories. `None` means the
	/// system temp dir.
	pub work_root: Option<PathBuf>,
}

impl Default for CronConfig {
	fn default() -> Self {
		Self {
			schedule: DEFAULT_SCHEDULE.to_string(),
			interval: None,
			environments: Environment::ALL.to_vec(),
			work_root: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CronConfigLayer {
	#[serde(default)]
	pub schedule: Option<String>,
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub environments: Option<Vec<Environment>>,
	#[serde(default)]
	pub work_root: Option<PathBuf>,
}

impl CronConfigLayer {
	pub fn merge(&mut self, other: CronConfigLayer) {
		if other.schedule.is_some() {
			self.schedule = other.schedule;
		}
		if other.interval_secs.is_some() {
			self.interval_secs = other.interval_secs;
		}
		if other.environments.is_some() {
			self.environments = other.environments;
		}
		if other.work_root.is_some() {
			self.work_root = other.work_root;
		}
	}

	pub fn finalize(self) -> Result<CronConfig, ConfigError> {
		let schedule = self
			.schedule
			.unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
		if schedule.trim().is_empty() {
			return Err(ConfigError::Validation(
				"cron.schedule must not be empty".to_string(),
			));
		}

		if self.interval_secs == Some(0) {
			return Err(ConfigError::Validation(
				"cron.interval_secs must be greater than 0".to_string(),
			));
		}

		let mut environments = self
			.environments
			.unwrap_or_else(|| Environment::ALL.to_vec());
		environments.sort();
		environments.dedup();
		if environments.is_empty() {
			return Err(ConfigError::Validation(
				"cron.environments must name at least one environment".to_string(),
			));
		}

		Ok(CronConfig {
			schedule,
			interval: self.interval_secs.map(Duration::from_secs),
			environments,
			work_root: self.work_root,
		})
	}
}
