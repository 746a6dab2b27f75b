// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy engine binary configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_BINARY: &str = "opa";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct OpaConfig {
	/// Binary name resolved through `PATH`, or an explicit path.
	pub binary: PathBuf,
	pub command_timeout: Duration,
}

impl Default for OpaConfig {
	fn default() -> Self {
		Self {
			binary: PathBuf::from(DEFAULT_BINARY),
			command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OpaConfigLayer {
	#[serde(default)]
	pub binary: Option<PathBuf>,
	#[serde(default)]
	pub command_timeout_secs: Option<u64>,
}

impl OpaConfigLayer {
	pub fn merge(&mut self, other: OpaConfigLayer) {
		if other.binary.is_some() {
			self.binary = other.binary;
		}
		if other.command_timeout_secs.is_some() {
			self.command_timeout_secs = other.command_timeout_secs;
		}
	}

	pub fn finalize(self) -> Result<OpaConfig, ConfigError> {
		let secs = self
			.command_timeout_secs
			.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
		if secs == 0 {
			return Err(ConfigError::Validation(
				"opa.command_timeout_secs must be greater than 0".to_string(),
			));
		}
		Ok(OpaConfig {
			binary: self
				.binary
				.unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY)),
			command_timeout: Duration::from_secs(secs),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = OpaConfigLayer::default().finalize().unwrap();
		assert_eq!(config.binary, PathBuf::from("opa"));
		assert_eq!(config.command_timeout, Duration::from_secs(300));
	}

	#[test]
	fn test_zero_timeout_rejected() {
		let layer = OpaConfigLayer {
			command_timeout_secs: Some(0),
			..Default::default()
		};
		assert!(matches!(layer.finalize(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_merge() {
		let mut base = OpaConfigLayer {
			binary: Some(PathBuf::from("/usr/local/bin/opa")),
			command_timeout_secs: Some(60),
		};
		base.merge(OpaConfigLayer {
			command_timeout_secs: Some(30),
			..Default::default()
		});
		let config = base.finalize().unwrap();
		assert_eq!(config.binary, PathBuf::from("/usr/local/bin/opa"));
		assert_eq!(config.command_timeout, Duration::from_secs(30));
	}
}
