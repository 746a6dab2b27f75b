// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Object storage configuration.

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_BUCKET: &str = "opa-bundles";
pub const DEFAULT_KEY_TEMPLATE: &str = "{environment}/bundle.tar.gz";
const ENVIRONMENT_PLACEHOLDER: &str = "{environment}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	#[default]
	S3,
	/// Process-local store; everything is lost on exit.
	Memory,
}

impl std::str::FromStr for StorageBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"s3" => Ok(StorageBackend::S3),
			"memory" => Ok(StorageBackend::Memory),
			other => Err(format!("unknown storage backend '{other}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
	pub backend: StorageBackend,
	pub bucket: String,
	pub region: Option<String>,
	/// Custom endpoint for S3-compatible services such as MinIO.
	pub endpoint_url: Option<String>,
	/// Object key per environment; `{environment}` is substituted.
	pub key_template: String,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::default(),
			bucket: DEFAULT_BUCKET.to_string(),
			region: None,
			endpoint_url: None,
			key_template: DEFAULT_KEY_TEMPLATE.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StorageConfigLayer {
	#[serde(default)]
	pub backend: Option<StorageBackend>,
	#[serde(default)]
	pub bucket: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
	#[serde(default)]
	pub endpoint_url: Option<String>,
	#[serde(default)]
	pub key_template: Option<String>,
}

impl StorageConfigLayer {
	pub fn merge(&mut self, other: StorageConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.bucket.is_some() {
			self.bucket = other.bucket;
		}
		if other.region.is_some() {
			self.region = other.region;
		}
		if other.endpoint_url.is_some() {
			self.endpoint_url = other.endpoint_url;
		}
		if other.key_template.is_some() {
			self.key_template = other.key_template;
		}
	}

	pub fn finalize(self) -> Result<StorageConfig, ConfigError> {
		let config = StorageConfig {
			backend: self.backend.unwrap_or_default(),
			bucket: self.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
			region: self.region,
			endpoint_url: self.endpoint_url,
			key_template: self
				.key_template
				.unwrap_or_else(|| DEFAULT_KEY_TEMPLATE.to_string()),
		};

		if config.bucket.trim().is_empty() {
			return Err(ConfigError::Validation(
				"storage.bucket must not be empty".to_string(),
			));
		}
		// Environments share a bucket, so each needs its own key.
		if !config.key_template.contains(ENVIRONMENT_PLACEHOLDER) {
			return Err(ConfigError::Validation(format!(
				"storage.key_template must contain {ENVIRONMENT_PLACEHOLDER}, got '{}'",
				config.key_template
			)));
		}
		Ok(config)
	}
}
