// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the gatehouse bundle publisher.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - a TOML file (`/etc/gatehouse/cron.toml` unless overridden)
//! - environment variables (`GATEHOUSE_<SECTION>_<FIELD>`)
//!
//! ```ignore
//! let config = gatehouse_server_config::load_config()?;
//! println!("publishing to s3://{}", config.storage.bucket);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::GatehouseConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatehouseConfig {
	pub database: DatabaseConfig,
	pub storage: StorageConfig,
	pub opa: OpaConfig,
	pub tests: TestsConfig,
	pub cron: CronConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from defaults, the system config file and the
/// environment.
pub fn load_config() -> Result<GatehouseConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::new()),
	])
}

/// Like [`load_config`] but reads `config_path` instead of the system file.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<GatehouseConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::new()),
	])
}

/// Merge `sources` in precedence order and finalize the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<GatehouseConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = GatehouseConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

fn finalize(layer: GatehouseConfigLayer) -> Result<GatehouseConfig, ConfigError> {
	let config = GatehouseConfig {
		database: layer.database.unwrap_or_default().finalize(),
		storage: layer.storage.unwrap_or_default().finalize()?,
		opa: layer.opa.unwrap_or_default().finalize()?,
		tests: layer.tests.unwrap_or_default().finalize()?,
		cron: layer.cron.unwrap_or_default().finalize()?,
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	info!(
		database = %config.database.url,
		bucket = %config.storage.bucket,
		backend = ?config.storage.backend,
		schedule = %config.cron.schedule,
		interval = ?config.cron.interval,
		environments = config.cron.environments.len(),
		tests_enabled = config.tests.enabled,
		"configuration loaded"
	);

	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;
	use gatehouse_server_db::Environment;
	use std::collections::HashMap;
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn env_source(pairs: &[(&str, &str)]) -> Box<dyn ConfigSource> {
		let vars: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		Box::new(EnvSource::from_map(vars))
	}

	fn toml_file(contents: &str) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn test_defaults_only() {
		let config = load_from_sources(vec![Box::new(DefaultsSource)]).unwrap();
		assert_eq!(config, GatehouseConfig::default());
	}

	/// Test: environment variables override the config file, which overrides
	/// defaults.
	///
	/// Why this test is important: operators tune a deployed publisher through
	/// env vars without editing the shipped TOML.
	#[test]
	fn test_precedence_env_over_file_over_defaults() {
		let file = toml_file(
			r#"
			[storage]
			bucket = "file-bucket"
			region = "eu-west-1"

			[cron]
			schedule = "0 * * * *"
			environments = ["staging"]
			"#,
		);

		// Deliberately out of order; sources are sorted by precedence.
		let config = load_from_sources(vec![
			env_source(&[("GATEHOUSE_STORAGE_BUCKET", "env-bucket")]),
			Box::new(TomlSource::new(file.path())),
			Box::new(DefaultsSource),
		])
		.unwrap();

		assert_eq!(config.storage.bucket, "env-bucket");
		assert_eq!(config.storage.region.as_deref(), Some("eu-west-1"));
		assert_eq!(config.cron.schedule, "0 * * * *");
		assert_eq!(config.cron.environments, vec![Environment::Staging]);
		assert_eq!(config.database.url, "sqlite:./gatehouse.db");
	}

	#[test]
	fn test_validation_error_surfaces() {
		let err = load_from_sources(vec![
			Box::new(DefaultsSource),
			env_source(&[("GATEHOUSE_TESTS_COVERAGE_THRESHOLD", "150")]),
		])
		.unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn test_load_config_with_missing_file_uses_defaults() {
		let config = load_from_sources(vec![
			Box::new(DefaultsSource),
			Box::new(TomlSource::new("/nonexistent/cron.toml")),
		])
		.unwrap();
		assert_eq!(config.opa.binary, std::path::PathBuf::from("opa"));
		assert!(config.tests.enabled);
	}
}
