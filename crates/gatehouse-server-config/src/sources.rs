// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file and environment
//! variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use gatehouse_server_db::Environment;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::GatehouseConfigLayer;
use crate::sections::{
	CronConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, OpaConfigLayer, StorageConfigLayer,
	TestsConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<GatehouseConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<GatehouseConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(GatehouseConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is skipped.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/gatehouse/cron.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<GatehouseConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(GatehouseConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: GatehouseConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: GATEHOUSE_<SECTION>_<FIELD>
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self {
			lookup: Box::new(|name| std::env::var(name).ok()),
		}
	}

	/// Reads from a fixed map instead of the process environment.
	pub fn from_map(vars: HashMap<String, String>) -> Self {
		Self {
			lookup: Box::new(move |name| vars.get(name).cloned()),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self
			.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parsed<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
	where
		T: FromStr,
		T::Err: std::fmt::Display,
	{
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
				key: name.to_string(),
				message: e.to_string(),
			}),
			None => Ok(None),
		}
	}

	fn environments(&self, name: &str) -> Result<Option<Vec<Environment>>, ConfigError> {
		let Some(raw) = self.var(name) else {
			return Ok(None);
		};
		raw
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| {
				s.parse::<Environment>()
					.map_err(|message| ConfigError::InvalidValue {
						key: name.to_string(),
						message,
					})
			})
			.collect::<Result<Vec<_>, _>>()
			.map(Some)
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<GatehouseConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(GatehouseConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: self.var("GATEHOUSE_DATABASE_URL"),
			}),
			storage: Some(StorageConfigLayer {
				backend: self.parsed("GATEHOUSE_STORAGE_BACKEND")?,
				bucket: self.var("GATEHOUSE_STORAGE_BUCKET"),
				region: self.var("GATEHOUSE_STORAGE_REGION"),
				endpoint_url: self.var("GATEHOUSE_STORAGE_ENDPOINT_URL"),
				key_template: self.var("GATEHOUSE_STORAGE_KEY_TEMPLATE"),
			}),
			opa: Some(OpaConfigLayer {
				binary: self.var("GATEHOUSE_OPA_BINARY").map(PathBuf::from),
				command_timeout_secs: self.parsed("GATEHOUSE_OPA_COMMAND_TIMEOUT_SECS")?,
			}),
			tests: Some(TestsConfigLayer {
				enabled: self.bool("GATEHOUSE_TESTS_ENABLED"),
				coverage_threshold: self.parsed("GATEHOUSE_TESTS_COVERAGE_THRESHOLD")?,
			}),
			cron: Some(CronConfigLayer {
				schedule: self.var("GATEHOUSE_CRON_SCHEDULE"),
				interval_secs: self.parsed("GATEHOUSE_CRON_INTERVAL_SECS")?,
				environments: self.environments("GATEHOUSE_CRON_ENVIRONMENTS")?,
				work_root: self.var("GATEHOUSE_CRON_WORK_ROOT").map(PathBuf::from),
			}),
			logging: Some(LoggingConfigLayer {
				level: self.var("GATEHOUSE_LOGGING_LEVEL"),
				format: self.parsed("GATEHOUSE_LOGGING_FORMAT")?,
			}),
		})
	}
}
