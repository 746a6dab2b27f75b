// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared registry vocabulary: deployment environments, asset kinds and
//! `(name, version)` references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment target that scopes which policy content applies where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
	NonProduction,
	Staging,
	Production,
}

impl Environment {
	pub const ALL: [Environment; 3] = [
		Environment::NonProduction,
		Environment::Staging,
		Environment::Production,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Environment::NonProduction => "non-production",
			Environment::Staging => "staging",
			Environment::Production => "production",
		}
	}
}

impl fmt::Display for Environment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Environment {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"non-production" | "non_production" | "nonprod" => Ok(Environment::NonProduction),
			"staging" => Ok(Environment::Staging),
			"production" | "prod" => Ok(Environment::Production),
			_ => Err(format!("unknown environment: {s}")),
		}
	}
}

/// Role an asset plays inside a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
	Policy,
	Data,
	Test,
	TestData,
}

impl AssetType {
	pub fn as_str(&self) -> &'static str {
		match self {
			AssetType::Policy => "POLICY",
			AssetType::Data => "DATA",
			AssetType::Test => "TEST",
			AssetType::TestData => "TEST_DATA",
		}
	}
}

impl fmt::Display for AssetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for AssetType {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"POLICY" => Ok(AssetType::Policy),
			"DATA" => Ok(AssetType::Data),
			"TEST" => Ok(AssetType::Test),
			"TEST_DATA" => Ok(AssetType::TestData),
			_ => Err(format!("unknown asset type: {s}")),
		}
	}
}

/// A `(name, version)` reference to one row of a versioned entity.
///
/// Ordering is by name, then version, which is the canonical order used
/// wherever version lists are compared or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameVersion {
	pub name: String,
	pub version: i64,
}

impl NameVersion {
	pub fn new(name: impl Into<String>, version: i64) -> Self {
		Self {
			name: name.into(),
			version,
		}
	}
}

impl fmt::Display for NameVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}", self.name, self.version)
	}
}

pub(crate) fn now_rfc3339() -> String {
	chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(
	value: &str,
	field: &str,
) -> crate::error::Result<chrono::DateTime<chrono::Utc>> {
	chrono::DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&chrono::Utc))
		.map_err(|_| crate::error::DbError::Internal(format!("Invalid {field}: {value}")))
}
