// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use gatehouse_server_db::{BundleRecord, Environment, NameVersion};
use serde::{Deserialize, Serialize};

/// The latest version of every asset, connection and key for one environment.
///
/// Transient: a persisted [`BundleRecord`] carries the same fields, and the
/// two are only ever compared field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSet {
	pub environment: Environment,
	pub assets: Vec<NameVersion>,
	pub connections: Vec<NameVersion>,
	pub key_version: Option<i64>,
}

impl VersionSet {
	/// Whether `record` was built from exactly these versions.
	///
	/// Both sides are compared in `(name, version)` order. A record without a
	/// key version never matches, which forces legacy rows to be rebuilt.
	pub fn matches(&self, record: &BundleRecord) -> bool {
		let Some(recorded_key) = record.key_version else {
			return false;
		};

		record.environment == self.environment
			&& Some(recorded_key) == self.key_version
			&& sorted(&record.assets) == sorted(&self.assets)
			&& sorted(&record.connections) == sorted(&self.connections)
	}
}

fn sorted(items: &[NameVersion]) -> Vec<&NameVersion> {
	let mut refs: Vec<_> = items.iter().collect();
	refs.sort();
	refs
}
