// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration assembled from each source before finalization.

use serde::Deserialize;

use crate::sections::{
	CronConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, OpaConfigLayer, StorageConfigLayer,
	TestsConfigLayer,
};

/// One source's view of the configuration. Every section is optional so a
/// TOML file only has to mention what it overrides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GatehouseConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub storage: Option<StorageConfigLayer>,
	#[serde(default)]
	pub opa: Option<OpaConfigLayer>,
	#[serde(default)]
	pub tests: Option<TestsConfigLayer>,
	#[serde(default)]
	pub cron: Option<CronConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl GatehouseConfigLayer {
	/// Merge `other` over `self`; fields set in `other` win.
	pub fn merge(&mut self, other: GatehouseConfigLayer) {
		merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_option(&mut self.storage, other.storage, StorageConfigLayer::merge);
		merge_option(&mut self.opa, other.opa, OpaConfigLayer::merge);
		merge_option(&mut self.tests, other.tests, TestsConfigLayer::merge);
		merge_option(&mut self.cron, other.cron, CronConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(b), Some(o)) => merge(b, o),
		(None, Some(o)) => *base = Some(o),
		_ => {}
	}
}
