// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use gatehouse_server_db::{Asset, AssetType, Connection, Environment, Key};
use tracing::{instrument, warn};

use crate::error::{BundlerError, Result};
use crate::resolver::RegistryStores;
use crate::version::VersionSet;

/// The rows named by one [`VersionSet`], ready to be laid out on disk.
#[derive(Debug, Clone)]
pub struct BundleContent {
	pub environment: Environment,
	pub assets: Vec<Asset>,
	pub connections: Vec<Connection>,
	pub key: Option<Key>,
}

impl BundleContent {
	pub fn count(&self, asset_type: AssetType) -> usize {
		self.assets
			.iter()
			.filter(|a| a.asset_type == asset_type)
			.count()
	}

	/// The versions actually present, which can be fewer than were requested
	/// when a row disappeared between resolving and fetching.
	pub fn versions(&self) -> VersionSet {
		let mut assets: Vec<_> = self.assets.iter().map(Asset::name_version).collect();
		let mut connections: Vec<_> = self
			.connections
			.iter()
			.map(Connection::name_version)
			.collect();
		assets.sort();
		connections.sort();
		VersionSet {
			environment: self.environment,
			assets,
			connections,
			key_version: self.key.as_ref().map(|k| k.version),
		}
	}
}

/// Fetch exactly the rows named in `versions`.
///
/// A missing key version is valid and yields `key: None`; a key version that
/// names no row is [`BundlerError::KeyNotFound`].
#[instrument(skip(stores, versions), fields(environment = %versions.environment))]
pub async fn materialize(stores: &RegistryStores, versions: &VersionSet) -> Result<BundleContent> {
	let environment = versions.environment;

	let assets = stores
		.assets
		.get_versions(environment, &versions.assets)
		.await?;
	let connections = stores
		.connections
		.get_versions(environment, &versions.connections)
		.await?;

	if assets.len() != versions.assets.len() {
		warn!(
			requested = versions.assets.len(),
			found = assets.len(),
			"some asset versions were not found"
		);
	}
	if connections.len() != versions.connections.len() {
		warn!(
			requested = versions.connections.len(),
			found = connections.len(),
			"some connection versions were not found"
		);
	}

	let key = match versions.key_version {
		Some(version) => Some(
			stores
				.keys
				.get(environment, version)
				.await?
				.ok_or(BundlerError::KeyNotFound { environment })?,
		),
		None => None,
	};

	Ok(BundleContent {
		environment,
		assets,
		connections,
		key,
	})
}
