// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use gatehouse_server_db::{
	AssetRepository, AssetStore, ConnectionRepository, ConnectionStore, Environment, KeyRepository,
	KeyStore,
};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::error::{BundlerError, Result};
use crate::version::VersionSet;

/// Read access to the versioned registry tables.
#[derive(Clone)]
pub struct RegistryStores {
	pub assets: Arc<dyn AssetStore>,
	pub connections: Arc<dyn ConnectionStore>,
	pub keys: Arc<dyn KeyStore>,
}

impl RegistryStores {
	pub fn from_pool(pool: SqlitePool) -> Self {
		Self {
			assets: Arc::new(AssetRepository::new(pool.clone())),
			connections: Arc::new(ConnectionRepository::new(pool.clone())),
			keys: Arc::new(KeyRepository::new(pool)),
		}
	}
}

/// Computes the [`VersionSet`] an environment should currently be serving.
#[derive(Clone)]
pub struct VersionResolver {
	stores: RegistryStores,
}

impl VersionResolver {
	pub fn new(stores: RegistryStores) -> Self {
		Self { stores }
	}

	/// Latest asset and enabled-connection versions, sorted by name, plus the
	/// latest key version.
	///
	/// Fails with [`BundlerError::KeyNotFound`] when the environment has no
	/// key. Store errors pass through unchanged and are not retried.
	#[instrument(skip(self), fields(environment = %environment))]
	pub async fn resolve_latest_versions(&self, environment: Environment) -> Result<VersionSet> {
		let assets = self.stores.assets.latest_versions(environment).await?;
		let connections = self.stores.connections.latest_versions(environment).await?;
		let key_version = self
			.stores
			.keys
			.latest_version(environment)
			.await?
			.ok_or(BundlerError::KeyNotFound { environment })?;

		debug!(
			assets = assets.len(),
			connections = connections.len(),
			key_version,
			"resolved latest versions"
		);

		Ok(VersionSet {
			environment,
			assets,
			connections,
			key_version: Some(key_version),
		})
	}
}
