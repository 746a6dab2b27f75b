// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helpers for tests in this and downstream crates.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::asset::NewAsset;
use crate::connection::NewConnection;
use crate::types::{AssetType, Environment};

/// "package test" in base64.
pub const SAMPLE_ASSET_DATA: &str = "cGFja2FnZSB0ZXN0";

/// Single-connection in-memory pool; every connection to `sqlite::memory:`
/// opens a fresh database, so the pool must not grow.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

pub async fn create_registry_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	crate::pool::run_migrations(&pool).await.unwrap();
	pool
}

pub fn new_asset(name: &str, asset_type: AssetType, environments: &[Environment]) -> NewAsset {
	NewAsset {
		name: name.to_string(),
		data: SAMPLE_ASSET_DATA.to_string(),
		uri: "policies".to_string(),
		asset_type,
		environments: environments.to_vec(),
		is_template: false,
	}
}

pub fn new_connection(name: &str, environment: Environment, enabled: bool) -> NewConnection {
	NewConnection {
		name: name.to_string(),
		environment,
		enabled,
		auth_token: format!("token-{name}"),
		allow_browser_access: false,
		allow_no_origin: false,
		allowed_domains: Vec::new(),
		allowed_origins: Vec::new(),
	}
}
