// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bundle signing keys, one version sequence per environment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::{DbError, Result};
use crate::types::{now_rfc3339, parse_timestamp, Environment};

/// A JWK key pair. Both members hold serialized JWK JSON.
#[derive(Clone, PartialEq)]
pub struct Key {
	pub id: i64,
	pub environment: Environment,
	pub version: i64,
	pub private_key: String,
	pub public_key: String,
	pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Key {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Key")
			.field("id", &self.id)
			.field("environment", &self.environment)
			.field("version", &self.version)
			.field("private_key", &"[REDACTED]")
			.field("public_key", &self.public_key)
			.field("created_at", &self.created_at)
			.finish()
	}
}

#[async_trait]
pub trait KeyStore: Send + Sync {
	/// Insert the next key version for `environment`.
	async fn create(
		&self,
		environment: Environment,
		private_key: &str,
		public_key: &str,
	) -> Result<Key>;
	/// `max(version)` for `environment`, `None` when the environment has no key.
	async fn latest_version(&self, environment: Environment) -> Result<Option<i64>>;
	async fn get(&self, environment: Environment, version: i64) -> Result<Option<Key>>;
}

#[derive(Clone)]
pub struct KeyRepository {
	pool: SqlitePool,
}

impl KeyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl KeyStore for KeyRepository {
	#[instrument(skip(self, private_key, public_key), fields(environment = %environment))]
	async fn create(
		&self,
		environment: Environment,
		private_key: &str,
		public_key: &str,
	) -> Result<Key> {
		let now = now_rfc3339();
		let mut tx = self.pool.begin().await?;

		let (next_version,): (i64,) =
			sqlx::query_as("SELECT COALESCE(MAX(version), 0) + 1 FROM keys WHERE environment = ?")
				.bind(environment.as_str())
				.fetch_one(&mut *tx)
				.await?;

		let id = sqlx::query(
			r#"
			INSERT INTO keys (environment, version, private_key, public_key, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(environment.as_str())
		.bind(next_version)
		.bind(private_key)
		.bind(public_key)
		.bind(&now)
		.execute(&mut *tx)
		.await
		.map_err(|e| DbError::from_insert(e, format!("key {environment}@{next_version}")))?
		.last_insert_rowid();

		tx.commit().await?;

		Ok(Key {
			id,
			environment,
			version: next_version,
			private_key: private_key.to_string(),
			public_key: public_key.to_string(),
			created_at: parse_timestamp(&now, "created_at")?,
		})
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn latest_version(&self, environment: Environment) -> Result<Option<i64>> {
		let (version,): (Option<i64>,) =
			sqlx::query_as("SELECT MAX(version) FROM keys WHERE environment = ?")
				.bind(environment.as_str())
				.fetch_one(&self.pool)
				.await?;
		Ok(version)
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn get(&self, environment: Environment, version: i64) -> Result<Option<Key>> {
		let row = sqlx::query_as::<_, (i64, String, i64, String, String, String)>(
			r#"
			SELECT id, environment, version, private_key, public_key, created_at
			FROM keys
			WHERE environment = ? AND version = ?
			"#,
		)
		.bind(environment.as_str())
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row
			.map(
				|(id, environment, version, private_key, public_key, created_at)| {
					Ok(Key {
						id,
						environment: environment.parse().map_err(DbError::Internal)?,
						version,
						private_key,
						public_key,
						created_at: parse_timestamp(&created_at, "created_at")?,
					})
				},
			)
			.transpose()
	}
}
