// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only log of published bundles.
//!
//! One row is written per successful publish. Rows are never updated or
//! deleted; the latest row for an environment is the one with the highest id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::{DbError, Result};
use crate::types::{now_rfc3339, parse_timestamp, Environment, NameVersion};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
	pub id: i64,
	pub environment: Environment,
	/// Object-store content hash of the uploaded tarball.
	pub hash: String,
	pub metadata: Option<serde_json::Value>,
	pub assets: Vec<NameVersion>,
	pub connections: Vec<NameVersion>,
	/// `None` only on legacy rows written before keys were tracked.
	pub key_version: Option<i64>,
	pub opa_version: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBundleRecord {
	pub environment: Environment,
	pub hash: String,
	pub metadata: Option<serde_json::Value>,
	pub assets: Vec<NameVersion>,
	pub connections: Vec<NameVersion>,
	pub key_version: Option<i64>,
	pub opa_version: Option<String>,
}

#[async_trait]
pub trait BundleStore: Send + Sync {
	async fn create(&self, record: &NewBundleRecord) -> Result<BundleRecord>;
	async fn latest_for_environment(&self, environment: Environment)
		-> Result<Option<BundleRecord>>;
	async fn list_for_environment(
		&self,
		environment: Environment,
		limit: u32,
	) -> Result<Vec<BundleRecord>>;
}

#[derive(Clone)]
pub struct BundleRepository {
	pool: SqlitePool,
}

impl BundleRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl BundleStore for BundleRepository {
	#[instrument(skip(self, record), fields(environment = %record.environment, hash = %record.hash))]
	async fn create(&self, record: &NewBundleRecord) -> Result<BundleRecord> {
		let assets = serde_json::to_string(&record.assets)?;
		let connections = serde_json::to_string(&record.connections)?;
		let metadata = record
			.metadata
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;
		let now = now_rfc3339();

		let id = sqlx::query(
			r#"
			INSERT INTO bundles (environment, hash, metadata, assets, connections, key_version, opa_version, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.environment.as_str())
		.bind(&record.hash)
		.bind(&metadata)
		.bind(&assets)
		.bind(&connections)
		.bind(record.key_version)
		.bind(&record.opa_version)
		.bind(&now)
		.execute(&self.pool)
		.await?
		.last_insert_rowid();

		Ok(BundleRecord {
			id,
			environment: record.environment,
			hash: record.hash.clone(),
			metadata: record.metadata.clone(),
			assets: record.assets.clone(),
			connections: record.connections.clone(),
			key_version: record.key_version,
			opa_version: record.opa_version.clone(),
			created_at: parse_timestamp(&now, "created_at")?,
		})
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn latest_for_environment(
		&self,
		environment: Environment,
	) -> Result<Option<BundleRecord>> {
		let row = sqlx::query_as::<_, BundleRow>(
			r#"
			SELECT id, environment, hash, metadata, assets, connections, key_version, opa_version, created_at
			FROM bundles
			WHERE environment = ?
			ORDER BY id DESC
			LIMIT 1
			"#,
		)
		.bind(environment.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.map(BundleRecord::try_from).transpose()
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn list_for_environment(
		&self,
		environment: Environment,
		limit: u32,
	) -> Result<Vec<BundleRecord>> {
		let rows = sqlx::query_as::<_, BundleRow>(
			r#"
			SELECT id, environment, hash, metadata, assets, connections, key_version, opa_version, created_at
			FROM bundles
			WHERE environment = ?
			ORDER BY id DESC
			LIMIT ?
			"#,
		)
		.bind(environment.as_str())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(BundleRecord::try_from).collect()
	}
}

#[derive(sqlx::FromRow)]
struct BundleRow {
	id: i64,
	environment: String,
	hash: String,
	metadata: Option<String>,
	assets: String,
	connections: String,
	key_version: Option<i64>,
	opa_version: Option<String>,
	created_at: String,
}

impl TryFrom<BundleRow> for BundleRecord {
	type Error = DbError;

	fn try_from(row: BundleRow) -> Result<Self> {
		Ok(BundleRecord {
			id: row.id,
			environment: row.environment.parse().map_err(DbError::Internal)?,
			hash: row.hash,
			metadata: row
				.metadata
				.as_deref()
				.map(serde_json::from_str)
				.transpose()?,
			assets: serde_json::from_str(&row.assets)?,
			connections: serde_json::from_str(&row.connections)?,
			key_version: row.key_version,
			opa_version: row.opa_version,
			created_at: parse_timestamp(&row.created_at, "created_at")?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_registry_test_pool;

	fn record(environment: Environment, hash: &str, key_version: Option<i64>) -> NewBundleRecord {
		NewBundleRecord {
			environment,
			hash: hash.to_string(),
			metadata: Some(serde_json::json!({ "reason": "initial" })),
			assets: vec![NameVersion::new("a.rego", 3)],
			connections: vec![NameVersion::new("avi", 1)],
			key_version,
			opa_version: Some("0.70.0".to_string()),
		}
	}

	#[tokio::test]
	async fn test_latest_for_environment_none_when_empty() {
		let repo = BundleRepository::new(create_registry_test_pool().await);
		assert!(repo
			.latest_for_environment(Environment::Staging)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_latest_for_environment_is_highest_id() {
		let repo = BundleRepository::new(create_registry_test_pool().await);
		repo.create(&record(Environment::Staging, "h1", Some(1)))
			.await
			.unwrap();
		let second = repo
			.create(&record(Environment::Staging, "h2", Some(2)))
			.await
			.unwrap();
		repo.create(&record(Environment::Production, "p1", Some(1)))
			.await
			.unwrap();

		let latest = repo
			.latest_for_environment(Environment::Staging)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(latest, second);
		assert_eq!(latest.assets, vec![NameVersion::new("a.rego", 3)]);
		assert_eq!(latest.metadata.unwrap()["reason"], "initial");
	}

	#[tokio::test]
	async fn test_null_key_version_roundtrips() {
		let repo = BundleRepository::new(create_registry_test_pool().await);
		repo.create(&record(Environment::Production, "legacy", None))
			.await
			.unwrap();

		let latest = repo
			.latest_for_environment(Environment::Production)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(latest.key_version, None);
	}

	#[tokio::test]
	async fn test_list_for_environment_newest_first_with_limit() {
		let repo = BundleRepository::new(create_registry_test_pool().await);
		for i in 0..5 {
			repo.create(&record(Environment::Staging, &format!("h{i}"), Some(1)))
				.await
				.unwrap();
		}

		let rows = repo
			.list_for_environment(Environment::Staging, 3)
			.await
			.unwrap();
		let hashes: Vec<_> = rows.iter().map(|r| r.hash.as_str()).collect();
		assert_eq!(hashes, vec!["h4", "h3", "h2"]);
	}
}
