// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned policy assets.
//!
//! Asset rows are immutable: an edit inserts `max(version) + 1` for the same
//! name. An asset may apply to several environments at once, so environment
//! membership is an array-contains test over the JSON `environments` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::instrument;

use crate::error::{DbError, Result};
use crate::types::{now_rfc3339, parse_timestamp, AssetType, Environment, NameVersion};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
	pub id: i64,
	pub name: String,
	pub version: i64,
	/// Base64-encoded file content.
	pub data: String,
	/// Directory inside the bundle the file is written to.
	pub uri: String,
	pub asset_type: AssetType,
	pub environments: Vec<Environment>,
	pub is_template: bool,
	pub created_at: DateTime<Utc>,
}

impl Asset {
	pub fn name_version(&self) -> NameVersion {
		NameVersion::new(&self.name, self.version)
	}

	pub fn applies_to(&self, environment: Environment) -> bool {
		self.environments.contains(&environment)
	}
}

#[derive(Debug, Clone)]
pub struct NewAsset {
	pub name: String,
	pub data: String,
	pub uri: String,
	pub asset_type: AssetType,
	pub environments: Vec<Environment>,
	pub is_template: bool,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
	/// Insert the next version of `asset.name`.
	async fn create(&self, asset: &NewAsset) -> Result<Asset>;
	async fn get(&self, name: &str, version: i64) -> Result<Option<Asset>>;
	/// Highest version per asset name visible to `environment`, sorted by name.
	async fn latest_versions(&self, environment: Environment) -> Result<Vec<NameVersion>>;
	/// Rows named in `wanted` that are also visible to `environment`, sorted by name.
	async fn get_versions(
		&self,
		environment: Environment,
		wanted: &[NameVersion],
	) -> Result<Vec<Asset>>;
}

#[derive(Clone)]
pub struct AssetRepository {
	pool: SqlitePool,
}

impl AssetRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const ASSET_COLUMNS: &str =
	"id, name, version, data, uri, asset_type, environments, is_template, created_at";

#[async_trait]
impl AssetStore for AssetRepository {
	#[instrument(skip(self, asset), fields(name = %asset.name, asset_type = %asset.asset_type))]
	async fn create(&self, asset: &NewAsset) -> Result<Asset> {
		let environments = serde_json::to_string(&asset.environments)?;
		let now = now_rfc3339();

		let mut tx = self.pool.begin().await?;

		let (next_version,): (i64,) =
			sqlx::query_as("SELECT COALESCE(MAX(version), 0) + 1 FROM assets WHERE name = ?")
				.bind(&asset.name)
				.fetch_one(&mut *tx)
				.await?;

		let id = sqlx::query(
			r#"
			INSERT INTO assets (name, version, data, uri, asset_type, environments, is_template, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&asset.name)
		.bind(next_version)
		.bind(&asset.data)
		.bind(&asset.uri)
		.bind(asset.asset_type.as_str())
		.bind(&environments)
		.bind(asset.is_template)
		.bind(&now)
		.execute(&mut *tx)
		.await
		.map_err(|e| DbError::from_insert(e, format!("asset {}@{}", asset.name, next_version)))?
		.last_insert_rowid();

		tx.commit().await?;

		Ok(Asset {
			id,
			name: asset.name.clone(),
			version: next_version,
			data: asset.data.clone(),
			uri: asset.uri.clone(),
			asset_type: asset.asset_type,
			environments: asset.environments.clone(),
			is_template: asset.is_template,
			created_at: parse_timestamp(&now, "created_at")?,
		})
	}

	#[instrument(skip(self))]
	async fn get(&self, name: &str, version: i64) -> Result<Option<Asset>> {
		let row = sqlx::query_as::<_, AssetRow>(&format!(
			"SELECT {ASSET_COLUMNS} FROM assets WHERE name = ? AND version = ?"
		))
		.bind(name)
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(Asset::try_from).transpose()
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn latest_versions(&self, environment: Environment) -> Result<Vec<NameVersion>> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			r#"
			SELECT name, MAX(version) AS version
			FROM assets
			WHERE EXISTS (
				SELECT 1 FROM json_each(assets.environments) WHERE json_each.value = ?
			)
			GROUP BY name
			ORDER BY name ASC
			"#,
		)
		.bind(environment.as_str())
		.fetch_all(&self.pool)
		.await?;

		Ok(
			rows
				.into_iter()
				.map(|(name, version)| NameVersion { name, version })
				.collect(),
		)
	}

	#[instrument(skip(self, wanted), fields(environment = %environment, wanted = wanted.len()))]
	async fn get_versions(
		&self,
		environment: Environment,
		wanted: &[NameVersion],
	) -> Result<Vec<Asset>> {
		if wanted.is_empty() {
			return Ok(Vec::new());
		}

		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
			"SELECT {ASSET_COLUMNS} FROM assets WHERE EXISTS (SELECT 1 FROM json_each(assets.environments) WHERE json_each.value = "
		));
		qb.push_bind(environment.as_str());
		qb.push(") AND (");
		let mut pairs = qb.separated(" OR ");
		for nv in wanted {
			pairs.push("(name = ");
			pairs.push_bind_unseparated(nv.name.clone());
			pairs.push_unseparated(" AND version = ");
			pairs.push_bind_unseparated(nv.version);
			pairs.push_unseparated(")");
		}
		qb.push(") ORDER BY name ASC, version ASC");

		let rows = qb
			.build_query_as::<AssetRow>()
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(Asset::try_from).collect()
	}
}

#[derive(sqlx::FromRow)]
struct AssetRow {
	id: i64,
	name: String,
	version: i64,
	data: String,
	uri: String,
	asset_type: String,
	environments: String,
	is_template: bool,
	created_at: String,
}

impl TryFrom<AssetRow> for Asset {
	type Error = DbError;

	fn try_from(row: AssetRow) -> Result<Self> {
		let environments: Vec<Environment> = serde_json::from_str(&row.environments)?;
		Ok(Asset {
			id: row.id,
			name: row.name,
			version: row.version,
			data: row.data,
			uri: row.uri,
			asset_type: row.asset_type.parse().map_err(DbError::Internal)?,
			environments,
			is_template: row.is_template,
			created_at: parse_timestamp(&row.created_at, "created_at")?,
		})
	}
}
