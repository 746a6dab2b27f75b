// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned client connections.
//!
//! Unlike assets, a connection row belongs to exactly one environment, and
//! only enabled rows take part in the "latest version" computation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::instrument;

use crate::error::{DbError, Result};
use crate::types::{now_rfc3339, parse_timestamp, Environment, NameVersion};

/// A connection as exposed to bundle templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
	pub id: i64,
	pub name: String,
	pub version: i64,
	pub environment: Environment,
	pub enabled: bool,
	pub auth_token: String,
	pub allow_browser_access: bool,
	pub allow_no_origin: bool,
	pub allowed_domains: Vec<String>,
	pub allowed_origins: Vec<String>,
	pub created_at: DateTime<Utc>,
}

impl Connection {
	pub fn name_version(&self) -> NameVersion {
		NameVersion::new(&self.name, self.version)
	}
}

#[derive(Debug, Clone)]
pub struct NewConnection {
	pub name: String,
	pub environment: Environment,
	pub enabled: bool,
	pub auth_token: String,
	pub allow_browser_access: bool,
	pub allow_no_origin: bool,
	pub allowed_domains: Vec<String>,
	pub allowed_origins: Vec<String>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
	/// Insert the next version of `connection.name` within its environment.
	async fn create(&self, connection: &NewConnection) -> Result<Connection>;
	/// Highest enabled version per connection name in `environment`, sorted by name.
	async fn latest_versions(&self, environment: Environment) -> Result<Vec<NameVersion>>;
	/// Rows named in `wanted` that belong to `environment`, sorted by name.
	async fn get_versions(
		&self,
		environment: Environment,
		wanted: &[NameVersion],
	) -> Result<Vec<Connection>>;
}

#[derive(Clone)]
pub struct ConnectionRepository {
	pool: SqlitePool,
}

impl ConnectionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const CONNECTION_COLUMNS: &str = "id, name, version, environment, enabled, auth_token, allow_browser_access, allow_no_origin, allowed_domains, allowed_origins, created_at";

#[async_trait]
impl ConnectionStore for ConnectionRepository {
	#[instrument(skip(self, connection), fields(name = %connection.name, environment = %connection.environment))]
	async fn create(&self, connection: &NewConnection) -> Result<Connection> {
		let allowed_domains = serde_json::to_string(&connection.allowed_domains)?;
		let allowed_origins = serde_json::to_string(&connection.allowed_origins)?;
		let now = now_rfc3339();

		let mut tx = self.pool.begin().await?;

		let (next_version,): (i64,) = sqlx::query_as(
			"SELECT COALESCE(MAX(version), 0) + 1 FROM connections WHERE name = ? AND environment = ?",
		)
		.bind(&connection.name)
		.bind(connection.environment.as_str())
		.fetch_one(&mut *tx)
		.await?;

		let id = sqlx::query(
			r#"
			INSERT INTO connections (
				name, version, environment, enabled, auth_token,
				allow_browser_access, allow_no_origin, allowed_domains, allowed_origins, created_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&connection.name)
		.bind(next_version)
		.bind(connection.environment.as_str())
		.bind(connection.enabled)
		.bind(&connection.auth_token)
		.bind(connection.allow_browser_access)
		.bind(connection.allow_no_origin)
		.bind(&allowed_domains)
		.bind(&allowed_origins)
		.bind(&now)
		.execute(&mut *tx)
		.await
		.map_err(|e| {
			DbError::from_insert(
				e,
				format!(
					"connection {}@{} ({})",
					connection.name, next_version, connection.environment
				),
			)
		})?
		.last_insert_rowid();

		tx.commit().await?;

		Ok(Connection {
			id,
			name: connection.name.clone(),
			version: next_version,
			environment: connection.environment,
			enabled: connection.enabled,
			auth_token: connection.auth_token.clone(),
			allow_browser_access: connection.allow_browser_access,
			allow_no_origin: connection.allow_no_origin,
			allowed_domains: connection.allowed_domains.clone(),
			allowed_origins: connection.allowed_origins.clone(),
			created_at: parse_timestamp(&now, "created_at")?,
		})
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn latest_versions(&self, environment: Environment) -> Result<Vec<NameVersion>> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			r#"
			SELECT name, MAX(version) AS version
			FROM connections
			WHERE environment = ? AND enabled = 1
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
	) -> Result<Vec<Connection>> {
		if wanted.is_empty() {
			return Ok(Vec::new());
		}

		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
			"SELECT {CONNECTION_COLUMNS} FROM connections WHERE environment = "
		));
		qb.push_bind(environment.as_str());
		qb.push(" AND (");
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
			.build_query_as::<ConnectionRow>()
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(Connection::try_from).collect()
	}
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
	id: i64,
	name: String,
	version: i64,
	environment: String,
	enabled: bool,
	auth_token: String,
	allow_browser_access: bool,
	allow_no_origin: bool,
	allowed_domains: String,
	allowed_origins: String,
	created_at: String,
}

impl TryFrom<ConnectionRow> for Connection {
	type Error = DbError;

	fn try_from(row: ConnectionRow) -> Result<Self> {
		Ok(Connection {
			id: row.id,
			name: row.name,
			version: row.version,
			environment: row.environment.parse().map_err(DbError::Internal)?,
			enabled: row.enabled,
			auth_token: row.auth_token,
			allow_browser_access: row.allow_browser_access,
			allow_no_origin: row.allow_no_origin,
			allowed_domains: serde_json::from_str(&row.allowed_domains)?,
			allowed_origins: serde_json::from_str(&row.allowed_origins)?,
			created_at: parse_timestamp(&row.created_at, "created_at")?,
		})
	}
}
