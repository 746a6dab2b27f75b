// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drift detection and publishing.
//!
//! A publish cycle compares the newest bundle row for an environment with
//! the versions the registry currently resolves to, and with the hash of the
//! object in storage. Nothing is written when both agree. Every cycle
//! recomputes from scratch, so a failed cycle is retried simply by running
//! the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use gatehouse_bundler::{
	create_bundle, layout, materialize, BuildReport, BundleContent, BundlerError, RegistryStores,
	TestOptions, VersionResolver, VersionSet,
};
use gatehouse_opa::{EngineOutcome, PolicyEngine};
use gatehouse_server_db::{AssetType, BundleStore, Environment, NewBundleRecord};
use gatehouse_server_jobs::CancellationToken;
use gatehouse_storage::{object_key, ObjectStore};
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{PublishError, Result};

const BUNDLE_DIR: &str = "bundle";
const BUNDLE_FILE: &str = "bundle.tar.gz";

#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
	/// Object key per environment; `{environment}` is substituted.
	pub key_template: String,
	pub tests: TestOptions,
	/// Parent of per-cycle scratch directories. `None` uses the system temp
	/// dir.
	pub work_root: Option<PathBuf>,
}

/// Why a new bundle row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishReason {
	Initial,
	VersionsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
	/// Recorded versions and stored object both match; nothing was written.
	UpToDate,
	/// Storage had drifted from an up-to-date row; the object was re-uploaded
	/// and no row was written.
	Republished { hash: String },
	/// A new bundle was uploaded and recorded.
	Published { bundle_id: i64, hash: String },
}

/// One lock per environment so overlapping cycles for the same environment
/// serialize while different environments proceed independently.
#[derive(Default)]
struct EnvironmentLocks {
	non_production: Mutex<()>,
	staging: Mutex<()>,
	production: Mutex<()>,
}

impl EnvironmentLocks {
	fn get(&self, environment: Environment) -> &Mutex<()> {
		match environment {
			Environment::NonProduction => &self.non_production,
			Environment::Staging => &self.staging,
			Environment::Production => &self.production,
		}
	}
}

pub struct Publisher {
	stores: RegistryStores,
	resolver: VersionResolver,
	bundles: Arc<dyn BundleStore>,
	engine: Arc<dyn PolicyEngine>,
	storage: Arc<dyn ObjectStore>,
	settings: PublishSettings,
	locks: EnvironmentLocks,
}

impl Publisher {
	pub fn new(
		stores: RegistryStores,
		bundles: Arc<dyn BundleStore>,
		engine: Arc<dyn PolicyEngine>,
		storage: Arc<dyn ObjectStore>,
		settings: PublishSettings,
	) -> Self {
		Self {
			resolver: VersionResolver::new(stores.clone()),
			stores,
			bundles,
			engine,
			storage,
			settings,
			locks: EnvironmentLocks::default(),
		}
	}

	pub fn object_key(&self, environment: Environment) -> String {
		object_key(&self.settings.key_template, environment.as_str())
	}

	/// Bring storage and the bundle log up to date for `environment`.
	///
	/// Any error aborts the cycle. A row is only written after a successful
	/// upload, and never when only storage had drifted.
	#[instrument(skip(self, cancel), fields(environment = %environment))]
	pub async fn run_publish_cycle(
		&self,
		environment: Environment,
		cancel: &CancellationToken,
	) -> Result<PublishOutcome> {
		let _guard = self.locks.get(environment).lock().await;

		ensure_not_cancelled(cancel, "resolve")?;
		let latest = self.bundles.latest_for_environment(environment).await?;
		let versions = self.resolver.resolve_latest_versions(environment).await?;
		let key = self.object_key(environment);

		let reason = match &latest {
			Some(record) if versions.matches(record) => {
				let stored = self.storage.head_object_hash(&key).await?;
				if stored.as_deref() == Some(record.hash.as_str()) {
					debug!(bundle_id = record.id, "bundle up to date");
					return Ok(PublishOutcome::UpToDate);
				}
				warn!(
					bundle_id = record.id,
					recorded = %record.hash,
					stored = ?stored,
					"stored bundle differs from recorded hash, republishing"
				);
				None
			}
			Some(record) => {
				info!(bundle_id = record.id, "registry versions changed");
				Some(PublishReason::VersionsChanged)
			}
			None => {
				info!("no bundle recorded yet");
				Some(PublishReason::Initial)
			}
		};

		ensure_not_cancelled(cancel, "materialize")?;
		let content = materialize(&self.stores, &versions).await?;

		ensure_not_cancelled(cancel, "build")?;
		let scratch = self.scratch_dir()?;
		let (report, body) = self.build_tarball(&content, scratch.path()).await?;

		ensure_not_cancelled(cancel, "upload")?;
		let hash = self.storage.upload_object(&key, body).await?;
		info!(key = %key, hash = %hash, "bundle uploaded");

		let Some(reason) = reason else {
			return Ok(PublishOutcome::Republished { hash });
		};

		ensure_not_cancelled(cancel, "persist")?;
		let opa_version = match self.engine.version().await {
			Ok(v) => Some(v),
			Err(e) => {
				warn!(error = %e, "could not determine opa version");
				None
			}
		};

		let included = content.versions();
		let record = self
			.bundles
			.create(&NewBundleRecord {
				environment,
				hash: hash.clone(),
				metadata: Some(self.metadata(reason, &content, &report)),
				assets: included.assets,
				connections: included.connections,
				key_version: included.key_version,
				opa_version,
			})
			.await?;

		info!(bundle_id = record.id, reason = ?reason, "bundle published");
		Ok(PublishOutcome::Published {
			bundle_id: record.id,
			hash,
		})
	}

	/// Resolve, lay out and package the current bundle for `environment`
	/// into `output` without uploading or recording it.
	#[instrument(skip(self), fields(environment = %environment, output = %output.display()))]
	pub async fn build_local(
		&self,
		environment: Environment,
		output: &Path,
	) -> Result<(VersionSet, BuildReport)> {
		let versions = self.resolver.resolve_latest_versions(environment).await?;
		let content = materialize(&self.stores, &versions).await?;

		let scratch = self.scratch_dir()?;
		let output = std::path::absolute(output)?;
		let report = create_bundle(
			self.engine.as_ref(),
			&content,
			scratch.path(),
			&output,
			&self.settings.tests,
		)
		.await?;
		Ok((versions, report))
	}

	/// Lay out the current bundle for `environment` and run `opa check` on it.
	#[instrument(skip(self), fields(environment = %environment))]
	pub async fn check(&self, environment: Environment) -> Result<EngineOutcome> {
		if !self.engine.binary_exists().await {
			return Err(BundlerError::OpaNotFound.into());
		}
		let versions = self.resolver.resolve_latest_versions(environment).await?;
		let content = materialize(&self.stores, &versions).await?;

		let scratch = self.scratch_dir()?;
		layout(&content, scratch.path()).await?;
		Ok(self.engine.check(scratch.path()).await?)
	}

	async fn build_tarball(
		&self,
		content: &BundleContent,
		scratch: &Path,
	) -> Result<(BuildReport, Bytes)> {
		let bundle_dir = scratch.join(BUNDLE_DIR);
		tokio::fs::create_dir(&bundle_dir).await?;
		let output = scratch.join(BUNDLE_FILE);

		let report = create_bundle(
			self.engine.as_ref(),
			content,
			&bundle_dir,
			&output,
			&self.settings.tests,
		)
		.await?;
		let body = tokio::fs::read(&output).await?;
		debug!(bytes = body.len(), "bundle built");
		Ok((report, Bytes::from(body)))
	}

	fn scratch_dir(&self) -> Result<TempDir> {
		let mut builder = tempfile::Builder::new();
		builder.prefix("gatehouse-");
		let dir = match &self.settings.work_root {
			Some(root) => builder.tempdir_in(root)?,
			None => builder.tempdir()?,
		};
		Ok(dir)
	}

	fn metadata(
		&self,
		reason: PublishReason,
		content: &BundleContent,
		report: &BuildReport,
	) -> serde_json::Value {
		serde_json::json!({
			"reason": reason,
			"assets": {
				"policy": content.count(AssetType::Policy),
				"data": content.count(AssetType::Data),
				"test": content.count(AssetType::Test),
				"test_data": content.count(AssetType::TestData),
			},
			"connections": content.connections.len(),
			"tests": self.settings.tests,
			"coverage": report.coverage,
			"warnings": report.layout.warnings,
		})
	}
}

fn ensure_not_cancelled(cancel: &CancellationToken, stage: &'static str) -> Result<()> {
	if cancel.is_cancelled() {
		Err(PublishError::Cancelled { stage })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gatehouse_bundler::ErrorKind;
	use gatehouse_opa::testing::{ScriptedPolicyEngine, FAKE_TARBALL};
	use gatehouse_server_db::testing::{create_registry_test_pool, new_asset, new_connection};
	use gatehouse_server_db::{BundleRepository, NameVersion};
	use gatehouse_storage::{content_hash, MemoryObjectStore};

	const PUBLIC_JWK: &str = r#"{"kty":"RSA","n":"n","e":"AQAB"}"#;

	struct Harness {
		stores: RegistryStores,
		bundles: Arc<BundleRepository>,
		engine: Arc<ScriptedPolicyEngine>,
		storage: Arc<MemoryObjectStore>,
		publisher: Publisher,
	}

	impl Harness {
		async fn new(engine: ScriptedPolicyEngine) -> Self {
			let pool = create_registry_test_pool().await;
			let stores = RegistryStores::from_pool(pool.clone());
			let bundles = Arc::new(BundleRepository::new(pool));
			let engine = Arc::new(engine);
			let storage = Arc::new(MemoryObjectStore::new("opa-bundles"));

			let publisher = Publisher::new(
				stores.clone(),
				bundles.clone(),
				engine.clone(),
				storage.clone(),
				PublishSettings {
					key_template: "{environment}/bundle.tar.gz".to_string(),
					tests: TestOptions {
						enabled: true,
						coverage_threshold: None,
					},
					work_root: None,
				},
			);

			Self {
				stores,
				bundles,
				engine,
				storage,
				publisher,
			}
		}
	}

	async fn seeded(engine: ScriptedPolicyEngine) -> Harness {
		let h = Harness::new(engine).await;
		h.stores
			.assets
			.create(&new_asset("authz.rego", AssetType::Policy, &[Environment::Staging]))
			.await
			.unwrap();
		h.stores
			.connections
			.create(&new_connection("avi", Environment::Staging, true))
			.await
			.unwrap();
		h.stores
			.keys
			.create(Environment::Staging, "private", PUBLIC_JWK)
			.await
			.unwrap();
		h
	}

	async fn cycle(h: &Harness) -> Result<PublishOutcome> {
		h.publisher
			.run_publish_cycle(Environment::Staging, &CancellationToken::new())
			.await
	}

	async fn row_count(h: &Harness) -> usize {
		h.bundles
			.list_for_environment(Environment::Staging, 100)
			.await
			.unwrap()
			.len()
	}

	#[tokio::test]
	async fn test_initial_publish_uploads_and_records() {
		let h = seeded(ScriptedPolicyEngine::default()).await;

		let outcome = cycle(&h).await.unwrap();

		let hash = content_hash(FAKE_TARBALL);
		assert!(matches!(outcome, PublishOutcome::Published { hash: ref got, .. } if *got == hash));
		assert_eq!(h.storage.upload_count(), 1);
		assert_eq!(
			h.storage.get("staging/bundle.tar.gz").await.unwrap(),
			Bytes::from_static(FAKE_TARBALL)
		);

		let record = h
			.bundles
			.latest_for_environment(Environment::Staging)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(record.hash, hash);
		assert_eq!(record.key_version, Some(1));
		assert_eq!(record.assets, vec![NameVersion::new("authz.rego", 1)]);
		assert_eq!(record.connections, vec![NameVersion::new("avi", 1)]);
		assert_eq!(record.opa_version.as_deref(), Some("0.70.0"));

		let metadata = record.metadata.unwrap();
		assert_eq!(metadata["reason"], "initial");
		assert_eq!(metadata["assets"]["policy"], 1);
		assert_eq!(metadata["connections"], 1);
		assert_eq!(metadata["tests"]["enabled"], true);
	}

	/// Test: an unchanged registry and untouched storage produce no writes.
	///
	/// Why this test is important: the cycle runs every few minutes; it must
	/// not upload or grow the bundle log when nothing changed.
	#[tokio::test]
	async fn test_second_cycle_is_up_to_date() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		cycle(&h).await.unwrap();
		let calls_after_first = h.engine.calls().len();

		let outcome = cycle(&h).await.unwrap();

		assert_eq!(outcome, PublishOutcome::UpToDate);
		assert_eq!(h.storage.upload_count(), 1);
		assert_eq!(row_count(&h).await, 1);
		assert_eq!(h.engine.calls().len(), calls_after_first);
	}

	/// Test: storage mutated out of band is repaired without a new row.
	///
	/// Why this test is important: the bundle log already describes the right
	/// versions, so only the object needs rewriting.
	#[tokio::test]
	async fn test_storage_drift_republishes_without_row() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		cycle(&h).await.unwrap();
		h.storage
			.put_untracked("staging/bundle.tar.gz", Bytes::from_static(b"tampered"))
			.await;

		let outcome = cycle(&h).await.unwrap();

		assert_eq!(
			outcome,
			PublishOutcome::Republished {
				hash: content_hash(FAKE_TARBALL)
			}
		);
		assert_eq!(h.storage.upload_count(), 2);
		assert_eq!(row_count(&h).await, 1);
		assert_eq!(cycle(&h).await.unwrap(), PublishOutcome::UpToDate);
	}

	#[tokio::test]
	async fn test_missing_object_republishes() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		cycle(&h).await.unwrap();
		let fresh = Harness::new(ScriptedPolicyEngine::default()).await;
		// Same registry and bundle log, empty storage.
		let publisher = Publisher::new(
			h.stores.clone(),
			h.bundles.clone(),
			fresh.engine.clone(),
			fresh.storage.clone(),
			h.publisher.settings.clone(),
		);

		let outcome = publisher
			.run_publish_cycle(Environment::Staging, &CancellationToken::new())
			.await
			.unwrap();
		assert!(matches!(outcome, PublishOutcome::Republished { .. }));
		assert_eq!(fresh.storage.upload_count(), 1);
		assert_eq!(row_count(&h).await, 1);
	}

	#[tokio::test]
	async fn test_key_rotation_publishes_new_row() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		cycle(&h).await.unwrap();
		h.stores
			.keys
			.create(Environment::Staging, "private-2", PUBLIC_JWK)
			.await
			.unwrap();

		let outcome = cycle(&h).await.unwrap();

		assert!(matches!(outcome, PublishOutcome::Published { .. }));
		assert_eq!(h.storage.upload_count(), 2);
		let rows = h
			.bundles
			.list_for_environment(Environment::Staging, 10)
			.await
			.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].key_version, Some(2));
		assert_eq!(rows[0].metadata.as_ref().unwrap()["reason"], "versions_changed");
	}

	#[tokio::test]
	async fn test_new_asset_version_publishes_new_row() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		cycle(&h).await.unwrap();
		h.stores
			.assets
			.create(&new_asset("authz.rego", AssetType::Policy, &[Environment::Staging]))
			.await
			.unwrap();

		assert!(matches!(
			cycle(&h).await.unwrap(),
			PublishOutcome::Published { .. }
		));
		let latest = h
			.bundles
			.latest_for_environment(Environment::Staging)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(latest.assets, vec![NameVersion::new("authz.rego", 2)]);
	}

	/// Test: a legacy row without a key version is always treated as stale.
	#[tokio::test]
	async fn test_null_key_version_forces_publish() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		let hash = h
			.storage
			.upload_object("staging/bundle.tar.gz", Bytes::from_static(FAKE_TARBALL))
			.await
			.unwrap();
		h.bundles
			.create(&NewBundleRecord {
				environment: Environment::Staging,
				hash,
				metadata: None,
				assets: vec![NameVersion::new("authz.rego", 1)],
				connections: vec![NameVersion::new("avi", 1)],
				key_version: None,
				opa_version: None,
			})
			.await
			.unwrap();

		let outcome = cycle(&h).await.unwrap();

		assert!(matches!(outcome, PublishOutcome::Published { .. }));
		assert_eq!(row_count(&h).await, 2);
	}

	#[tokio::test]
	async fn test_build_failure_writes_nothing() {
		let h = seeded(ScriptedPolicyEngine {
			build: EngineOutcome::Failed {
				payload: serde_json::Value::String("rego_parse_error".into()),
			},
			..Default::default()
		})
		.await;

		let err = cycle(&h).await.unwrap_err();

		assert!(matches!(
			err,
			PublishError::Bundler(BundlerError::OpaBundleCreationError { .. })
		));
		assert_eq!(h.storage.upload_count(), 0);
		assert_eq!(row_count(&h).await, 0);
	}

	#[tokio::test]
	async fn test_failing_policy_tests_write_nothing() {
		let h = seeded(ScriptedPolicyEngine {
			test: EngineOutcome::Failed {
				payload: serde_json::json!([{ "fail": true }]),
			},
			..Default::default()
		})
		.await;

		let err = cycle(&h).await.unwrap_err();
		assert!(matches!(err, PublishError::Bundler(ref e) if e.kind() == ErrorKind::ExternalTool));
		assert_eq!(h.storage.upload_count(), 0);
		assert_eq!(row_count(&h).await, 0);
	}

	#[tokio::test]
	async fn test_environment_without_key_aborts() {
		let h = Harness::new(ScriptedPolicyEngine::default()).await;
		h.stores
			.assets
			.create(&new_asset("authz.rego", AssetType::Policy, &[Environment::Staging]))
			.await
			.unwrap();

		let err = cycle(&h).await.unwrap_err();
		assert!(matches!(err, PublishError::Bundler(ref e) if e.kind() == ErrorKind::NotFound));
		assert_eq!(h.storage.upload_count(), 0);
	}

	#[tokio::test]
	async fn test_cancelled_cycle_does_nothing() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		let token = CancellationToken::new();
		token.cancel();

		let err = h
			.publisher
			.run_publish_cycle(Environment::Staging, &token)
			.await
			.unwrap_err();

		assert!(matches!(err, PublishError::Cancelled { stage: "resolve" }));
		assert!(h.engine.calls().is_empty());
		assert_eq!(h.storage.upload_count(), 0);
	}

	#[tokio::test]
	async fn test_environments_are_independent() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		h.stores
			.assets
			.create(&new_asset("prod.rego", AssetType::Policy, &[Environment::Production]))
			.await
			.unwrap();
		h.stores
			.keys
			.create(Environment::Production, "private", PUBLIC_JWK)
			.await
			.unwrap();

		let token = CancellationToken::new();
		let (staging, production) = tokio::join!(
			h.publisher.run_publish_cycle(Environment::Staging, &token),
			h.publisher.run_publish_cycle(Environment::Production, &token),
		);

		assert!(matches!(staging.unwrap(), PublishOutcome::Published { .. }));
		assert!(matches!(production.unwrap(), PublishOutcome::Published { .. }));
		assert!(h.storage.get("staging/bundle.tar.gz").await.is_some());
		assert!(h.storage.get("production/bundle.tar.gz").await.is_some());
	}

	#[tokio::test]
	async fn test_build_local_writes_output_without_publishing() {
		let h = seeded(ScriptedPolicyEngine::default()).await;
		let out = TempDir::new().unwrap();
		let output = out.path().join("local.tar.gz");

		let (versions, report) = h
			.publisher
			.build_local(Environment::Staging, &output)
			.await
			.unwrap();

		assert_eq!(versions.key_version, Some(1));
		assert!(report.coverage.is_none());
		assert_eq!(std::fs::read(&output).unwrap(), FAKE_TARBALL);
		assert_eq!(h.storage.upload_count(), 0);
		assert_eq!(row_count(&h).await, 0);
	}

	#[tokio::test]
	async fn test_check_reports_engine_outcome() {
		let h = seeded(ScriptedPolicyEngine {
			check: EngineOutcome::Failed {
				payload: serde_json::json!({ "errors": [{ "code": "rego_type_error" }] }),
			},
			..Default::default()
		})
		.await;

		let outcome = h.publisher.check(Environment::Staging).await.unwrap();

		assert!(!outcome.is_ok());
		assert_eq!(h.engine.calls(), vec!["binary_exists", "check"]);
	}
}
