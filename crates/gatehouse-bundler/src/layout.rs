// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Writes [`BundleContent`] into the directory tree `opa build` consumes.
//!
//! ```text
//! <root>/<uri>/<asset name>      POLICY, TEST and TEST_DATA assets
//! <root>/<uri>/data.<ext>        DATA assets
//! <root>/keys/data.json          public signing key
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use gatehouse_server_db::{Asset, AssetType, Key};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::content::BundleContent;
use crate::error::{BundlerError, Result};
use crate::template::TemplateRenderer;

/// Location of the public key inside the bundle.
pub const KEY_FILE: &str = "keys/data.json";

/// JWK members that only exist on private keys.
const PRIVATE_JWK_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

/// A missing optional part of a bundle. The bundle is still built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutWarning {
	NoDataFiles,
	NoTestFiles,
	NoKey,
}

impl fmt::Display for LayoutWarning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			LayoutWarning::NoDataFiles => "bundle has no DATA assets",
			LayoutWarning::NoTestFiles => "bundle has no TEST assets",
			LayoutWarning::NoKey => "bundle has no key",
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutReport {
	pub files: Vec<PathBuf>,
	pub warnings: Vec<LayoutWarning>,
}

/// Lay `content` out under `root`.
///
/// Everything is validated before the first write, so a rejected bundle
/// leaves `root` untouched.
#[instrument(skip(content, root), fields(environment = %content.environment, root = %root.display()))]
pub async fn layout(content: &BundleContent, root: &Path) -> Result<LayoutReport> {
	let warnings = validate(content)?;
	for warning in &warnings {
		warn!(%warning, "incomplete bundle");
	}

	let renderer = TemplateRenderer::new();
	let context = serde_json::to_value(&content.connections).map_err(|e| BundlerError::Template {
		name: "<connections>".to_string(),
		message: e.to_string(),
	})?;

	let mut owners: HashMap<PathBuf, &str> = HashMap::new();
	let mut planned = Vec::with_capacity(content.assets.len() + 1);
	for asset in &content.assets {
		let relative = asset_path(asset)?;
		claim(&mut owners, &relative, &asset.name)?;
		let bytes = asset_bytes(asset, &renderer, &context)?;
		planned.push((relative, bytes));
	}
	if let Some(key) = &content.key {
		let relative = PathBuf::from(KEY_FILE);
		claim(&mut owners, &relative, "<key>")?;
		planned.push((relative, public_key_bytes(key)?));
	}

	let mut files = Vec::with_capacity(planned.len());
	for (relative, bytes) in planned {
		let path = root.join(&relative);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(&path, bytes).await?;
		debug!(path = %relative.display(), "wrote bundle file");
		files.push(relative);
	}

	Ok(LayoutReport { files, warnings })
}

fn validate(content: &BundleContent) -> Result<Vec<LayoutWarning>> {
	if content.count(AssetType::Policy) == 0 {
		return Err(BundlerError::MissingPolicyFiles);
	}

	let mut warnings = Vec::new();
	if content.count(AssetType::Data) == 0 {
		warnings.push(LayoutWarning::NoDataFiles);
	}
	if content.count(AssetType::Test) == 0 {
		warnings.push(LayoutWarning::NoTestFiles);
	}
	if content.key.is_none() {
		warnings.push(LayoutWarning::NoKey);
	}
	Ok(warnings)
}

/// `<uri>/<file name>` relative to the bundle root.
fn asset_path(asset: &Asset) -> Result<PathBuf> {
	let invalid = || BundlerError::InvalidAssetPath {
		name: asset.name.clone(),
		uri: asset.uri.clone(),
	};

	let uri = Path::new(&asset.uri);
	if !uri
		.components()
		.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
	{
		return Err(invalid());
	}

	let mut name = Path::new(&asset.name).components();
	match (name.next(), name.next()) {
		(Some(Component::Normal(_)), None) => {}
		_ => return Err(invalid()),
	}

	let dir: PathBuf = uri
		.components()
		.filter(|c| matches!(c, Component::Normal(_)))
		.collect();
	Ok(dir.join(file_name(asset)))
}

/// Two bundle entries may not land on the same file.
fn claim<'a>(owners: &mut HashMap<PathBuf, &'a str>, path: &Path, name: &'a str) -> Result<()> {
	if let Some(first) = owners.insert(path.to_path_buf(), name) {
		return Err(BundlerError::DuplicateAssetPath {
			path: path.to_path_buf(),
			first: first.to_string(),
			second: name.to_string(),
		});
	}
	Ok(())
}

/// DATA assets must be named `data.<ext>` for OPA to load them.
fn file_name(asset: &Asset) -> String {
	if asset.asset_type != AssetType::Data {
		return asset.name.clone();
	}
	match Path::new(&asset.name).extension() {
		Some(ext) => format!("data.{}", ext.to_string_lossy()),
		None => "data".to_string(),
	}
}

fn asset_bytes(asset: &Asset, renderer: &TemplateRenderer, context: &serde_json::Value) -> Result<Vec<u8>> {
	let decoded = STANDARD
		.decode(asset.data.trim())
		.map_err(|e| BundlerError::InvalidAssetData {
			name: asset.name.clone(),
			reason: format!("invalid base64: {e}"),
		})?;

	if !asset.is_template {
		return Ok(decoded);
	}

	let source = String::from_utf8(decoded).map_err(|e| BundlerError::InvalidAssetData {
		name: asset.name.clone(),
		reason: format!("template is not UTF-8: {e}"),
	})?;
	Ok(renderer.render(&asset.name, &source, context)?.into_bytes())
}

/// The stored public JWK with any private members removed.
fn public_key_bytes(key: &Key) -> Result<Vec<u8>> {
	let invalid = |reason: String| BundlerError::InvalidKey {
		environment: key.environment,
		version: key.version,
		reason,
	};

	let mut jwk: serde_json::Value =
		serde_json::from_str(&key.public_key).map_err(|e| invalid(e.to_string()))?;
	let members = jwk
		.as_object_mut()
		.ok_or_else(|| invalid("expected a JSON object".to_string()))?;
	for member in PRIVATE_JWK_MEMBERS {
		if members.remove(*member).is_some() {
			warn!(
				environment = %key.environment,
				version = key.version,
				member,
				"removed private member from public key"
			);
		}
	}

	serde_json::to_vec_pretty(&jwk).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use chrono::Utc;
	use gatehouse_server_db::{Connection, Environment};
	use tempfile::TempDir;

	pub(crate) fn asset(name: &str, uri: &str, asset_type: AssetType, body: &str) -> Asset {
		Asset {
			id: 0,
			name: name.to_string(),
			version: 1,
			data: STANDARD.encode(body),
			uri: uri.to_string(),
			asset_type,
			environments: vec![Environment::Staging],
			is_template: false,
			created_at: Utc::now(),
		}
	}

	pub(crate) fn connection(name: &str) -> Connection {
		Connection {
			id: 0,
			name: name.to_string(),
			version: 1,
			environment: Environment::Staging,
			enabled: true,
			auth_token: format!("token-{name}"),
			allow_browser_access: false,
			allow_no_origin: false,
			allowed_domains: Vec::new(),
			allowed_origins: Vec::new(),
			created_at: Utc::now(),
		}
	}

	pub(crate) fn key(public_key: &str) -> Key {
		Key {
			id: 0,
			environment: Environment::Staging,
			version: 1,
			private_key: r#"{"kty":"RSA","n":"n","e":"AQAB","d":"secret"}"#.to_string(),
			public_key: public_key.to_string(),
			created_at: Utc::now(),
		}
	}

	pub(crate) fn content(assets: Vec<Asset>, key: Option<Key>) -> BundleContent {
		BundleContent {
			environment: Environment::Staging,
			assets,
			connections: vec![connection("avi"), connection("iva")],
			key,
		}
	}

	#[tokio::test]
	async fn test_missing_policy_fails_without_writing() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![
				asset("config.json", "authz", AssetType::Data, "{}"),
				asset("authz_test.rego", "authz", AssetType::Test, "package t"),
				asset("fixture.json", "authz", AssetType::TestData, "{}"),
			],
			Some(key(r#"{"kty":"RSA"}"#)),
		);

		let err = layout(&content, dir.path()).await.unwrap_err();
		assert!(matches!(err, BundlerError::MissingPolicyFiles));
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn test_policy_only_emits_three_warnings() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![asset("authz.rego", "authz", AssetType::Policy, "package authz")],
			None,
		);

		let report = layout(&content, dir.path()).await.unwrap();
		assert_eq!(
			report.warnings,
			vec![
				LayoutWarning::NoDataFiles,
				LayoutWarning::NoTestFiles,
				LayoutWarning::NoKey
			]
		);
		assert_eq!(
			std::fs::read_to_string(dir.path().join("authz/authz.rego")).unwrap(),
			"package authz"
		);
	}

	#[tokio::test]
	async fn test_paths_and_data_renaming() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![
				asset("authz.rego", "policies/authz", AssetType::Policy, "package authz"),
				asset("roles.json", "policies/authz", AssetType::Data, r#"{"a":1}"#),
				asset("roles.yaml", "policies/other", AssetType::Data, "a: 1"),
				asset("authz_test.rego", "tests", AssetType::Test, "package t"),
			],
			Some(key(r#"{"kty":"RSA"}"#)),
		);

		let report = layout(&content, dir.path()).await.unwrap();
		assert!(report.warnings.is_empty());

		let root = dir.path();
		assert!(root.join("policies/authz/authz.rego").is_file());
		assert_eq!(
			std::fs::read_to_string(root.join("policies/authz/data.json")).unwrap(),
			r#"{"a":1}"#
		);
		assert!(root.join("policies/other/data.yaml").is_file());
		assert!(root.join("tests/authz_test.rego").is_file());
		assert!(root.join(KEY_FILE).is_file());
		assert_eq!(report.files.len(), 5);
	}

	#[tokio::test]
	async fn test_layout_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![asset("authz.rego", "authz", AssetType::Policy, "package authz")],
			None,
		);
		layout(&content, dir.path()).await.unwrap();
		let second = layout(&content, dir.path()).await.unwrap();
		assert_eq!(second.files, vec![PathBuf::from("authz/authz.rego")]);
	}

	#[tokio::test]
	async fn test_template_renders_connections() {
		let dir = TempDir::new().unwrap();
		let mut connections_file = asset(
			"connections.json",
			"authz",
			AssetType::Data,
			"{{#delimitedEach .}}{{name}}{{/delimitedEach}}",
		);
		connections_file.is_template = true;
		let content = content(
			vec![
				asset("authz.rego", "authz", AssetType::Policy, "package authz"),
				connections_file,
			],
			None,
		);

		layout(&content, dir.path()).await.unwrap();
		assert_eq!(
			std::fs::read_to_string(dir.path().join("authz/data.json")).unwrap(),
			"avi,iva"
		);
	}

	/// Test: only the public half of the key reaches the bundle.
	///
	/// Why this test is important: the bundle is uploaded to shared storage
	/// and served to every OPA instance; a private JWK member in it would leak
	/// the signing key.
	#[tokio::test]
	async fn test_key_file_strips_private_members() {
		let dir = TempDir::new().unwrap();
		let jwk = r#"{"kty":"RSA","n":"abc","e":"AQAB","d":"x","p":"x","q":"x","dp":"x","dq":"x","qi":"x"}"#;
		let content = content(
			vec![asset("authz.rego", "authz", AssetType::Policy, "package authz")],
			Some(key(jwk)),
		);

		layout(&content, dir.path()).await.unwrap();

		let written: serde_json::Value =
			serde_json::from_slice(&std::fs::read(dir.path().join(KEY_FILE)).unwrap()).unwrap();
		let members = written.as_object().unwrap();
		for private in PRIVATE_JWK_MEMBERS {
			assert!(!members.contains_key(*private), "{private} leaked");
		}
		assert_eq!(written["n"], "abc");
		assert_eq!(written["kty"], "RSA");
	}

	#[tokio::test]
	async fn test_rejects_escaping_paths() {
		let dir = TempDir::new().unwrap();
		for (name, uri) in [
			("authz.rego", "../outside"),
			("authz.rego", "/etc"),
			("../authz.rego", "authz"),
			("nested/authz.rego", "authz"),
		] {
			let content = content(vec![asset(name, uri, AssetType::Policy, "package authz")], None);
			let err = layout(&content, dir.path()).await.unwrap_err();
			assert!(
				matches!(err, BundlerError::InvalidAssetPath { .. }),
				"{name} in {uri}: {err}"
			);
		}
	}

	#[tokio::test]
	async fn test_rejects_invalid_base64() {
		let dir = TempDir::new().unwrap();
		let mut policy = asset("authz.rego", "authz", AssetType::Policy, "");
		policy.data = "not base64!".to_string();

		let err = layout(&content(vec![policy], None), dir.path())
			.await
			.unwrap_err();
		assert!(matches!(err, BundlerError::InvalidAssetData { .. }));
	}

	#[tokio::test]
	async fn test_rejects_non_object_key() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![asset("authz.rego", "authz", AssetType::Policy, "package authz")],
			Some(key("[1,2]")),
		);
		let err = layout(&content, dir.path()).await.unwrap_err();
		assert!(matches!(err, BundlerError::InvalidKey { .. }));
	}

	#[tokio::test]
	async fn test_data_assets_sharing_a_uri_are_rejected() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![
				asset("authz.rego", "authz", AssetType::Policy, "package authz"),
				asset("roles.json", "authz", AssetType::Data, r#"{"roles":1}"#),
				asset("users.json", "./authz", AssetType::Data, r#"{"users":2}"#),
			],
			None,
		);

		let err = layout(&content, dir.path()).await.unwrap_err();
		match err {
			BundlerError::DuplicateAssetPath {
				ref path,
				ref first,
				ref second,
			} => {
				assert_eq!(path, &PathBuf::from("authz/data.json"));
				assert_eq!(first, "roles.json");
				assert_eq!(second, "users.json");
			}
			other => panic!("unexpected error: {other}"),
		}
		assert_eq!(err.kind(), crate::ErrorKind::Validation);
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn test_asset_cannot_shadow_key_file() {
		let dir = TempDir::new().unwrap();
		let content = content(
			vec![
				asset("authz.rego", "authz", AssetType::Policy, "package authz"),
				asset("data.json", "keys", AssetType::Data, "{}"),
			],
			Some(key(r#"{"kty":"RSA"}"#)),
		);

		let err = layout(&content, dir.path()).await.unwrap_err();
		assert!(matches!(err, BundlerError::DuplicateAssetPath { .. }));
	}

	#[test]
	fn test_data_file_without_extension() {
		let data = asset("roles", "authz", AssetType::Data, "{}");
		assert_eq!(file_name(&data), "data");
	}
}
