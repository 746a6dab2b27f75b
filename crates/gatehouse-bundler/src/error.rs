// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use gatehouse_opa::OpaError;
use gatehouse_server_db::{DbError, Environment};

/// Coarse classification of a [`BundlerError`] for callers deciding how to alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// A required row is absent.
	NotFound,
	/// The bundle content or its options are malformed.
	Validation,
	/// The environment cannot build bundles at all (workdir, binary).
	Precondition,
	/// The policy engine ran and rejected the bundle.
	ExternalTool,
	/// Coverage is below the configured minimum.
	Threshold,
	/// Database or filesystem failure, passed through unchanged.
	Store,
}

#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
	#[error(transparent)]
	Db(#[from] DbError),

	#[error("no key found for environment {environment}")]
	KeyNotFound { environment: Environment },

	#[error("bundle work directory does not exist: {0}")]
	WorkdirNotFound(PathBuf),

	#[error("policy engine binary is not available")]
	OpaNotFound,

	#[error("bundle contains no POLICY assets")]
	MissingPolicyFiles,

	#[error("asset {name} has an unsafe path (uri {uri:?})")]
	InvalidAssetPath { name: String, uri: String },

	#[error("assets {first} and {second} both write {}", .path.display())]
	DuplicateAssetPath {
		path: PathBuf,
		first: String,
		second: String,
	},

	#[error("asset {name} has invalid content: {reason}")]
	InvalidAssetData { name: String, reason: String },

	#[error("failed to render template {name}: {message}")]
	Template { name: String, message: String },

	#[error("key {environment}@{version} is not a JSON object: {reason}")]
	InvalidKey {
		environment: Environment,
		version: i64,
		reason: String,
	},

	#[error("invalid test options: {0}")]
	InvalidTestOptions(String),

	#[error("policy tests failed")]
	OpaTestsFailed { payload: serde_json::Value },

	#[error("coverage {coverage:.2}% is below the required {threshold:.2}%")]
	OpaCoverageTooLow { coverage: f64, threshold: f64 },

	#[error("coverage run failed: {0}")]
	OpaCoverageFailed(#[source] OpaError),

	#[error("opa build failed: {stderr}")]
	OpaBundleCreationError { stderr: String },

	#[error(transparent)]
	Opa(#[from] OpaError),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl BundlerError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			BundlerError::KeyNotFound { .. } => ErrorKind::NotFound,
			BundlerError::MissingPolicyFiles
			| BundlerError::InvalidAssetPath { .. }
			| BundlerError::DuplicateAssetPath { .. }
			| BundlerError::InvalidAssetData { .. }
			| BundlerError::Template { .. }
			| BundlerError::InvalidKey { .. }
			| BundlerError::InvalidTestOptions(_) => ErrorKind::Validation,
			BundlerError::WorkdirNotFound(_) | BundlerError::OpaNotFound => ErrorKind::Precondition,
			BundlerError::OpaTestsFailed { .. }
			| BundlerError::OpaCoverageFailed(_)
			| BundlerError::OpaBundleCreationError { .. }
			| BundlerError::Opa(_) => ErrorKind::ExternalTool,
			BundlerError::OpaCoverageTooLow { .. } => ErrorKind::Threshold,
			BundlerError::Db(_) | BundlerError::Io(_) => ErrorKind::Store,
		}
	}
}

pub type Result<T> = std::result::Result<T, BundlerError>;
