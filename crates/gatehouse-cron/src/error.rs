// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use gatehouse_bundler::BundlerError;
use gatehouse_opa::OpaError;
use gatehouse_server_db::DbError;
use gatehouse_server_jobs::JobError;
use gatehouse_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
	#[error(transparent)]
	Bundler(#[from] BundlerError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error(transparent)]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Opa(#[from] OpaError),

	#[error("scheduler error: {0}")]
	Schedule(#[from] JobError),

	#[error("scratch directory error: {0}")]
	Io(#[from] std::io::Error),

	#[error("publish cancelled before {stage}")]
	Cancelled { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, PublishError>;
