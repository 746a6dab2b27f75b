// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("object storage {operation} failed for {bucket}/{key}: {message}")]
	Request {
		operation: &'static str,
		bucket: String,
		key: String,
		message: String,
	},

	#[error("object storage returned no hash for {bucket}/{key}")]
	MissingHash { bucket: String, key: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;
