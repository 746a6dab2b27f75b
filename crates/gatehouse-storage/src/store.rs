// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Blob store holding one published bundle per object key.
///
/// Hashes are opaque fingerprints: identical content yields an identical
/// hash, and callers only ever compare them for equality.
#[async_trait]
pub trait ObjectStore: Send + Sync {
	/// Bucket every key is resolved against.
	fn bucket(&self) -> &str;

	async fn bucket_exists(&self) -> Result<bool>;

	/// Current content hash of `key`, `None` when the object is absent.
	async fn head_object_hash(&self, key: &str) -> Result<Option<String>>;

	/// Replace `key` with `body` in a single call and return the new hash.
	async fn upload_object(&self, key: &str, body: Bytes) -> Result<String>;
}

/// Expands `{environment}` in an object key template.
pub fn object_key(template: &str, environment: &str) -> String {
	template.replace("{environment}", environment)
}
