// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::store::ObjectStore;

/// In-process object store for tests and local runs. Hashes are SHA-256 hex.
#[derive(Debug)]
pub struct MemoryObjectStore {
	bucket: String,
	bucket_exists: bool,
	objects: RwLock<HashMap<String, Bytes>>,
	uploads: AtomicUsize,
}

impl MemoryObjectStore {
	pub fn new(bucket: impl Into<String>) -> Self {
		Self {
			bucket: bucket.into(),
			bucket_exists: true,
			objects: RwLock::new(HashMap::new()),
			uploads: AtomicUsize::new(0),
		}
	}

	/// A store whose bucket reports as missing.
	pub fn without_bucket(bucket: impl Into<String>) -> Self {
		Self {
			bucket_exists: false,
			..Self::new(bucket)
		}
	}

	pub async fn get(&self, key: &str) -> Option<Bytes> {
		self.objects.read().await.get(key).cloned()
	}

	/// Write an object without counting it as an upload, as if it were
	/// changed by someone other than the publisher.
	pub async fn put_untracked(&self, key: &str, body: Bytes) {
		self.objects.write().await.insert(key.to_string(), body);
	}

	/// Number of `upload_object` calls so far.
	pub fn upload_count(&self) -> usize {
		self.uploads.load(Ordering::SeqCst)
	}
}

pub fn content_hash(body: &[u8]) -> String {
	hex::encode(Sha256::digest(body))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
	fn bucket(&self) -> &str {
		&self.bucket
	}

	async fn bucket_exists(&self) -> Result<bool> {
		Ok(self.bucket_exists)
	}

	async fn head_object_hash(&self, key: &str) -> Result<Option<String>> {
		Ok(self
			.objects
			.read()
			.await
			.get(key)
			.map(|body| content_hash(body)))
	}

	async fn upload_object(&self, key: &str, body: Bytes) -> Result<String> {
		let hash = content_hash(&body);
		self.objects.write().await.insert(key.to_string(), body);
		self.uploads.fetch_add(1, Ordering::SeqCst);
		debug!(bucket = %self.bucket, key, hash = %hash, "stored object in memory");
		Ok(hash)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_head_absent_object_is_none() {
		let store = MemoryObjectStore::new("bundles");
		assert_eq!(store.head_object_hash("staging/bundle.tar.gz").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_upload_returns_head_hash() {
		let store = MemoryObjectStore::new("bundles");
		let hash = store
			.upload_object("k", Bytes::from_static(b"one"))
			.await
			.unwrap();

		assert_eq!(store.head_object_hash("k").await.unwrap(), Some(hash.clone()));
		assert_eq!(store.upload_count(), 1);

		let same = store
			.upload_object("other", Bytes::from_static(b"one"))
			.await
			.unwrap();
		assert_eq!(same, hash);

		let different = store
			.upload_object("k", Bytes::from_static(b"two"))
			.await
			.unwrap();
		assert_ne!(different, hash);
	}

	#[tokio::test]
	async fn test_put_untracked_changes_hash_without_upload() {
		let store = MemoryObjectStore::new("bundles");
		let hash = store
			.upload_object("k", Bytes::from_static(b"one"))
			.await
			.unwrap();
		store.put_untracked("k", Bytes::from_static(b"tampered")).await;

		assert_ne!(store.head_object_hash("k").await.unwrap(), Some(hash));
		assert_eq!(store.upload_count(), 1);
		assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"tampered"));
	}

	#[tokio::test]
	async fn test_bucket_exists() {
		assert!(MemoryObjectStore::new("b").bucket_exists().await.unwrap());
		assert!(!MemoryObjectStore::without_bucket("b")
			.bucket_exists()
			.await
			.unwrap());
	}
}
