// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::error::{Result, StorageError};
use crate::store::ObjectStore;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
	pub bucket: String,
	pub region: Option<String>,
	/// Custom endpoint such as MinIO; enables path-style addressing.
	pub endpoint_url: Option<String>,
}

/// S3-backed store. The content hash is the object's ETag without quotes.
#[derive(Clone)]
pub struct S3ObjectStore {
	client: Client,
	bucket: String,
}

impl std::fmt::Debug for S3ObjectStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("S3ObjectStore")
			.field("bucket", &self.bucket)
			.finish()
	}
}

impl S3ObjectStore {
	pub fn new(client: Client, bucket: impl Into<String>) -> Self {
		Self {
			client,
			bucket: bucket.into(),
		}
	}

	/// Build a client from the ambient AWS configuration plus `settings`.
	pub async fn connect(settings: &S3Settings) -> Self {
		let mut loader = aws_config::defaults(BehaviorVersion::latest());
		if let Some(region) = &settings.region {
			loader = loader.region(Region::new(region.clone()));
		}
		let shared = loader.load().await;

		let mut builder = aws_sdk_s3::config::Builder::from(&shared);
		if let Some(endpoint) = &settings.endpoint_url {
			builder = builder.endpoint_url(endpoint).force_path_style(true);
		}

		info!(bucket = %settings.bucket, endpoint = ?settings.endpoint_url, "s3 object store configured");
		Self::new(Client::from_conf(builder.build()), settings.bucket.clone())
	}

	fn request_error(&self, operation: &'static str, key: &str, message: String) -> StorageError {
		StorageError::Request {
			operation,
			bucket: self.bucket.clone(),
			key: key.to_string(),
			message,
		}
	}
}

fn strip_etag(etag: &str) -> String {
	etag.trim_matches('"').to_string()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
	fn bucket(&self) -> &str {
		&self.bucket
	}

	#[instrument(skip(self), fields(bucket = %self.bucket))]
	async fn bucket_exists(&self) -> Result<bool> {
		match self.client.head_bucket().bucket(&self.bucket).send().await {
			Ok(_) => Ok(true),
			Err(e) => {
				if e.as_service_error().is_some_and(|se| se.is_not_found()) {
					Ok(false)
				} else {
					Err(self.request_error("head_bucket", "", DisplayErrorContext(&e).to_string()))
				}
			}
		}
	}

	#[instrument(skip(self), fields(bucket = %self.bucket))]
	async fn head_object_hash(&self, key: &str) -> Result<Option<String>> {
		match self
			.client
			.head_object()
			.bucket(&self.bucket)
			.key(key)
			.send()
			.await
		{
			Ok(out) => Ok(out.e_tag().map(strip_etag)),
			Err(e) => {
				if e.as_service_error().is_some_and(|se| se.is_not_found()) {
					debug!(key, "object not found");
					Ok(None)
				} else {
					Err(self.request_error("head_object", key, DisplayErrorContext(&e).to_string()))
				}
			}
		}
	}

	#[instrument(skip(self, body), fields(bucket = %self.bucket, size = body.len()))]
	async fn upload_object(&self, key: &str, body: Bytes) -> Result<String> {
		let out = self
			.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.content_type("application/gzip")
			.body(ByteStream::from(body))
			.send()
			.await
			.map_err(|e| self.request_error("put_object", key, DisplayErrorContext(&e).to_string()))?;

		let hash = match out.e_tag() {
			Some(etag) => strip_etag(etag),
			None => self
				.head_object_hash(key)
				.await?
				.ok_or_else(|| StorageError::MissingHash {
					bucket: self.bucket.clone(),
					key: key.to_string(),
				})?,
		};

		info!(key, hash = %hash, "uploaded object");
		Ok(hash)
	}
}
