// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Object storage for published bundles.

mod error;
mod memory;
mod s3;
mod store;

pub use error::{Result, StorageError};
pub use memory::{content_hash, MemoryObjectStore};
pub use s3::{S3ObjectStore, S3Settings};
pub use store::{object_key, ObjectStore};
