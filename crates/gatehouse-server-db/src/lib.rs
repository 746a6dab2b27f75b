// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry database layer for gatehouse.
//!
//! Assets, connections and keys are written by the management API and only
//! read here; bundle records are written by the publish pipeline. Each table
//! has a `*Store` trait and a SQLite `*Repository` implementing it.

pub mod asset;
pub mod bundle;
pub mod connection;
pub mod error;
pub mod key;
pub mod pool;
pub mod testing;
pub mod types;

pub use asset::{Asset, AssetRepository, AssetStore, NewAsset};
pub use bundle::{BundleRecord, BundleRepository, BundleStore, NewBundleRecord};
pub use connection::{Connection, ConnectionRepository, ConnectionStore, NewConnection};
pub use error::{DbError, Result};
pub use key::{Key, KeyRepository, KeyStore};
pub use pool::{create_pool, run_migrations};
pub use types::{AssetType, Environment, NameVersion};
