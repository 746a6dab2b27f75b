// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod cron;
mod database;
mod logging;
mod opa;
mod storage;

pub use cron::{CronConfig, CronConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use opa::{OpaConfig, OpaConfigLayer};
pub use storage::{StorageBackend, StorageConfig, StorageConfigLayer, DEFAULT_KEY_TEMPLATE};
pub use policy_tests::{TestsConfig, TestsConfigLayer};
