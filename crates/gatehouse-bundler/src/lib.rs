// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OPA bundle assembly.
//!
//! A bundle is built in four steps:
//!
//! 1. [`VersionResolver::resolve_latest_versions`] picks the latest asset,
//!    connection and key versions for an environment.
//! 2. [`materialize`] loads exactly those rows.
//! 3. [`layout`] writes them into the directory tree OPA expects, rendering
//!    templated assets against the bundle's connections.
//! 4. [`create_bundle`] runs the policy tests and packages the tree.

mod content;
mod error;
mod layout;
mod orchestrator;
mod resolver;
mod template;
mod version;

pub use content::{materialize, BundleContent};
pub use error::{BundlerError, ErrorKind, Result};
pub use layout::{layout, LayoutReport, LayoutWarning, KEY_FILE};
pub use orchestrator::{create_bundle, BuildReport, TestOptions};
pub use resolver::{RegistryStores, VersionResolver};
pub use template::TemplateRenderer;
pub use version::VersionSet;
