// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeps each environment's published OPA bundle in step with the policy
//! registry.

pub mod app;
pub mod error;
pub mod job;
pub mod publish;

pub use app::App;
pub use error::{PublishError, Result};
pub use job::PublishJob;
pub use publish::{PublishOutcome, PublishReason, PublishSettings, Publisher};
