// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for gatehouse services.
//!
//! Jobs run on a fixed interval or a cron schedule. A job never overlaps
//! itself: a tick that arrives while the previous run is still in flight is
//! skipped. Failed runs are not retried; the next tick is the retry. Run
//! history is kept in memory for health reporting.

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod schedule;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use schedule::CronSchedule;
pub use scheduler::JobScheduler;
pub use types::{JobOutput, JobSchedule, JobStatus, TriggerSource};
