// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job failed: {message}")]
	Failed { message: String },

	#[error("Job cancelled")]
	Cancelled,

	#[error("Job {0} is already running")]
	AlreadyRunning(String),

	#[error("Job not found: {0}")]
	NotFound(String),

	#[error("Invalid schedule: {0}")]
	InvalidSchedule(String),
}

pub type Result<T> = std::result::Result<T, JobError>;
