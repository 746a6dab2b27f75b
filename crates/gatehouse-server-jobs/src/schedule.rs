// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cron expressions for scheduled jobs.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{JobError, Result};

/// A parsed cron expression, evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
	expression: String,
	schedule: Schedule,
}

impl CronSchedule {
	/// Accepts the 5-field Unix form (`*/5 * * * *`) as well as the 6- and
	/// 7-field forms with seconds and year.
	pub fn parse(expression: &str) -> Result<Self> {
		let schedule = Schedule::from_str(&to_cron_crate_format(expression))
			.map_err(|e| JobError::InvalidSchedule(format!("{expression}: {e}")))?;
		Ok(Self {
			expression: expression.to_string(),
			schedule,
		})
	}

	pub fn expression(&self) -> &str {
		&self.expression
	}

	pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
		self.schedule.after(&after).next()
	}

	/// Time to wait from `now` until the next occurrence.
	pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
		let next = self.next_after(now)?;
		Some((next - now).to_std().unwrap_or(Duration::ZERO))
	}
}

/// The `cron` crate wants `sec min hour dom month dow [year]`; a 5-field
/// expression runs at second 0 of every matching minute in any year.
fn to_cron_crate_format(expression: &str) -> String {
	if expression.split_whitespace().count() == 5 {
		format!("0 {} *", expression.trim())
	} else {
		expression.to_string()
	}
}
