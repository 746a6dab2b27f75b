// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_server_db::Environment;
use gatehouse_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

use crate::error::PublishError;
use crate::publish::{PublishOutcome, Publisher};

/// Scheduled publish cycle for one environment.
pub struct PublishJob {
	publisher: Arc<Publisher>,
	environment: Environment,
	id: String,
	name: String,
}

impl PublishJob {
	pub fn job_id(environment: Environment) -> String {
		format!("publish-{environment}")
	}

	pub fn new(publisher: Arc<Publisher>, environment: Environment) -> Self {
		Self {
			publisher,
			environment,
			id: Self::job_id(environment),
			name: format!("Publish {environment} bundle"),
		}
	}
}

#[async_trait]
impl Job for PublishJob {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn description(&self) -> &str {
		"Rebuild and upload the OPA bundle when registry versions or storage drift"
	}

	#[instrument(skip(self, ctx), fields(job_id = %self.id, run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.ensure_not_cancelled()?;

		let outcome = self
			.publisher
			.run_publish_cycle(self.environment, &ctx.cancellation_token)
			.await
			.map_err(|e| match e {
				PublishError::Cancelled { .. } => JobError::Cancelled,
				other => JobError::Failed {
					message: other.to_string(),
				},
			})?;

		let message = match &outcome {
			PublishOutcome::UpToDate => format!("{} bundle up to date", self.environment),
			PublishOutcome::Republished { hash } => {
				format!("{} bundle re-uploaded ({hash})", self.environment)
			}
			PublishOutcome::Published { bundle_id, hash } => {
				format!("{} bundle {bundle_id} published ({hash})", self.environment)
			}
		};

		Ok(JobOutput {
			message,
			metadata: serde_json::to_value(&outcome).ok(),
		})
	}
}
