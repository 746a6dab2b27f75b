// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring from resolved configuration to a ready [`Publisher`] and the
//! scheduler that drives it.

use std::sync::Arc;

use gatehouse_bundler::{RegistryStores, TestOptions};
use gatehouse_opa::CommandPolicyEngine;
use gatehouse_server_config::{CronConfig, GatehouseConfig, StorageBackend, TestsConfig};
use gatehouse_server_db::{create_pool, run_migrations, BundleRepository, Environment};
use gatehouse_server_jobs::{CronSchedule, HealthState, JobScheduler, TriggerSource};
use gatehouse_storage::{MemoryObjectStore, ObjectStore, S3ObjectStore, S3Settings};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::job::PublishJob;
use crate::publish::{PublishSettings, Publisher};

pub struct App {
	pub bundles: Arc<BundleRepository>,
	pub storage: Arc<dyn ObjectStore>,
	pub publisher: Arc<Publisher>,
}

impl App {
	pub async fn connect(config: &GatehouseConfig) -> Result<Self> {
		let pool = create_pool(&config.database.url).await?;
		run_migrations(&pool).await?;

		let storage: Arc<dyn ObjectStore> = match config.storage.backend {
			StorageBackend::S3 => Arc::new(
				S3ObjectStore::connect(&S3Settings {
					bucket: config.storage.bucket.clone(),
					region: config.storage.region.clone(),
					endpoint_url: config.storage.endpoint_url.clone(),
				})
				.await,
			),
			StorageBackend::Memory => {
				warn!("using in-memory object storage; uploads are lost on exit");
				Arc::new(MemoryObjectStore::new(config.storage.bucket.clone()))
			}
		};

		let engine = Arc::new(
			CommandPolicyEngine::new(config.opa.binary.clone())
				.with_timeout(config.opa.command_timeout),
		);
		let bundles = Arc::new(BundleRepository::new(pool.clone()));

		let publisher = Publisher::new(
			RegistryStores::from_pool(pool),
			bundles.clone(),
			engine,
			storage.clone(),
			PublishSettings {
				key_template: config.storage.key_template.clone(),
				tests: test_options(&config.tests),
				work_root: config.cron.work_root.clone(),
			},
		);

		info!(bucket = storage.bucket(), "publisher ready");
		Ok(Self {
			bundles,
			storage,
			publisher: Arc::new(publisher),
		})
	}

	/// One [`PublishJob`] per configured environment, on the configured
	/// interval or cron schedule.
	pub fn scheduler(&self, cron: &CronConfig) -> Result<JobScheduler> {
		let mut scheduler = JobScheduler::new();
		match cron.interval {
			Some(interval) => {
				for environment in &cron.environments {
					scheduler.register_periodic(self.publish_job(*environment), interval);
				}
			}
			None => {
				let schedule = CronSchedule::parse(&cron.schedule)?;
				for environment in &cron.environments {
					scheduler.register_cron(self.publish_job(*environment), schedule.clone());
				}
			}
		}
		Ok(scheduler)
	}

	fn publish_job(&self, environment: Environment) -> Arc<PublishJob> {
		Arc::new(PublishJob::new(self.publisher.clone(), environment))
	}
}

/// Run every registered publish job once, outside its schedule. Failures are
/// logged and recorded in job health; they do not stop the others.
pub async fn publish_now(scheduler: &JobScheduler, environments: &[Environment]) {
	for environment in environments {
		let job_id = PublishJob::job_id(*environment);
		match scheduler.trigger_job(&job_id, TriggerSource::Manual).await {
			Ok(output) => info!(job_id = %job_id, result = %output.message, "startup publish finished"),
			Err(e) => error!(job_id = %job_id, error = %e, "startup publish failed"),
		}
	}
}

/// Log the scheduler's job health and return the overall state.
pub async fn log_job_health(scheduler: &JobScheduler) -> HealthState {
	let health = scheduler.health_status().await;
	for job in &health.jobs {
		let last_error = job.last_run.as_ref().and_then(|r| r.error.as_deref());
		match job.status {
			HealthState::Healthy => info!(
				job_id = %job.job_id,
				running = job.running,
				"job healthy"
			),
			HealthState::Degraded | HealthState::Unhealthy => warn!(
				job_id = %job.job_id,
				status = ?job.status,
				consecutive_failures = job.consecutive_failures,
				last_error,
				"job failing"
			),
		}
	}
	health.status
}

pub fn test_options(config: &TestsConfig) -> TestOptions {
	TestOptions {
		enabled: config.enabled,
		coverage_threshold: config.coverage_threshold,
	}
}
