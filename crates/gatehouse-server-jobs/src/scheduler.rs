// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{determine_health_state, HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
use crate::job::Job;
use crate::schedule::CronSchedule;
use crate::types::{JobOutput, JobSchedule, JobStatus, TriggerSource};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Fallback wait when a cron expression has no future occurrence.
const IDLE_RECHECK: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct RunHistory {
	last_run: Option<LastRunInfo>,
	consecutive_failures: u32,
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	schedule: JobSchedule,
	cancellation_token: CancellationToken,
	running: Arc<AtomicBool>,
	history: Arc<Mutex<RunHistory>>,
}

impl RegisteredJob {
	fn new(job: Arc<dyn Job>, schedule: JobSchedule) -> Self {
		Self {
			job,
			schedule,
			cancellation_token: CancellationToken::new(),
			running: Arc::new(AtomicBool::new(false)),
			history: Arc::new(Mutex::new(RunHistory::default())),
		}
	}

	fn runner(&self) -> JobRunner {
		JobRunner {
			job: Arc::clone(&self.job),
			cancellation_token: self.cancellation_token.clone(),
			running: Arc::clone(&self.running),
			history: Arc::clone(&self.history),
		}
	}
}

/// Everything a spawned loop needs to execute one job.
#[derive(Clone)]
struct JobRunner {
	job: Arc<dyn Job>,
	cancellation_token: CancellationToken,
	running: Arc<AtomicBool>,
	history: Arc<Mutex<RunHistory>>,
}

/// Clears the in-flight flag even if the job panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl JobRunner {
	/// Runs the job once unless a previous run is still in flight.
	async fn execute(&self, triggered_by: TriggerSource) -> Result<JobOutput> {
		let job_id = self.job.id().to_string();
		if self.running.swap(true, Ordering::SeqCst) {
			warn!(job_id = %job_id, ?triggered_by, "Previous run still in progress, skipping");
			return Err(JobError::AlreadyRunning(job_id));
		}
		let _guard = RunningGuard(Arc::clone(&self.running));

		let run_id = uuid::Uuid::new_v4().to_string();
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by,
			cancellation_token: self.cancellation_token.clone(),
		};
		let started_at = Utc::now();
		let started = Instant::now();

		debug!(job_id = %job_id, run_id = %run_id, ?triggered_by, "Job started");
		let result = self.job.run(&ctx).await;
		let duration_ms = started.elapsed().as_millis() as i64;

		let (status, error, metadata) = match &result {
			Ok(output) => (JobStatus::Succeeded, None, output.metadata.clone()),
			Err(JobError::Cancelled) => (JobStatus::Cancelled, None, None),
			Err(e) => (JobStatus::Failed, Some(e.to_string()), None),
		};

		let mut history = self.history.lock().await;
		history.consecutive_failures = match status {
			JobStatus::Failed => history.consecutive_failures + 1,
			_ => 0,
		};
		history.last_run = Some(LastRunInfo {
			run_id: run_id.clone(),
			status,
			started_at,
			duration_ms: Some(duration_ms),
			error: error.clone(),
			metadata,
		});

		match status {
			JobStatus::Succeeded => {
				info!(job_id = %job_id, run_id = %run_id, duration_ms, "Job completed successfully")
			}
			JobStatus::Cancelled => info!(job_id = %job_id, run_id = %run_id, "Job cancelled"),
			_ => warn!(
				job_id = %job_id,
				run_id = %run_id,
				consecutive_failures = history.consecutive_failures,
				error = error.as_deref().unwrap_or_default(),
				"Job failed"
			),
		}

		result
	}
}

pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl JobScheduler {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		let id = job.id().to_string();
		self.jobs
			.insert(id, RegisteredJob::new(job, JobSchedule::Interval(interval)));
	}

	pub fn register_cron(&mut self, job: Arc<dyn Job>, schedule: CronSchedule) {
		let id = job.id().to_string();
		self.jobs
			.insert(id, RegisteredJob::new(job, JobSchedule::Cron(schedule)));
	}

	/// Spawn one loop per registered job.
	///
	/// A tick that fires while the previous run of the same job is still in
	/// flight is skipped rather than queued.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let runner = registered.runner();
			let schedule = registered.schedule.clone();
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				let mut ticker = match &schedule {
					JobSchedule::Interval(interval) => {
						let mut ticker =
							tokio::time::interval_at(tokio::time::Instant::now() + *interval, *interval);
						ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
						Some(ticker)
					}
					JobSchedule::Cron(_) => None,
				};

				loop {
					let wait = async {
						match (&mut ticker, &schedule) {
							(Some(ticker), _) => {
								ticker.tick().await;
							}
							(None, JobSchedule::Cron(cron)) => {
								let delay = cron.delay_from(Utc::now()).unwrap_or(IDLE_RECHECK);
								tokio::time::sleep(delay).await;
							}
							(None, JobSchedule::Interval(interval)) => {
								tokio::time::sleep(*interval).await;
							}
						}
					};

					tokio::select! {
						_ = wait => {
							if runner.cancellation_token.is_cancelled() {
								continue;
							}
							let runner = runner.clone();
							tokio::spawn(async move {
								let _ = runner.execute(TriggerSource::Schedule).await;
							});
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "Shutting down scheduled job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	/// Run a job now, outside its schedule. Fails with
	/// [`JobError::AlreadyRunning`] if a run is in flight.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<JobOutput> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.runner().execute(triggered_by).await
	}

	/// Stop scheduling, ask in-flight runs to cancel, and wait for them.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		for registered in self.jobs.values() {
			registered.cancellation_token.cancel();
		}
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		for registered in self.jobs.values() {
			while registered.running.load(Ordering::SeqCst) {
				tokio::time::sleep(Duration::from_millis(50)).await;
			}
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;
		let history = registered.history.lock().await;

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(history.last_run.as_ref(), history.consecutive_failures),
			running: registered.running.load(Ordering::SeqCst),
			last_run: history.last_run.clone(),
			consecutive_failures: history.consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();
		let mut worst_state = HealthState::Healthy;

		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				if status.status == HealthState::Unhealthy {
					worst_state = HealthState::Unhealthy;
				} else if status.status == HealthState::Degraded && worst_state != HealthState::Unhealthy {
					worst_state = HealthState::Degraded;
				}
				jobs.push(status);
			}
		}

		JobsHealthStatus {
			status: worst_state,
			jobs,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::AtomicUsize;

	struct MockJob {
		id: String,
		runs: AtomicUsize,
		delay: Duration,
		fail: bool,
	}

	impl MockJob {
		fn new(id: &str) -> Self {
			Self {
				id: id.to_string(),
				runs: AtomicUsize::new(0),
				delay: Duration::ZERO,
				fail: false,
			}
		}

		fn runs(&self) -> usize {
			self.runs.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for MockJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Mock Job"
		}

		fn description(&self) -> &str {
			"A mock job for testing"
		}

		async fn run(&self, ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			self.runs.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(self.delay).await;
			ctx.ensure_not_cancelled()?;
			if self.fail {
				return Err(JobError::Failed {
					message: "boom".to_string(),
				});
			}
			Ok(JobOutput {
				message: "Mock job completed".to_string(),
				metadata: Some(serde_json::json!({ "ok": true })),
			})
		}
	}

	#[tokio::test]
	async fn test_register_jobs() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(MockJob::new("periodic")), Duration::from_secs(60));
		scheduler.register_cron(
			Arc::new(MockJob::new("cron")),
			CronSchedule::parse("*/5 * * * *").unwrap(),
		);

		let mut ids = scheduler.job_ids();
		ids.sort();
		assert_eq!(ids, vec!["cron".to_string(), "periodic".to_string()]);
	}

	#[tokio::test]
	async fn test_trigger_nonexistent_job_returns_not_found() {
		let scheduler = JobScheduler::new();
		match scheduler.trigger_job("missing", TriggerSource::Manual).await {
			Err(JobError::NotFound(id)) => assert_eq!(id, "missing"),
			other => panic!("Expected NotFound error, got: {:?}", other.map(|o| o.message)),
		}
	}

	#[tokio::test]
	async fn test_trigger_records_last_run() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(MockJob::new("job")), Duration::from_secs(60));

		let output = scheduler
			.trigger_job("job", TriggerSource::Manual)
			.await
			.unwrap();
		assert_eq!(output.message, "Mock job completed");

		let status = scheduler.job_status("job").await.unwrap();
		assert_eq!(status.status, HealthState::Healthy);
		assert!(!status.running);
		let last = status.last_run.unwrap();
		assert_eq!(last.status, JobStatus::Succeeded);
		assert_eq!(last.metadata.unwrap()["ok"], true);
	}

	/// Test: overlapping runs of the same job are refused.
	///
	/// Why this test is important: the publish job is not safe to run twice
	/// at once for the same environment; the scheduler is the first line of
	/// defence against a slow run overlapping the next tick.
	#[tokio::test]
	async fn test_overlapping_trigger_is_skipped() {
		let mut job = MockJob::new("slow");
		job.delay = Duration::from_millis(300);
		let job = Arc::new(job);
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(job.clone(), Duration::from_secs(60));

		let (first, second) = tokio::join!(
			scheduler.trigger_job("slow", TriggerSource::Manual),
			async {
				tokio::time::sleep(Duration::from_millis(50)).await;
				scheduler.trigger_job("slow", TriggerSource::Manual).await
			}
		);

		assert!(first.is_ok());
		assert!(matches!(second, Err(JobError::AlreadyRunning(ref id)) if id == "slow"));
		assert_eq!(job.runs(), 1);
	}

	#[tokio::test]
	async fn test_consecutive_failures_degrade_health() {
		let mut job = MockJob::new("flaky");
		job.fail = true;
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(job), Duration::from_secs(60));

		for expected in [HealthState::Degraded, HealthState::Degraded, HealthState::Unhealthy] {
			assert!(scheduler.trigger_job("flaky", TriggerSource::Manual).await.is_err());
			assert_eq!(scheduler.job_status("flaky").await.unwrap().status, expected);
		}

		let health = scheduler.health_status().await;
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.jobs[0].consecutive_failures, 3);
	}

	#[tokio::test]
	async fn test_run_after_shutdown_reports_cancelled() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(MockJob::new("job")), Duration::from_secs(60));
		scheduler.shutdown().await;

		assert!(matches!(
			scheduler.trigger_job("job", TriggerSource::Manual).await,
			Err(JobError::Cancelled)
		));
		let last = scheduler.job_status("job").await.unwrap().last_run.unwrap();
		assert_eq!(last.status, JobStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_periodic_job_runs_until_shutdown() {
		let job = Arc::new(MockJob::new("tick"));
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(job.clone(), Duration::from_millis(40));

		scheduler.start().await.unwrap();
		tokio::time::sleep(Duration::from_millis(300)).await;
		scheduler.shutdown().await;

		let runs = job.runs();
		assert!(runs >= 2, "expected at least two runs, got {runs}");

		tokio::time::sleep(Duration::from_millis(150)).await;
		assert_eq!(job.runs(), runs);
	}
}
