// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! gatehouse-cron binary: publishes OPA bundles on a schedule.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gatehouse_cron::app::{log_job_health, publish_now};
use gatehouse_cron::App;
use gatehouse_opa::EngineOutcome;
use gatehouse_server_config::{GatehouseConfig, LogFormat};
use gatehouse_server_db::{BundleStore, Environment};
use gatehouse_server_jobs::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// How often `run` logs job health while waiting for shutdown.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Gatehouse bundle publisher.
#[derive(Parser, Debug)]
#[command(
	name = "gatehouse-cron",
	about = "Builds and publishes OPA policy bundles",
	version
)]
struct Args {
	/// Config file to use instead of /etc/gatehouse/cron.toml
	#[arg(long, env = "GATEHOUSE_CONFIG", global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the publish scheduler until interrupted (default)
	Run {
		/// Publish every environment once before waiting for the schedule
		#[arg(long)]
		publish_on_start: bool,
	},
	/// Run one publish cycle for an environment
	Publish {
		#[arg(long)]
		env: Environment,
	},
	/// Build the current bundle locally without uploading or recording it
	Build {
		#[arg(long)]
		env: Environment,
		#[arg(long, default_value = "bundle.tar.gz")]
		out: PathBuf,
	},
	/// Lay out the current bundle and run `opa check` against it
	Check {
		#[arg(long)]
		env: Environment,
	},
	/// List recently published bundles, newest first
	History {
		#[arg(long)]
		env: Environment,
		#[arg(long, default_value_t = 10)]
		limit: u32,
	},
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => gatehouse_server_config::load_config_with_file(path)?,
		None => gatehouse_server_config::load_config()?,
	};
	init_tracing(&config);

	let app = App::connect(&config).await?;

	let command = args.command.unwrap_or(Command::Run {
		publish_on_start: false,
	});
	match command {
		Command::Run { publish_on_start } => run(&config, &app, publish_on_start).await?,
		Command::Publish { env } => {
			let outcome = app
				.publisher
				.run_publish_cycle(env, &CancellationToken::new())
				.await?;
			println!("{}", serde_json::to_string_pretty(&outcome)?);
		}
		Command::Build { env, out } => {
			let (versions, report) = app.publisher.build_local(env, &out).await?;
			println!(
				"{}",
				serde_json::to_string_pretty(&serde_json::json!({
					"output": out,
					"versions": versions,
					"report": report,
				}))?
			);
		}
		Command::Check { env } => match app.publisher.check(env).await? {
			EngineOutcome::Ok => println!("{env}: opa check passed"),
			EngineOutcome::Failed { payload } => {
				eprintln!("{}", serde_json::to_string_pretty(&payload)?);
				return Err(format!("{env}: opa check failed").into());
			}
		},
		Command::History { env, limit } => {
			for record in app.bundles.list_for_environment(env, limit).await? {
				println!(
					"{}\t{}\t{}\tkey={}\topa={}",
					record.id,
					record.created_at.to_rfc3339(),
					record.hash,
					record
						.key_version
						.map(|v| v.to_string())
						.unwrap_or_else(|| "-".to_string()),
					record.opa_version.as_deref().unwrap_or("-"),
				);
			}
		}
		// Printed before configuration is loaded.
		Command::Version => {}
	}

	Ok(())
}

fn init_tracing(config: &GatehouseConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn run(
	config: &GatehouseConfig,
	app: &App,
	publish_on_start: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	if !app.storage.bucket_exists().await? {
		tracing::error!(bucket = app.storage.bucket(), "bundle bucket does not exist");
		return Err(format!("bucket {} does not exist", app.storage.bucket()).into());
	}

	let scheduler = app.scheduler(&config.cron)?;
	if publish_on_start {
		publish_now(&scheduler, &config.cron.environments).await;
	}

	tracing::info!(
		schedule = %config.cron.schedule,
		interval = ?config.cron.interval,
		environments = ?config.cron.environments,
		"starting gatehouse-cron"
	);
	scheduler.start().await?;

	let mut health_ticker = tokio::time::interval_at(
		tokio::time::Instant::now() + HEALTH_LOG_INTERVAL,
		HEALTH_LOG_INTERVAL,
	);
	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);
	loop {
		tokio::select! {
			_ = health_ticker.tick() => {
				log_job_health(&scheduler).await;
			}
			signal = &mut shutdown => {
				signal?;
				break;
			}
		}
	}

	tracing::info!("Received shutdown signal");
	scheduler.shutdown().await;
	let health = log_job_health(&scheduler).await;
	tracing::info!(?health, "Scheduler shutdown complete");
	Ok(())
}
