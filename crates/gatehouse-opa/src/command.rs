// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, trace, warn};

use crate::engine::{EngineOutcome, PolicyEngine};
use crate::error::{OpaError, Result};

pub const DEFAULT_BINARY: &str = "opa";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Policy engine implementation using the `opa` CLI.
#[derive(Clone, Debug)]
pub struct CommandPolicyEngine {
	binary: PathBuf,
	timeout: Duration,
}

impl CommandPolicyEngine {
	pub fn new(binary: impl Into<PathBuf>) -> Self {
		Self {
			binary: binary.into(),
			timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Bound every invocation; a command still running after `timeout` is killed.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn binary(&self) -> &Path {
		&self.binary
	}

	/// Runs `opa <args>` and returns its raw output, whatever the exit status.
	async fn run_opa(
		&self,
		subcommand: &'static str,
		args: &[&str],
		cwd: Option<&Path>,
	) -> Result<Output> {
		let mut cmd = Command::new(&self.binary);
		cmd.arg(subcommand).args(args).kill_on_drop(true);
		if let Some(dir) = cwd {
			cmd.current_dir(dir);
		}

		trace!(
			cmd = %format!("{} {} {}", self.binary.display(), subcommand, args.join(" ")),
			"running opa command"
		);

		let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
			Ok(result) => result.map_err(|e| {
				if e.kind() == std::io::ErrorKind::NotFound {
					warn!(binary = %self.binary.display(), "opa not found");
					OpaError::NotInstalled {
						binary: self.binary.display().to_string(),
					}
				} else {
					OpaError::Io(e)
				}
			})?,
			Err(_) => {
				warn!(subcommand, timeout = ?self.timeout, "opa command timed out");
				return Err(OpaError::Timeout {
					subcommand,
					timeout: self.timeout,
				});
			}
		};

		debug!(subcommand, status = ?output.status.code(), "opa command finished");
		Ok(output)
	}

	async fn run_soft(&self, subcommand: &'static str, dir: &Path) -> Result<EngineOutcome> {
		let dir = path_arg(dir)?;
		let output = self
			.run_opa(subcommand, &["-b", dir, "-f", "json"], None)
			.await?;
		Ok(outcome_from(&output))
	}
}

impl Default for CommandPolicyEngine {
	fn default() -> Self {
		Self::new(DEFAULT_BINARY)
	}
}

#[async_trait]
impl PolicyEngine for CommandPolicyEngine {
	async fn binary_exists(&self) -> bool {
		matches!(
			self.run_opa("version", &[], None).await,
			Ok(output) if output.status.success()
		)
	}

	#[instrument(skip(self))]
	async fn version(&self) -> Result<String> {
		let output = self.run_opa("version", &[], None).await?;
		if !output.status.success() {
			return Err(OpaError::CommandFailed {
				subcommand: "version",
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}
		parse_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
			OpaError::InvalidOutput {
				subcommand: "version",
				reason: "no Version line".to_string(),
			}
		})
	}

	#[instrument(skip(self), fields(dir = %dir.display()))]
	async fn check(&self, dir: &Path) -> Result<EngineOutcome> {
		self.run_soft("check", dir).await
	}

	#[instrument(skip(self), fields(dir = %dir.display()))]
	async fn test(&self, dir: &Path) -> Result<EngineOutcome> {
		self.run_soft("test", dir).await
	}

	#[instrument(skip(self), fields(dir = %dir.display()))]
	async fn test_coverage(&self, dir: &Path) -> Result<f64> {
		let dir = path_arg(dir)?;
		let output = self
			.run_opa("test", &["-b", dir, "-f", "json", "-c"], None)
			.await?;
		if !output.status.success() {
			return Err(OpaError::CommandFailed {
				subcommand: "test",
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}
		parse_coverage(&output.stdout)
	}

	#[instrument(skip(self), fields(source = %source_dir.display(), output = %output.display()))]
	async fn build(&self, source_dir: &Path, output: &Path) -> Result<EngineOutcome> {
		// The command runs inside `source_dir`, so a relative output would land there.
		let output = std::path::absolute(output)?;
		let output_arg = path_arg(&output)?;
		let result = self
			.run_opa("build", &["-o", output_arg, "-b", "."], Some(source_dir))
			.await?;

		if result.status.success() {
			Ok(EngineOutcome::Ok)
		} else {
			Ok(EngineOutcome::Failed {
				payload: serde_json::Value::String(
					String::from_utf8_lossy(&result.stderr).trim().to_string(),
				),
			})
		}
	}
}

fn path_arg(path: &Path) -> Result<&str> {
	path.to_str().ok_or_else(|| {
		OpaError::Io(std::io::Error::new(
			std::io::ErrorKind::InvalidInput,
			format!("path is not valid UTF-8: {}", path.display()),
		))
	})
}

fn outcome_from(output: &Output) -> EngineOutcome {
	if output.status.success() {
		EngineOutcome::Ok
	} else {
		EngineOutcome::Failed {
			payload: parse_payload(&output.stdout, &output.stderr),
		}
	}
}

/// Prefers JSON on stdout, then JSON on stderr, then stderr as plain text.
fn parse_payload(stdout: &[u8], stderr: &[u8]) -> serde_json::Value {
	serde_json::from_slice(stdout)
		.or_else(|_| serde_json::from_slice(stderr))
		.unwrap_or_else(|_| {
			let text = if stderr.iter().all(u8::is_ascii_whitespace) {
				stdout
			} else {
				stderr
			};
			serde_json::Value::String(String::from_utf8_lossy(text).trim().to_string())
		})
}

/// Extracts `x.y.z` from the `Version: x.y.z` line of `opa version`.
fn parse_version(stdout: &str) -> Option<String> {
	stdout.lines().find_map(|line| {
		line.trim()
			.strip_prefix("Version:")
			.map(|v| v.trim().to_string())
			.filter(|v| !v.is_empty())
	})
}

fn parse_coverage(stdout: &[u8]) -> Result<f64> {
	let value: serde_json::Value =
		serde_json::from_slice(stdout).map_err(|e| OpaError::InvalidOutput {
			subcommand: "test",
			reason: e.to_string(),
		})?;
	value
		.get("coverage")
		.and_then(serde_json::Value::as_f64)
		.ok_or_else(|| OpaError::InvalidOutput {
			subcommand: "test",
			reason: "missing coverage field".to_string(),
		})
}
