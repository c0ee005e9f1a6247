//! Subcommand implementations.

pub mod serve;
pub mod worker;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::FleetConfig;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = FleetConfig::load(cli.config.as_deref())?;
	match cli.command {
		Commands::Worker(args) => {
			config.apply_worker_args(&args);
			worker::run(config, args.exit_on_eof).await
		}
		Commands::Serve(args) => {
			if let Some(capacity) = args.queue_capacity {
				config.queue_capacity = capacity;
			}
			serve::run(config).await
		}
	}
}

/// Flips `shutdown` to `true` on SIGINT/SIGTERM (Ctrl+C on Windows).
pub(crate) async fn forward_signals(shutdown: watch::Sender<bool>) {
	match wait_for_signal().await {
		Ok(signal) => {
			info!(target = "fleet.cli", signal, "received signal, shutting down");
			let _ = shutdown.send(true);
		}
		Err(err) => warn!(target = "fleet.cli", error = %err, "signal handling unavailable"),
	}
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
	use anyhow::Context;
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	tokio::select! {
		_ = sigterm.recv() => Ok("SIGTERM"),
		_ = sigint.recv() => Ok("SIGINT"),
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
	use anyhow::Context;

	tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
	Ok("Ctrl+C")
}

/// Writes `value` as one NDJSON line on stdout.
pub(crate) fn emit<T: Serialize>(value: &T) {
	match serde_json::to_string(value) {
		Ok(line) => println!("{line}"),
		Err(err) => warn!(target = "fleet.cli", error = %err, "failed to encode output line"),
	}
}
