//! File configuration for the `fleet` binary.
//!
//! A single optional JSON file; CLI flags override whatever it sets.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use fleet::RouterOptions;
use fleet_runtime::RuntimeOptions;
use serde::{Deserialize, Serialize};

use crate::cli::WorkerArgs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfig {
	pub stream: String,
	pub group: String,
	pub consumer: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub job_type_prefix: Option<String>,
	pub queue_capacity: usize,
	pub block_ms: u64,
	pub error_backoff_ms: u64,
	/// Pending jobs idle this long go to the next consumer. Unset disables redelivery.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redeliver_after_ms: Option<u64>,
	pub metrics_interval_ms: u64,
	pub http: HttpConfig,
}

impl Default for FleetConfig {
	fn default() -> Self {
		Self {
			stream: "fleet:jobs".to_string(),
			group: "workers".to_string(),
			consumer: "worker-1".to_string(),
			job_type_prefix: None,
			queue_capacity: RuntimeOptions::default().queue_capacity,
			block_ms: 5_000,
			error_backoff_ms: 1_000,
			redeliver_after_ms: None,
			metrics_interval_ms: 30_000,
			http: HttpConfig::default(),
		}
	}
}

/// Settings for the HTTP page engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
	pub user_agent: String,
	pub timeout_ms: u64,
	/// Loaded on every engine start.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start_url: Option<String>,
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			user_agent: concat!("fleet/", env!("CARGO_PKG_VERSION")).to_string(),
			timeout_ms: 30_000,
			start_url: None,
		}
	}
}

impl FleetConfig {
	/// `~/.config/fleet/config.json` on Linux, the platform equivalent elsewhere.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("fleet").join("config.json"))
	}

	/// Loads `explicit`, which must exist, or else the default path if present.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		match explicit {
			Some(path) => Self::read(path),
			None => match Self::default_path() {
				Some(path) if path.is_file() => Self::read(&path),
				_ => Ok(Self::default()),
			},
		}
	}

	fn read(path: &Path) -> Result<Self> {
		let content =
			fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
		serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
	}

	pub fn apply_worker_args(&mut self, args: &WorkerArgs) {
		if let Some(stream) = &args.stream {
			self.stream = stream.clone();
		}
		if let Some(group) = &args.group {
			self.group = group.clone();
		}
		if let Some(consumer) = &args.consumer {
			self.consumer = consumer.clone();
		}
		if let Some(prefix) = &args.prefix {
			self.job_type_prefix = Some(prefix.clone());
		}
		if let Some(interval) = args.metrics_interval_ms {
			self.metrics_interval_ms = interval;
		}
	}

	pub fn router_options(&self) -> RouterOptions {
		RouterOptions {
			group: self.group.clone(),
			consumer: self.consumer.clone(),
			job_type_prefix: self.job_type_prefix.clone(),
			error_backoff: Duration::from_millis(self.error_backoff_ms),
		}
	}

	pub fn runtime_options(&self) -> RuntimeOptions {
		RuntimeOptions {
			queue_capacity: self.queue_capacity,
		}
	}
}

#[cfg(test)]
mod tests;
