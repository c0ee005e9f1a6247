//! Queue backlog snapshots.
//!
//! Snapshots are recomputed on demand, never persisted and always advisory.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backlog health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	#[default]
	Healthy,
	Degraded,
	Unhealthy,
}

impl HealthStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			HealthStatus::Healthy => "healthy",
			HealthStatus::Degraded => "degraded",
			HealthStatus::Unhealthy => "unhealthy",
		}
	}
}

impl fmt::Display for HealthStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Point-in-time view of one consumer group's backlog on one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
	pub stream: String,
	pub group: String,
	/// Delivered but not yet acknowledged.
	pub pending_count: u64,
	/// Not yet delivered to the group. Approximate, see the estimator.
	pub new_estimate: u64,
	/// `pending_count + new_estimate`.
	pub true_depth: u64,
	pub oldest_pending_ms: u64,
	pub active_consumers: u64,
	pub health_status: HealthStatus,
	pub stream_length: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_delivered_id: Option<String>,
	pub collected_at_ms: u64,
	/// Set when collection failed and the snapshot is a zero-depth fallback.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl QueueMetricsSnapshot {
	/// Zero-depth snapshot recording why collection failed.
	pub fn fallback(stream: &str, group: &str, error: impl Into<String>) -> Self {
		Self {
			stream: stream.to_string(),
			group: group.to_string(),
			pending_count: 0,
			new_estimate: 0,
			true_depth: 0,
			oldest_pending_ms: 0,
			active_consumers: 0,
			health_status: HealthStatus::Healthy,
			stream_length: 0,
			last_delivered_id: None,
			collected_at_ms: now_ms(),
			error: Some(error.into()),
		}
	}

	pub fn is_fallback(&self) -> bool {
		self.error.is_some()
	}
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}
