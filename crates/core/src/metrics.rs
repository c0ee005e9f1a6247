//! Queue depth and health estimation.
//!
//! Turns consumer-group introspection into a [`QueueMetricsSnapshot`]:
//!
//! - `pending_count`: size of the group's pending-entries list
//! - `new_estimate`: entries not yet delivered to the group. Exact when the
//!   group is missing, has delivered nothing, or has delivered the stream's
//!   tail; otherwise approximated as `min(length - pending, length / 2)`, since
//!   counting entries between two ids is not assumed cheap. The estimate is
//!   therefore bounded by half the stream length whenever it is ambiguous.
//! - `true_depth = pending_count + new_estimate`
//!
//! Collection never fails: broker errors degrade to a zero-depth snapshot with
//! the error recorded.

use std::sync::Arc;

use fleet_protocol::{HealthStatus, QueueMetricsSnapshot, now_ms};
use tracing::{debug, warn};

use crate::broker::{BrokerError, StreamId, StreamIntrospect};

/// Oldest pending entry idle longer than this: unhealthy.
pub const UNHEALTHY_AGE_MS: u64 = 60_000;
/// Oldest pending entry idle longer than this: degraded.
pub const DEGRADED_AGE_MS: u64 = 30_000;
/// More pending entries per active consumer than this: degraded.
pub const DEGRADED_PER_CONSUMER: f64 = 10.0;

/// Read-only backlog estimator over a [`StreamIntrospect`] source.
#[derive(Clone)]
pub struct QueueDepthEstimator {
	source: Arc<dyn StreamIntrospect>,
}

impl QueueDepthEstimator {
	pub fn new(source: Arc<dyn StreamIntrospect>) -> Self {
		Self { source }
	}

	/// `pending + new` for `group` on `stream`; 0 when collection fails.
	pub async fn true_queue_depth(&self, stream: &str, group: &str) -> u64 {
		self.comprehensive_metrics(stream, group).await.true_depth
	}

	pub async fn comprehensive_metrics(&self, stream: &str, group: &str) -> QueueMetricsSnapshot {
		match self.collect(stream, group).await {
			Ok(snapshot) => {
				debug!(
					target = "fleet.metrics",
					stream,
					group,
					depth = snapshot.true_depth,
					health = %snapshot.health_status,
					"queue metrics collected"
				);
				snapshot
			}
			Err(err) => {
				warn!(target = "fleet.metrics", stream, group, error = %err, "queue metrics unavailable");
				QueueMetricsSnapshot::fallback(stream, group, err.to_string())
			}
		}
	}

	async fn collect(&self, stream: &str, group: &str) -> Result<QueueMetricsSnapshot, BrokerError> {
		let length = self.source.stream_len(stream).await?;
		let last_entry = self.source.stream_info(stream).await?.and_then(|info| info.last_entry_id);

		let Some(info) = self.source.group_info(stream, group).await? else {
			return Ok(snapshot(stream, group, length, 0, length, 0, 0, None));
		};

		let pending = self.source.pending_summary(stream, group).await?.count;
		let oldest_pending_ms = if pending > 0 {
			self.source
				.pending_range(stream, group, 1)
				.await?
				.first()
				.map_or(0, |entry| entry.idle_ms)
		} else {
			0
		};
		let new_estimate = estimate_new_messages(length, pending, info.last_delivered_id, last_entry);

		Ok(snapshot(
			stream,
			group,
			length,
			pending,
			new_estimate,
			oldest_pending_ms,
			info.consumers,
			Some(info.last_delivered_id),
		))
	}
}

#[allow(clippy::too_many_arguments)]
fn snapshot(
	stream: &str,
	group: &str,
	length: u64,
	pending: u64,
	new_estimate: u64,
	oldest_pending_ms: u64,
	consumers: u64,
	last_delivered: Option<StreamId>,
) -> QueueMetricsSnapshot {
	QueueMetricsSnapshot {
		stream: stream.to_string(),
		group: group.to_string(),
		pending_count: pending,
		new_estimate,
		true_depth: pending + new_estimate,
		oldest_pending_ms,
		active_consumers: consumers,
		health_status: classify_health(pending, oldest_pending_ms, consumers),
		stream_length: length,
		last_delivered_id: last_delivered.map(|id| id.to_string()),
		collected_at_ms: now_ms(),
		error: None,
	}
}

/// Entries not yet delivered to a group whose cursor is `last_delivered`.
pub fn estimate_new_messages(
	length: u64,
	pending: u64,
	last_delivered: StreamId,
	last_entry: Option<StreamId>,
) -> u64 {
	if last_delivered.is_zero() {
		return length;
	}
	if last_entry == Some(last_delivered) {
		return 0;
	}
	length.saturating_sub(pending).min(length / 2)
}

pub fn classify_health(pending: u64, oldest_pending_ms: u64, consumers: u64) -> HealthStatus {
	if pending == 0 {
		return HealthStatus::Healthy;
	}
	if oldest_pending_ms > UNHEALTHY_AGE_MS {
		return HealthStatus::Unhealthy;
	}
	if oldest_pending_ms > DEGRADED_AGE_MS {
		return HealthStatus::Degraded;
	}
	if consumers > 0 && pending as f64 / consumers as f64 > DEGRADED_PER_CONSUMER {
		return HealthStatus::Degraded;
	}
	HealthStatus::Healthy
}
