//! Broker contracts.
//!
//! [`Broker`] is what a worker consumes from; [`StreamIntrospect`] is the set of
//! read-only primitives backlog metrics are derived from. Both model a
//! log-structured stream with consumer groups: each group keeps a
//! last-delivered cursor and a pending-entries list of delivered but
//! unacknowledged entries.

pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use fleet_protocol::{Job, JobReply};
use thiserror::Error;

/// Errors raised by brokers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
	/// Nothing arrived within the block window. Not a failure.
	#[error("no job available within the block window")]
	Timeout,

	#[error("broker unavailable: {0}")]
	Unavailable(String),

	#[error("consumer group '{group}' does not exist on stream '{stream}'")]
	NoGroup { stream: String, group: String },

	#[error("invalid stream id '{0}'")]
	InvalidId(String),
}

impl BrokerError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, BrokerError::Timeout)
	}
}

/// Stream entry id, `<ms>-<seq>`, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
	pub ms: u64,
	pub seq: u64,
}

impl StreamId {
	/// `0-0`: a group cursor that has delivered nothing.
	pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

	pub fn new(ms: u64, seq: u64) -> Self {
		Self { ms, seq }
	}

	pub fn is_zero(self) -> bool {
		self == Self::ZERO
	}
}

impl fmt::Display for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}", self.ms, self.seq)
	}
}

impl FromStr for StreamId {
	type Err = BrokerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || BrokerError::InvalidId(s.to_string());
		let (ms, seq) = match s.split_once('-') {
			Some((ms, seq)) => (ms, seq),
			None => (s, "0"),
		};
		Ok(Self {
			ms: ms.parse().map_err(|_| invalid())?,
			seq: seq.parse().map_err(|_| invalid())?,
		})
	}
}

/// A job handed to one consumer of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
	pub id: StreamId,
	pub job: Job,
	/// 1 on first delivery, incremented on each redelivery.
	pub deliveries: u64,
}

/// Pending-entries list summary for a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
	pub count: u64,
	pub min_id: Option<StreamId>,
	pub max_id: Option<StreamId>,
	/// `(consumer, pending count)` pairs.
	pub consumers: Vec<(String, u64)>,
}

/// One pending entry as returned by a pending-range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
	pub id: StreamId,
	pub consumer: String,
	pub idle_ms: u64,
	pub deliveries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
	pub name: String,
	pub consumers: u64,
	pub pending: u64,
	pub last_delivered_id: StreamId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
	pub length: u64,
	pub last_entry_id: Option<StreamId>,
}

/// The consuming side of a consumer-group broker.
#[async_trait]
pub trait Broker: Send + Sync {
	/// Creates the group (and stream) if missing.
	async fn ensure_group(&self, group: &str) -> Result<(), BrokerError>;

	/// Waits up to the broker's block window for the next job for `consumer`.
	///
	/// # Errors
	///
	/// [`BrokerError::Timeout`] when nothing is available in time.
	async fn consume(&self, group: &str, consumer: &str) -> Result<Delivery, BrokerError>;

	/// Acknowledges a delivery; returns `false` if it was not pending.
	async fn ack(&self, group: &str, id: StreamId) -> Result<bool, BrokerError>;

	/// Publishes a job's result to its `reply_to` target.
	async fn reply(&self, reply: JobReply) -> Result<(), BrokerError>;
}

/// Read-only stream and consumer-group primitives.
#[async_trait]
pub trait StreamIntrospect: Send + Sync {
	async fn stream_len(&self, stream: &str) -> Result<u64, BrokerError>;

	async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, BrokerError>;

	/// Up to `count` pending entries, oldest id first.
	async fn pending_range(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, BrokerError>;

	/// `None` when the stream or group does not exist.
	async fn group_info(&self, stream: &str, group: &str) -> Result<Option<GroupInfo>, BrokerError>;

	/// `None` when the stream does not exist.
	async fn stream_info(&self, stream: &str) -> Result<Option<StreamInfo>, BrokerError>;
}
