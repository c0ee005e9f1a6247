//! Process-local consumer-group broker.
//!
//! Groups created by [`Broker::ensure_group`] start at `0-0`, so a backlog
//! published before the first worker attaches is delivered too. Once every
//! group has delivered and acknowledged an entry, acking trims it from the
//! stream; a group created after that never sees it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use fleet_protocol::{Job, JobReply, now_ms};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{
	Broker, BrokerError, Delivery, GroupInfo, PendingEntry, PendingSummary, StreamId, StreamInfo,
	StreamIntrospect,
};

const DEFAULT_BLOCK: Duration = Duration::from_secs(5);

#[derive(Default)]
struct StreamState {
	entries: BTreeMap<StreamId, Job>,
	last_id: StreamId,
	groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
	last_delivered: StreamId,
	pending: BTreeMap<StreamId, PendingState>,
	consumers: HashSet<String>,
}

impl StreamState {
	/// Drops entries every group has delivered and acknowledged.
	fn trim_acknowledged(&mut self) -> usize {
		let Some(floor) = self.groups.values().map(GroupState::oldest_needed).min() else {
			return 0;
		};
		let before = self.entries.len();
		self.entries = self.entries.split_off(&floor);
		before - self.entries.len()
	}
}

impl GroupState {
	/// Lowest id this group may still read: its oldest pending entry, or the
	/// first id after its cursor.
	fn oldest_needed(&self) -> StreamId {
		match self.pending.keys().next() {
			Some(id) => *id,
			None => StreamId::new(self.last_delivered.ms, self.last_delivered.seq.saturating_add(1)),
		}
	}
}

struct PendingState {
	consumer: String,
	delivered_at: Instant,
	deliveries: u64,
}

/// In-memory broker serving one default stream to consumers.
pub struct MemoryBroker {
	stream: String,
	block: Duration,
	redeliver_after: Option<Duration>,
	streams: Mutex<HashMap<String, StreamState>>,
	notify: Notify,
	replies: Option<mpsc::UnboundedSender<JobReply>>,
}

impl MemoryBroker {
	pub fn new(stream: impl Into<String>) -> Self {
		Self {
			stream: stream.into(),
			block: DEFAULT_BLOCK,
			redeliver_after: None,
			streams: Mutex::new(HashMap::new()),
			notify: Notify::new(),
			replies: None,
		}
	}

	/// How long `consume` waits before failing with [`BrokerError::Timeout`].
	pub fn with_block(mut self, block: Duration) -> Self {
		self.block = block;
		self
	}

	/// Hands pending entries idle for at least `after` to the next consumer.
	pub fn with_redelivery(mut self, after: Duration) -> Self {
		self.redeliver_after = Some(after);
		self
	}

	/// Forwards every reply to `sink`.
	pub fn with_reply_sink(mut self, sink: mpsc::UnboundedSender<JobReply>) -> Self {
		self.replies = Some(sink);
		self
	}

	pub fn stream(&self) -> &str {
		&self.stream
	}

	/// Appends `job` to the default stream.
	pub fn publish(&self, job: Job) -> StreamId {
		let stream = self.stream.clone();
		self.publish_to(&stream, job)
	}

	/// Appends `job` to `stream`, creating the stream if needed.
	pub fn publish_to(&self, stream: &str, job: Job) -> StreamId {
		let id = {
			let mut streams = self.streams.lock();
			let state = streams.entry(stream.to_string()).or_default();
			let ms = now_ms();
			let id = if ms > state.last_id.ms {
				StreamId::new(ms, 0)
			} else {
				StreamId::new(state.last_id.ms, state.last_id.seq + 1)
			};
			trace!(target = "fleet.broker", stream, %id, job_type = %job.job_type, "published");
			state.entries.insert(id, job);
			state.last_id = id;
			id
		};
		self.notify.notify_waiters();
		id
	}

	/// No undelivered entries and nothing pending for `group` on the default stream.
	pub fn is_drained(&self, group: &str) -> bool {
		let streams = self.streams.lock();
		let Some(state) = streams.get(&self.stream) else {
			return true;
		};
		match state.groups.get(group) {
			Some(group) => group.pending.is_empty() && group.last_delivered >= state.last_id,
			None => state.entries.is_empty(),
		}
	}

	fn try_deliver(&self, group: &str, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
		let mut streams = self.streams.lock();
		let no_group = || BrokerError::NoGroup {
			stream: self.stream.clone(),
			group: group.to_string(),
		};
		let state = streams.get_mut(&self.stream).ok_or_else(no_group)?;
		let group_state = state.groups.get_mut(group).ok_or_else(no_group)?;
		group_state.consumers.insert(consumer.to_string());
		let now = Instant::now();

		if let Some(after) = self.redeliver_after {
			let stale = group_state
				.pending
				.iter_mut()
				.find(|(_, entry)| now.duration_since(entry.delivered_at) >= after);
			if let Some((&id, entry)) = stale {
				if let Some(job) = state.entries.get(&id) {
					debug!(
						target = "fleet.broker",
						%id,
						from = %entry.consumer,
						to = consumer,
						"redelivering idle pending entry"
					);
					entry.consumer = consumer.to_string();
					entry.delivered_at = now;
					entry.deliveries += 1;
					return Ok(Some(Delivery {
						id,
						job: job.clone(),
						deliveries: entry.deliveries,
					}));
				}
			}
		}

		let next = state
			.entries
			.range((Bound::Excluded(group_state.last_delivered), Bound::Unbounded))
			.next();
		let Some((&id, job)) = next else {
			return Ok(None);
		};
		group_state.last_delivered = id;
		group_state.pending.insert(
			id,
			PendingState {
				consumer: consumer.to_string(),
				delivered_at: now,
				deliveries: 1,
			},
		);
		Ok(Some(Delivery {
			id,
			job: job.clone(),
			deliveries: 1,
		}))
	}
}

#[async_trait]
impl Broker for MemoryBroker {
	async fn ensure_group(&self, group: &str) -> Result<(), BrokerError> {
		let mut streams = self.streams.lock();
		let state = streams.entry(self.stream.clone()).or_default();
		state.groups.entry(group.to_string()).or_default();
		Ok(())
	}

	async fn consume(&self, group: &str, consumer: &str) -> Result<Delivery, BrokerError> {
		let deadline = Instant::now() + self.block;
		loop {
			// Register before checking so a publish in between is not missed.
			let notified = self.notify.notified();
			if let Some(delivery) = self.try_deliver(group, consumer)? {
				return Ok(delivery);
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return Err(BrokerError::Timeout);
			}
		}
	}

	async fn ack(&self, group: &str, id: StreamId) -> Result<bool, BrokerError> {
		let mut streams = self.streams.lock();
		let Some(state) = streams.get_mut(&self.stream) else {
			return Ok(false);
		};
		let acked = state
			.groups
			.get_mut(group)
			.is_some_and(|group| group.pending.remove(&id).is_some());
		if acked {
			let trimmed = state.trim_acknowledged();
			if trimmed > 0 {
				trace!(target = "fleet.broker", %id, trimmed, "trimmed acknowledged entries");
			}
		}
		Ok(acked)
	}

	async fn reply(&self, reply: JobReply) -> Result<(), BrokerError> {
		match &self.replies {
			Some(sink) => sink
				.send(reply)
				.map_err(|_| BrokerError::Unavailable("reply sink closed".into())),
			None => {
				debug!(target = "fleet.broker", job_id = %reply.job_id, "no reply sink; dropping reply");
				Ok(())
			}
		}
	}
}

#[async_trait]
impl StreamIntrospect for MemoryBroker {
	async fn stream_len(&self, stream: &str) -> Result<u64, BrokerError> {
		Ok(self
			.streams
			.lock()
			.get(stream)
			.map_or(0, |state| state.entries.len() as u64))
	}

	async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, BrokerError> {
		let streams = self.streams.lock();
		let group_state = streams
			.get(stream)
			.and_then(|state| state.groups.get(group))
			.ok_or_else(|| BrokerError::NoGroup {
				stream: stream.to_string(),
				group: group.to_string(),
			})?;

		let mut per_consumer: BTreeMap<&str, u64> = BTreeMap::new();
		for entry in group_state.pending.values() {
			*per_consumer.entry(entry.consumer.as_str()).or_default() += 1;
		}
		Ok(PendingSummary {
			count: group_state.pending.len() as u64,
			min_id: group_state.pending.keys().next().copied(),
			max_id: group_state.pending.keys().next_back().copied(),
			consumers: per_consumer
				.into_iter()
				.map(|(consumer, count)| (consumer.to_string(), count))
				.collect(),
		})
	}

	async fn pending_range(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>, BrokerError> {
		let streams = self.streams.lock();
		let group_state = streams
			.get(stream)
			.and_then(|state| state.groups.get(group))
			.ok_or_else(|| BrokerError::NoGroup {
				stream: stream.to_string(),
				group: group.to_string(),
			})?;
		let now = Instant::now();
		Ok(group_state
			.pending
			.iter()
			.take(count)
			.map(|(id, entry)| PendingEntry {
				id: *id,
				consumer: entry.consumer.clone(),
				idle_ms: now.duration_since(entry.delivered_at).as_millis() as u64,
				deliveries: entry.deliveries,
			})
			.collect())
	}

	async fn group_info(&self, stream: &str, group: &str) -> Result<Option<GroupInfo>, BrokerError> {
		let streams = self.streams.lock();
		Ok(streams
			.get(stream)
			.and_then(|state| state.groups.get(group))
			.map(|group_state| GroupInfo {
				name: group.to_string(),
				consumers: group_state.consumers.len() as u64,
				pending: group_state.pending.len() as u64,
				last_delivered_id: group_state.last_delivered,
			}))
	}

	async fn stream_info(&self, stream: &str) -> Result<Option<StreamInfo>, BrokerError> {
		let streams = self.streams.lock();
		Ok(streams.get(stream).map(|state| StreamInfo {
			length: state.entries.len() as u64,
			last_entry_id: Some(state.last_id).filter(|id| !id.is_zero()),
		}))
	}
}

#[cfg(test)]
mod tests;
