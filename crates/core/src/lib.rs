//! Broker-driven job routing for fleet workers.
//!
//! - [`Broker`] / [`StreamIntrospect`]: the consumer-group broker contract and
//!   the stream introspection primitives metrics are computed from
//! - [`MemoryBroker`]: process-local consumer-group broker implementing both
//! - [`JobRouter`]: consume loop dispatching jobs by type prefix to handlers
//! - [`EnginePool`]: the per-domain handler owning session-keyed engines
//! - [`QueueDepthEstimator`]: backlog and health snapshots for ops tooling

pub mod broker;
pub mod metrics;
pub mod router;

pub use broker::memory::MemoryBroker;
pub use broker::{
	Broker, BrokerError, Delivery, GroupInfo, PendingEntry, PendingSummary, StreamId, StreamInfo,
	StreamIntrospect,
};
pub use metrics::{QueueDepthEstimator, classify_health, estimate_new_messages};
pub use router::pool::EnginePool;
pub use router::{DispatchError, JobHandler, JobRouter, RouterOptions};
