//! Read models for worker and session state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse state of a worker process, as seen by health transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
	/// Constructed, not yet consuming.
	#[default]
	Idle,
	/// Blocked on the broker waiting for a job.
	Waiting,
	/// Dispatching a job.
	Busy,
	/// Backing off after a broker failure.
	Error,
	/// Stopped consuming; engines released.
	Shutdown,
}

impl WorkerState {
	/// A process is reported unhealthy while in `Error` or `Shutdown`.
	pub fn is_healthy(self) -> bool {
		!matches!(self, WorkerState::Error | WorkerState::Shutdown)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			WorkerState::Idle => "IDLE",
			WorkerState::Waiting => "WAITING",
			WorkerState::Busy => "BUSY",
			WorkerState::Error => "ERROR",
			WorkerState::Shutdown => "SHUTDOWN",
		}
	}
}

impl fmt::Display for WorkerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Diagnostic view of one tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
	pub session: String,
	/// Commands waiting in the queue (approximate).
	pub queue_len: usize,
	/// No command queued and none executing.
	pub idle: bool,
}
