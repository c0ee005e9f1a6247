//! Worker health state machine.
//!
//! A plain read model: the job router writes transitions, health and metrics
//! transports read [`WorkerHealth::state`].

use fleet_protocol::WorkerState;
use parking_lot::Mutex;
use tracing::debug;

/// Callback fired with `(previous, next)` on every state change.
pub type TransitionHook = Box<dyn Fn(WorkerState, WorkerState) + Send + Sync>;

pub struct WorkerHealth {
	state: Mutex<WorkerState>,
	on_transition: Option<TransitionHook>,
}

impl Default for WorkerHealth {
	fn default() -> Self {
		Self::new()
	}
}

impl WorkerHealth {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(WorkerState::Idle),
			on_transition: None,
		}
	}

	pub fn with_transition_hook(hook: impl Fn(WorkerState, WorkerState) + Send + Sync + 'static) -> Self {
		Self {
			state: Mutex::new(WorkerState::Idle),
			on_transition: Some(Box::new(hook)),
		}
	}

	pub fn state(&self) -> WorkerState {
		*self.state.lock()
	}

	pub fn is_healthy(&self) -> bool {
		self.state().is_healthy()
	}

	/// Moves to `next`; returns `false` (and fires nothing) if already there.
	pub fn set_state(&self, next: WorkerState) -> bool {
		let previous = {
			let mut state = self.state.lock();
			if *state == next {
				return false;
			}
			std::mem::replace(&mut *state, next)
		};
		debug!(target = "fleet.health", from = %previous, to = %next, "worker state changed");
		if let Some(hook) = &self.on_transition {
			hook(previous, next);
		}
		true
	}
}
