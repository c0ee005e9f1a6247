//! Self-healing engine lifecycle.
//!
//! [`EngineLifecycle`] wraps one engine instance. Every action goes through
//! [`EngineLifecycle::execute`], which probes the engine first and relaunches
//! it with its original config when the probe fails. The engine slot mutex is
//! also the restart lock: concurrent callers that find the engine dead
//! serialize on it, so only the first relaunches and the rest see the fresh
//! engine pass its probe.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::error::{Error, Result};

/// Lifecycle state of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
	Uninitialized,
	Starting,
	Running,
	/// The engine failed a probe or a launch and is absent until relaunched.
	Degraded,
	/// Terminal.
	Closed,
}

impl EngineState {
	pub fn as_str(self) -> &'static str {
		match self {
			EngineState::Uninitialized => "uninitialized",
			EngineState::Starting => "starting",
			EngineState::Running => "running",
			EngineState::Degraded => "degraded",
			EngineState::Closed => "closed",
		}
	}
}

impl fmt::Display for EngineState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

struct Slot<E> {
	engine: Option<E>,
	checkpoint: Option<String>,
}

/// One exclusively owned engine with idempotent start and self-healing restart.
pub struct EngineLifecycle<E: Engine> {
	config: E::Config,
	state: parking_lot::Mutex<EngineState>,
	slot: Mutex<Slot<E>>,
	restarts: AtomicU64,
}

impl<E: Engine> EngineLifecycle<E> {
	pub fn new(config: E::Config) -> Self {
		Self {
			config,
			state: parking_lot::Mutex::new(EngineState::Uninitialized),
			slot: Mutex::new(Slot {
				engine: None,
				checkpoint: None,
			}),
			restarts: AtomicU64::new(0),
		}
	}

	pub fn state(&self) -> EngineState {
		*self.state.lock()
	}

	pub fn is_running(&self) -> bool {
		self.state() == EngineState::Running
	}

	/// Number of successful relaunches after a failed probe or launch.
	pub fn restarts(&self) -> u64 {
		self.restarts.load(Ordering::SeqCst)
	}

	/// Last checkpoint recorded after a successful action.
	pub async fn checkpoint(&self) -> Option<String> {
		self.slot.lock().await.checkpoint.clone()
	}

	/// Launches the engine unless it is already running.
	///
	/// # Errors
	///
	/// [`Error::EngineClosed`] after [`stop`](Self::stop), or
	/// [`Error::EngineUnavailable`] when the launch fails.
	pub async fn start(&self) -> Result<()> {
		let mut slot = self.slot.lock().await;
		match self.state() {
			EngineState::Closed => return Err(Error::EngineClosed),
			EngineState::Running if slot.engine.is_some() => return Ok(()),
			_ => {}
		}
		self.launch(&mut slot).await
	}

	/// Probes the engine and relaunches it when the probe fails or it is absent.
	pub async fn ensure_ready(&self) -> Result<()> {
		let mut slot = self.slot.lock().await;
		self.ensure_ready_locked(&mut slot).await
	}

	/// Runs `action` on a ready engine, recording its checkpoint afterwards.
	pub async fn execute(&self, action: E::Action) -> Result<serde_json::Value> {
		let mut slot = self.slot.lock().await;
		self.ensure_ready_locked(&mut slot).await?;

		let engine = slot.engine.as_mut().ok_or(Error::EngineClosed)?;
		let outcome = engine.execute(action).await;
		let checkpoint = engine.checkpoint();
		if checkpoint.is_some() {
			slot.checkpoint = checkpoint;
		}
		outcome.map_err(Error::from)
	}

	/// Stops the engine; the lifecycle is closed afterwards even if stopping fails.
	pub async fn stop(&self, graceful: bool) -> Result<()> {
		let mut slot = self.slot.lock().await;
		if self.set_state(EngineState::Closed) == EngineState::Closed {
			return Ok(());
		}
		let Some(mut engine) = slot.engine.take() else {
			return Ok(());
		};
		let description = engine.describe();
		engine.stop(graceful).await?;
		debug!(target = "fleet.lifecycle", engine = %description, graceful, "engine stopped");
		Ok(())
	}

	async fn ensure_ready_locked(&self, slot: &mut Slot<E>) -> Result<()> {
		match self.state() {
			EngineState::Closed => return Err(Error::EngineClosed),
			EngineState::Uninitialized => return self.launch(slot).await,
			_ => {}
		}

		if let Some(engine) = slot.engine.as_mut() {
			match engine.probe().await {
				Ok(()) => return Ok(()),
				Err(err) => {
					warn!(
						target = "fleet.lifecycle",
						engine = %engine.describe(),
						error = %err,
						"liveness probe failed; restarting engine"
					);
				}
			}
		}

		self.restart(slot).await
	}

	async fn restart(&self, slot: &mut Slot<E>) -> Result<()> {
		self.set_state(EngineState::Degraded);

		// Sub-resources of a dead engine are in an unknown state.
		if let Some(mut stale) = slot.engine.take() {
			if let Err(err) = stale.stop(false).await {
				debug!(target = "fleet.lifecycle", error = %err, "ignoring error closing stale engine");
			}
		}

		self.launch(slot).await?;
		self.restarts.fetch_add(1, Ordering::SeqCst);

		if let (Some(checkpoint), Some(engine)) = (slot.checkpoint.clone(), slot.engine.as_mut()) {
			match engine.restore(&checkpoint).await {
				Ok(()) => debug!(target = "fleet.lifecycle", %checkpoint, "restored context after restart"),
				Err(err) => warn!(
					target = "fleet.lifecycle",
					%checkpoint,
					error = %err,
					"could not restore context after restart"
				),
			}
		}
		Ok(())
	}

	async fn launch(&self, slot: &mut Slot<E>) -> Result<()> {
		let previous = self.set_state(EngineState::Starting);
		let mut engine = E::build(&self.config);
		match engine.start().await {
			Ok(()) => {
				info!(
					target = "fleet.lifecycle",
					engine = %engine.describe(),
					from = %previous,
					"engine running"
				);
				slot.engine = Some(engine);
				self.set_state(EngineState::Running);
				Ok(())
			}
			Err(err) => {
				warn!(target = "fleet.lifecycle", error = %err, "engine launch failed");
				slot.engine = None;
				self.set_state(EngineState::Degraded);
				Err(unavailable(err))
			}
		}
	}

	/// Sets the state and returns the previous one. `Closed` is never left.
	fn set_state(&self, next: EngineState) -> EngineState {
		let mut state = self.state.lock();
		let previous = *state;
		if previous != EngineState::Closed {
			*state = next;
		}
		previous
	}
}

fn unavailable(err: EngineError) -> Error {
	Error::EngineUnavailable(err)
}
