//! The automation engine contract.
//!
//! An engine is an opaque, long-lived handle (a browser, a game-protocol
//! connection) owned exclusively by one session. Concrete actions are a closed
//! set declared per engine type with [`engine_actions!`](crate::engine_actions).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::action::Action;

/// Failures reported by engine implementations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("launch failed: {0}")]
	Launch(String),

	#[error("engine is not running")]
	NotRunning,

	#[error("liveness probe failed: {0}")]
	Probe(String),

	#[error("{0}")]
	Action(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// A long-lived automation handle.
///
/// `build` must not perform I/O; the lifecycle calls it again with the same
/// config whenever it relaunches a dead engine.
#[async_trait]
pub trait Engine: Send + Sized + 'static {
	/// Launch configuration, reused verbatim on every relaunch.
	type Config: Clone + Send + Sync + 'static;
	/// The actions this engine understands.
	type Action: Action;

	fn build(config: &Self::Config) -> Self;

	async fn start(&mut self) -> Result<(), EngineError>;

	async fn stop(&mut self, graceful: bool) -> Result<(), EngineError>;

	fn is_running(&self) -> bool;

	fn describe(&self) -> String;

	/// Cheap liveness check run before every action.
	async fn probe(&mut self) -> Result<(), EngineError> {
		if self.is_running() {
			Ok(())
		} else {
			Err(EngineError::NotRunning)
		}
	}

	/// Last known context worth restoring after a relaunch (e.g. current URL).
	fn checkpoint(&self) -> Option<String> {
		None
	}

	/// Best-effort restore of a checkpoint on a freshly started engine.
	async fn restore(&mut self, _checkpoint: &str) -> Result<(), EngineError> {
		Ok(())
	}

	async fn execute(&mut self, action: Self::Action) -> Result<Value, EngineError>;
}
