//! Worker-local, session-keyed engine pool.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_protocol::Job;
use fleet_runtime::{Action, ActionCall, Engine, EngineLifecycle, Error, Result};
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::JobHandler;

/// A [`JobHandler`] owning one engine per job session.
///
/// Separate from any [`SessionQueueRuntime`](fleet_runtime::SessionQueueRuntime)
/// in the same process: the two never share engines even for equal keys.
pub struct EnginePool<E: Engine> {
	domain: String,
	config: E::Config,
	sessions: parking_lot::Mutex<HashMap<String, Arc<EngineLifecycle<E>>>>,
	creation: Mutex<()>,
}

impl<E: Engine> EnginePool<E> {
	/// `domain` only labels log events, e.g. `"browser"`.
	pub fn new(domain: impl Into<String>, config: E::Config) -> Self {
		Self {
			domain: domain.into(),
			config,
			sessions: parking_lot::Mutex::new(HashMap::new()),
			creation: Mutex::new(()),
		}
	}

	pub fn sessions(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.sessions.lock().keys().cloned().collect();
		keys.sort();
		keys
	}

	pub fn lifecycle(&self, session: &str) -> Option<Arc<EngineLifecycle<E>>> {
		self.sessions.lock().get(session).cloned()
	}

	/// Stops and forgets `session`'s engine. Returns `false` if none was held.
	pub async fn close(&self, session: &str) -> bool {
		let Some(lifecycle) = self.sessions.lock().remove(session) else {
			return false;
		};
		if let Err(err) = lifecycle.stop(true).await {
			warn!(target = "fleet.pool", domain = %self.domain, session, error = %err, "error stopping engine");
		}
		info!(target = "fleet.pool", domain = %self.domain, session, "session closed");
		true
	}

	async fn engine_for(&self, session: &str) -> Result<Arc<EngineLifecycle<E>>> {
		if let Some(lifecycle) = self.lifecycle(session) {
			return Ok(lifecycle);
		}

		let _guard = self.creation.lock().await;
		if let Some(lifecycle) = self.lifecycle(session) {
			return Ok(lifecycle);
		}
		let lifecycle = Arc::new(EngineLifecycle::<E>::new(self.config.clone()));
		lifecycle.start().await?;
		self.sessions
			.lock()
			.insert(session.to_string(), Arc::clone(&lifecycle));
		info!(target = "fleet.pool", domain = %self.domain, session, "session created");
		Ok(lifecycle)
	}

	async fn run(&self, session: &str, job: &Job, action: &str) -> Result<Value> {
		let call = ActionCall::new(job.args.clone(), job.kwargs.clone());
		let action = E::Action::bind(action, call)?;
		let lifecycle = self.engine_for(session).await?;
		lifecycle.execute(action).await
	}
}

#[async_trait]
impl<E: Engine> JobHandler for EnginePool<E> {
	async fn handle(&self, job: &Job, action: &str) -> Result<Value> {
		let session = job.session_key();
		let outcome = AssertUnwindSafe(self.run(&session, job, action))
			.catch_unwind()
			.await
			.unwrap_or_else(|_| {
				Err(Error::Panicked {
					action: action.to_string(),
				})
			});

		if job.closes_session() {
			debug!(target = "fleet.pool", domain = %self.domain, session = %session, "close_session requested");
			self.close(&session).await;
		}
		outcome
	}

	async fn shutdown(&self) {
		let drained: Vec<(String, Arc<EngineLifecycle<E>>)> = self.sessions.lock().drain().collect();
		let count = drained.len();
		join_all(drained.into_iter().map(|(session, lifecycle)| async move {
			if let Err(err) = lifecycle.stop(true).await {
				warn!(target = "fleet.pool", session = %session, error = %err, "error stopping engine at shutdown");
			}
		}))
		.await;
		info!(target = "fleet.pool", domain = %self.domain, engines = count, "engine pool shut down");
	}

	fn session_count(&self) -> usize {
		self.sessions.lock().len()
	}
}
