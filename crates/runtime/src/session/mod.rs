//! Per-session command queues.
//!
//! Each session key owns exactly one [`EngineLifecycle`], one bounded FIFO
//! queue and one worker task draining it. Commands within a session run in
//! enqueue order; sessions are independent of each other.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use fleet_protocol::SessionStatus;
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionCall};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::lifecycle::EngineLifecycle;

/// Tuning for a [`SessionQueueRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
	/// Commands a session may hold before `enqueue` fails with `QueueFull`.
	pub queue_capacity: usize,
}

impl Default for RuntimeOptions {
	fn default() -> Self {
		Self { queue_capacity: 64 }
	}
}

struct Command {
	action: String,
	call: ActionCall,
	result: oneshot::Sender<Result<Value>>,
}

struct Session<E: Engine> {
	tx: mpsc::Sender<Command>,
	lifecycle: Arc<EngineLifecycle<E>>,
	busy: Arc<AtomicBool>,
	worker: JoinHandle<()>,
}

/// Resolves to the outcome of one enqueued command.
///
/// Resolves to [`Error::SessionClosed`] if the session is closed before the
/// command settles.
#[derive(Debug)]
pub struct CommandHandle {
	session: String,
	rx: oneshot::Receiver<Result<Value>>,
}

impl CommandHandle {
	pub fn session(&self) -> &str {
		&self.session
	}
}

impl Future for CommandHandle {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SessionClosed(self.session.clone()))),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Session-keyed engines, each behind its own command queue and worker task.
pub struct SessionQueueRuntime<E: Engine> {
	config: E::Config,
	options: RuntimeOptions,
	sessions: parking_lot::Mutex<HashMap<String, Session<E>>>,
	/// Serializes check-and-create so one key never gets two engines.
	creation: Mutex<()>,
}

impl<E: Engine> SessionQueueRuntime<E> {
	pub fn new(config: E::Config, options: RuntimeOptions) -> Self {
		Self {
			config,
			options,
			sessions: parking_lot::Mutex::new(HashMap::new()),
			creation: Mutex::new(()),
		}
	}

	pub fn options(&self) -> RuntimeOptions {
		self.options
	}

	/// Queues `action` on `session`, creating the session on first touch.
	///
	/// Never waits for queue space: a saturated queue fails with
	/// [`Error::QueueFull`]. Creating a session starts its engine, and a launch
	/// failure is returned here as [`Error::EngineUnavailable`].
	pub async fn enqueue(
		&self,
		session: &str,
		action: impl Into<String>,
		args: Vec<Value>,
		kwargs: Map<String, Value>,
	) -> Result<CommandHandle> {
		let tx = match self.sender(session) {
			Some(tx) => tx,
			None => self.open_session(session).await?,
		};

		let (result_tx, result_rx) = oneshot::channel();
		let command = Command {
			action: action.into(),
			call: ActionCall::new(args, kwargs),
			result: result_tx,
		};

		match tx.try_send(command) {
			Ok(()) => Ok(CommandHandle {
				session: session.to_string(),
				rx: result_rx,
			}),
			Err(TrySendError::Full(command)) => {
				warn!(
					target = "fleet.session",
					session,
					action = %command.action,
					capacity = tx.max_capacity(),
					"command queue full"
				);
				Err(Error::QueueFull {
					session: session.to_string(),
					capacity: tx.max_capacity(),
				})
			}
			Err(TrySendError::Closed(_)) => Err(Error::SessionClosed(session.to_string())),
		}
	}

	/// Cancels the session's worker and stops its engine.
	///
	/// Returns `false` when no such session was tracked. Engine stop errors are
	/// logged and swallowed.
	pub async fn close_session(&self, session: &str) -> bool {
		let Some(entry) = self.sessions.lock().remove(session) else {
			return false;
		};
		let Session {
			tx,
			lifecycle,
			worker,
			..
		} = entry;
		drop(tx);

		worker.abort();
		// The aborted worker may hold the engine lock until it is dropped.
		let _ = worker.await;

		if let Err(err) = lifecycle.stop(true).await {
			warn!(target = "fleet.session", session, error = %err, "error stopping engine on close");
		}
		info!(target = "fleet.session", session, "session closed");
		true
	}

	/// Closes every tracked session concurrently.
	pub async fn close_all(&self) {
		let keys: Vec<String> = self.sessions.lock().keys().cloned().collect();
		let closed = join_all(keys.iter().map(|key| self.close_session(key))).await;
		debug!(
			target = "fleet.session",
			closed = closed.into_iter().filter(|c| *c).count(),
			"closed all sessions"
		);
	}

	/// Queue depth and idleness per session, sorted by key. Approximate.
	pub fn status(&self) -> Vec<SessionStatus> {
		let sessions = self.sessions.lock();
		let mut status: Vec<SessionStatus> = sessions
			.iter()
			.map(|(key, session)| {
				let queue_len = session.tx.max_capacity() - session.tx.capacity();
				SessionStatus {
					session: key.clone(),
					queue_len,
					idle: queue_len == 0 && !session.busy.load(Ordering::SeqCst),
				}
			})
			.collect();
		status.sort_by(|a, b| a.session.cmp(&b.session));
		status
	}

	pub fn sessions(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.sessions.lock().keys().cloned().collect();
		keys.sort();
		keys
	}

	/// The lifecycle owned by `session`, if tracked.
	pub fn lifecycle(&self, session: &str) -> Option<Arc<EngineLifecycle<E>>> {
		self.sessions
			.lock()
			.get(session)
			.map(|entry| Arc::clone(&entry.lifecycle))
	}

	fn sender(&self, session: &str) -> Option<mpsc::Sender<Command>> {
		self.sessions.lock().get(session).map(|entry| entry.tx.clone())
	}

	async fn open_session(&self, session: &str) -> Result<mpsc::Sender<Command>> {
		let _guard = self.creation.lock().await;
		if let Some(tx) = self.sender(session) {
			return Ok(tx);
		}

		let lifecycle = Arc::new(EngineLifecycle::<E>::new(self.config.clone()));
		lifecycle.start().await?;

		let (tx, rx) = mpsc::channel(self.options.queue_capacity.max(1));
		let busy = Arc::new(AtomicBool::new(false));
		let worker = tokio::spawn(session_worker(
			session.to_string(),
			Arc::clone(&lifecycle),
			rx,
			Arc::clone(&busy),
		));

		self.sessions.lock().insert(
			session.to_string(),
			Session {
				tx: tx.clone(),
				lifecycle,
				busy,
				worker,
			},
		);
		info!(target = "fleet.session", session, "session created");
		Ok(tx)
	}
}

async fn session_worker<E: Engine>(
	session: String,
	lifecycle: Arc<EngineLifecycle<E>>,
	mut rx: mpsc::Receiver<Command>,
	busy: Arc<AtomicBool>,
) {
	while let Some(Command { action, call, result }) = rx.recv().await {
		busy.store(true, Ordering::SeqCst);

		let outcome = AssertUnwindSafe(run_command(&lifecycle, &action, call))
			.catch_unwind()
			.await
			.unwrap_or_else(|_| Err(Error::Panicked { action: action.clone() }));

		if let Err(err) = &outcome {
			debug!(target = "fleet.session", session = %session, %action, error = %err, "command failed");
		}
		busy.store(false, Ordering::SeqCst);
		if result.send(outcome).is_err() {
			debug!(target = "fleet.session", session = %session, %action, "command caller went away");
		}
	}
	debug!(target = "fleet.session", session = %session, "session worker exiting");
}

async fn run_command<E: Engine>(lifecycle: &EngineLifecycle<E>, action: &str, call: ActionCall) -> Result<Value> {
	let action = E::Action::bind(action, call)?;
	lifecycle.execute(action).await
}

#[cfg(test)]
mod tests;
