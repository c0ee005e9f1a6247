//! `fleet serve`: front-end requests against per-session command queues.
//!
//! Requests are NDJSON on stdin, tagged by `op`:
//!
//! ```text
//! {"op":"enqueue","id":"1","session":"chan-1","action":"goto","kwargs":{"url":"https://example.com"}}
//! {"op":"close","session":"chan-1"}
//! {"op":"status"}
//! ```
//!
//! Every settled command is written to stdout as one NDJSON event.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use fleet_protocol::SessionStatus;
use fleet_runtime::{Engine, SessionQueueRuntime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{info, warn};

use super::{emit, forward_signals};
use crate::config::FleetConfig;
use crate::engines::HttpEngine;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
	Enqueue {
		/// Echoed back on the result so callers can correlate.
		#[serde(default)]
		id: Option<String>,
		session: String,
		action: String,
		#[serde(default)]
		args: Vec<Value>,
		#[serde(default)]
		kwargs: Map<String, Value>,
	},
	Close {
		session: String,
	},
	Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
	/// A command settled.
	Result {
		#[serde(skip_serializing_if = "Option::is_none")]
		id: Option<String>,
		session: String,
		ok: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		result: Option<Value>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
	/// The command never reached a queue.
	Rejected {
		#[serde(skip_serializing_if = "Option::is_none")]
		id: Option<String>,
		session: String,
		error: String,
	},
	Closed {
		session: String,
		existed: bool,
	},
	Status {
		sessions: Vec<SessionStatus>,
	},
}

impl Event {
	fn settled(id: Option<String>, session: String, outcome: fleet_runtime::Result<Value>) -> Self {
		match outcome {
			Ok(result) => Event::Result {
				id,
				session,
				ok: true,
				result: Some(result),
				error: None,
			},
			Err(err) => Event::Result {
				id,
				session,
				ok: false,
				result: None,
				error: Some(err.to_string()),
			},
		}
	}
}

pub async fn run(config: FleetConfig) -> Result<()> {
	let runtime = Arc::new(SessionQueueRuntime::<HttpEngine>::new(
		config.http.clone(),
		config.runtime_options(),
	));
	info!(
		target = "fleet.serve",
		queue_capacity = runtime.options().queue_capacity,
		"serving session requests"
	);
	let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
	tokio::spawn(forward_signals(shutdown_tx));

	let (events_tx, mut events) = mpsc::unbounded_channel();
	let printer = tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			emit(&event);
		}
	});

	let mut intake = Intake::new(Arc::clone(&runtime), events_tx);
	let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

	loop {
		let line = tokio::select! {
			_ = shutdown_rx.changed() => break,
			line = lines.next() => line,
		};
		let line = match line {
			Some(Ok(line)) => line,
			Some(Err(err)) => {
				warn!(target = "fleet.serve", error = %err, "stdin read failed");
				break;
			}
			None => break,
		};
		if line.trim().is_empty() {
			continue;
		}

		match serde_json::from_str::<Request>(&line) {
			Ok(request) => intake.submit(request),
			Err(err) => warn!(target = "fleet.serve", error = %err, "skipping malformed request line"),
		}
	}

	info!(target = "fleet.serve", sessions = runtime.sessions().len(), "closing all sessions");
	intake.shutdown().await;
	let _ = printer.await;
	Ok(())
}

/// Fans requests out to one ordered intake task per session.
///
/// Enqueue and close requests for a session run in arrival order, while a
/// slow engine launch on first touch holds up only its own session.
pub struct Intake<E: Engine> {
	runtime: Arc<SessionQueueRuntime<E>>,
	events: mpsc::UnboundedSender<Event>,
	sessions: HashMap<String, mpsc::UnboundedSender<Request>>,
	/// Completion of the latest intake per key. An intake spawned after a
	/// `close` waits for its predecessor before touching the runtime.
	closing: HashMap<String, oneshot::Receiver<()>>,
	tasks: JoinSet<JoinSet<()>>,
}

impl<E: Engine> Intake<E> {
	pub fn new(runtime: Arc<SessionQueueRuntime<E>>, events: mpsc::UnboundedSender<Event>) -> Self {
		Self {
			runtime,
			events,
			sessions: HashMap::new(),
			closing: HashMap::new(),
			tasks: JoinSet::new(),
		}
	}

	pub fn submit(&mut self, request: Request) {
		self.closing
			.retain(|_, done| matches!(done.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

		let session = match &request {
			Request::Status => {
				let _ = self.events.send(Event::Status {
					sessions: self.runtime.status(),
				});
				return;
			}
			Request::Enqueue { session, .. } | Request::Close { session } => session.clone(),
		};
		let closes = matches!(request, Request::Close { .. });

		let tx = match self.sessions.get(&session) {
			Some(tx) => tx.clone(),
			None => {
				let tx = self.spawn_session(&session);
				self.sessions.insert(session.clone(), tx.clone());
				tx
			}
		};
		if tx.send(request).is_err() {
			warn!(target = "fleet.serve", session = %session, "session intake is gone; dropping request");
		}
		if closes {
			self.sessions.remove(&session);
		}
	}

	fn spawn_session(&mut self, session: &str) -> mpsc::UnboundedSender<Request> {
		let (tx, rx) = mpsc::unbounded_channel();
		let (done_tx, done_rx) = oneshot::channel();
		let previous = self.closing.insert(session.to_string(), done_rx);
		self.tasks.spawn(session_intake(
			Arc::clone(&self.runtime),
			self.events.clone(),
			rx,
			previous,
			done_tx,
		));
		tx
	}

	/// Lets every intake drain, closes all sessions, then waits for the
	/// outstanding results to be reported.
	pub async fn shutdown(mut self) {
		self.sessions.clear();
		let mut outstanding = Vec::new();
		while let Some(joined) = self.tasks.join_next().await {
			match joined {
				Ok(results) => outstanding.push(results),
				Err(err) => warn!(target = "fleet.serve", error = %err, "session intake failed"),
			}
		}
		self.runtime.close_all().await;
		for mut results in outstanding {
			while results.join_next().await.is_some() {}
		}
	}
}

async fn session_intake<E: Engine>(
	runtime: Arc<SessionQueueRuntime<E>>,
	events: mpsc::UnboundedSender<Event>,
	mut requests: mpsc::UnboundedReceiver<Request>,
	previous: Option<oneshot::Receiver<()>>,
	done: oneshot::Sender<()>,
) -> JoinSet<()> {
	if let Some(previous) = previous {
		let _ = previous.await;
	}

	let mut results = JoinSet::new();
	while let Some(request) = requests.recv().await {
		match request {
			Request::Enqueue {
				id,
				session,
				action,
				args,
				kwargs,
			} => match runtime.enqueue(&session, action, args, kwargs).await {
				Ok(handle) => {
					let events = events.clone();
					results.spawn(async move {
						let outcome = handle.await;
						let _ = events.send(Event::settled(id, session, outcome));
					});
				}
				Err(err) => {
					let _ = events.send(Event::Rejected {
						id,
						session,
						error: err.to_string(),
					});
				}
			},
			Request::Close { session } => {
				let existed = runtime.close_session(&session).await;
				let _ = events.send(Event::Closed { session, existed });
			}
			Request::Status => {}
		}
		while results.try_join_next().is_some() {}
	}

	let _ = done.send(());
	results
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use fleet_runtime::RuntimeOptions;
	use fleet_runtime::testing::{Script, ScriptedEngine};
	use serde_json::json;

	use super::*;

	fn intake(script: &Script) -> (Intake<ScriptedEngine>, mpsc::UnboundedReceiver<Event>) {
		let runtime = Arc::new(SessionQueueRuntime::new(
			script.clone(),
			RuntimeOptions { queue_capacity: 8 },
		));
		let (tx, rx) = mpsc::unbounded_channel();
		(Intake::new(runtime, tx), rx)
	}

	fn enqueue(id: &str, session: &str, action: &str, kwargs: Value) -> Request {
		Request::Enqueue {
			id: Some(id.into()),
			session: session.into(),
			action: action.into(),
			args: Vec::new(),
			kwargs: kwargs.as_object().cloned().unwrap_or_default(),
		}
	}

	fn result_id(event: &Event) -> Option<&str> {
		match event {
			Event::Result { id, .. } => id.as_deref(),
			_ => None,
		}
	}

	#[test]
	fn requests_parse_by_op() {
		let request: Request =
			serde_json::from_str(r#"{"op":"enqueue","session":"chan-1","action":"goto","args":["https://example.test"]}"#)
				.unwrap();
		assert_eq!(
			request,
			Request::Enqueue {
				id: None,
				session: "chan-1".into(),
				action: "goto".into(),
				args: vec![json!("https://example.test")],
				kwargs: Map::new(),
			}
		);

		assert_eq!(serde_json::from_str::<Request>(r#"{"op":"status"}"#).unwrap(), Request::Status);
		assert!(serde_json::from_str::<Request>(r#"{"op":"restart","session":"x"}"#).is_err());
	}

	#[test]
	fn settled_events_carry_either_result_or_error() {
		let ok = serde_json::to_value(Event::settled(Some("7".into()), "s".into(), Ok(json!(3)))).unwrap();
		assert_eq!(ok, json!({"event": "result", "id": "7", "session": "s", "ok": true, "result": 3}));

		let failed = Event::settled(None, "s".into(), Err(fleet_runtime::Error::SessionClosed("s".into())));
		let failed = serde_json::to_value(failed).unwrap();
		assert_eq!(failed["ok"], false);
		assert!(failed.get("result").is_none());
		assert!(failed["error"].as_str().unwrap().contains("closed before the command settled"));
	}

	#[tokio::test(start_paused = true)]
	async fn slow_first_touch_does_not_stall_other_sessions() {
		let script = Script::default().with_start_delay(Duration::from_secs(10));
		let (mut intake, mut events) = intake(&script);

		intake.submit(enqueue("warm", "fast", "add", json!({"a": 1, "b": 1})));
		let warmed = events.recv().await.unwrap();
		assert_eq!(result_id(&warmed), Some("warm"));

		let started = tokio::time::Instant::now();
		intake.submit(enqueue("cold", "slow", "add", json!({"a": 2, "b": 2})));
		intake.submit(enqueue("hot", "fast", "add", json!({"a": 3, "b": 3})));
		intake.submit(Request::Close { session: "nobody".into() });

		let mut early = Vec::new();
		for _ in 0..2 {
			early.push(events.recv().await.unwrap());
		}
		assert!(started.elapsed() < Duration::from_secs(10));
		assert!(early.iter().any(|event| result_id(event) == Some("hot")));
		assert!(early.contains(&Event::Closed {
			session: "nobody".into(),
			existed: false,
		}));

		let cold = events.recv().await.unwrap();
		assert_eq!(result_id(&cold), Some("cold"));
		intake.shutdown().await;
		assert_eq!(script.stops(), 2);
	}

	#[tokio::test]
	async fn requests_after_close_reach_a_fresh_session() {
		let script = Script::default();
		let (mut intake, mut events) = intake(&script);

		intake.submit(enqueue("a", "chan-1", "record", json!({"label": "a"})));
		intake.submit(Request::Close { session: "chan-1".into() });
		intake.submit(enqueue("b", "chan-1", "record", json!({"label": "b"})));

		let mut seen = Vec::new();
		for _ in 0..3 {
			seen.push(events.recv().await.unwrap());
		}
		let closed = seen
			.iter()
			.position(|event| matches!(event, Event::Closed { existed: true, .. }))
			.unwrap();
		let reopened = seen.iter().position(|event| result_id(event) == Some("b")).unwrap();
		assert!(closed < reopened);
		assert!(matches!(&seen[reopened], Event::Result { ok: true, .. }));
		assert_eq!(script.builds(), 2);

		intake.shutdown().await;
		assert_eq!(script.stops(), 2);
	}
}
