//! Job routing.
//!
//! [`JobRouter::run`] consumes from a [`Broker`] and dispatches each job to
//! the handler registered for the longest prefix of its type. The loop only
//! exits on shutdown: consume timeouts are ignored, other broker errors back
//! off and retry, and dispatch outcomes are logged once here at the loop
//! boundary.

pub mod pool;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_protocol::{Job, JobReply, WorkerState};
use fleet_runtime::WorkerHealth;
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, Delivery};

/// A domain handler, e.g. everything under `browser.`.
#[async_trait]
pub trait JobHandler: Send + Sync {
	/// Runs `job`; `action` is the job type with the matched prefix stripped.
	async fn handle(&self, job: &Job, action: &str) -> fleet_runtime::Result<Value>;

	/// Releases every resource the handler holds. Called once at shutdown.
	async fn shutdown(&self) {}

	fn session_count(&self) -> usize {
		0
	}
}

/// Why a job produced no result.
#[derive(Debug, Error)]
pub enum DispatchError {
	/// No registered prefix matches the job type. The job is left for redelivery.
	#[error("no handler registered for job type '{job_type}'")]
	HandlerNotFound { job_type: String },

	#[error("handler '{prefix}' failed: {source}")]
	Handler {
		prefix: String,
		#[source]
		source: fleet_runtime::Error,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
	pub group: String,
	pub consumer: String,
	/// Only jobs whose type starts with this are taken; others are left unacked.
	pub job_type_prefix: Option<String>,
	/// Pause after a broker error before consuming again.
	pub error_backoff: Duration,
}

impl Default for RouterOptions {
	fn default() -> Self {
		Self {
			group: "workers".to_string(),
			consumer: "worker-1".to_string(),
			job_type_prefix: None,
			error_backoff: Duration::from_secs(1),
		}
	}
}

struct Route {
	prefix: String,
	handler: Arc<dyn JobHandler>,
}

pub struct JobRouter {
	broker: Arc<dyn Broker>,
	options: RouterOptions,
	/// Longest prefix first.
	routes: Vec<Route>,
	health: Arc<WorkerHealth>,
	processed: AtomicU64,
}

impl JobRouter {
	pub fn new(broker: Arc<dyn Broker>, options: RouterOptions) -> Self {
		Self {
			broker,
			options,
			routes: Vec::new(),
			health: Arc::new(WorkerHealth::new()),
			processed: AtomicU64::new(0),
		}
	}

	pub fn with_health(mut self, health: Arc<WorkerHealth>) -> Self {
		self.health = health;
		self
	}

	pub fn health(&self) -> &Arc<WorkerHealth> {
		&self.health
	}

	/// Deliveries this router has finished with, handled or not.
	pub fn processed(&self) -> u64 {
		self.processed.load(Ordering::SeqCst)
	}

	pub fn options(&self) -> &RouterOptions {
		&self.options
	}

	/// Routes jobs whose type starts with `prefix` to `handler`, replacing any
	/// handler already registered for the same prefix.
	pub fn register_handler(&mut self, prefix: impl Into<String>, handler: Arc<dyn JobHandler>) {
		let prefix = prefix.into();
		self.routes.retain(|route| route.prefix != prefix);
		self.routes.push(Route { prefix, handler });
		self.routes
			.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then_with(|| a.prefix.cmp(&b.prefix)));
	}

	/// Registered prefixes in match order.
	pub fn prefixes(&self) -> Vec<&str> {
		self.routes.iter().map(|route| route.prefix.as_str()).collect()
	}

	/// Whether this worker's `job_type_prefix` filter admits `job`.
	pub fn accepts(&self, job: &Job) -> bool {
		self.options
			.job_type_prefix
			.as_deref()
			.is_none_or(|prefix| job.job_type.starts_with(prefix))
	}

	/// Runs `job` on the handler with the longest matching prefix.
	pub async fn dispatch(&self, job: &Job) -> Result<Value, DispatchError> {
		let Some((route, action)) = self
			.routes
			.iter()
			.find_map(|route| job.action_after(&route.prefix).map(|action| (route, action)))
		else {
			return Err(DispatchError::HandlerNotFound {
				job_type: job.job_type.clone(),
			});
		};

		AssertUnwindSafe(route.handler.handle(job, action))
			.catch_unwind()
			.await
			.unwrap_or_else(|_| {
				Err(fleet_runtime::Error::Panicked {
					action: action.to_string(),
				})
			})
			.map_err(|source| DispatchError::Handler {
				prefix: route.prefix.clone(),
				source,
			})
	}

	/// Consumes until `shutdown` flips to `true` (or its sender goes away), then
	/// stops every handler's engines.
	///
	/// # Errors
	///
	/// Only if the consumer group cannot be set up before the loop starts.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
		let RouterOptions {
			group,
			consumer,
			error_backoff,
			..
		} = &self.options;
		self.broker.ensure_group(group).await?;
		info!(
			target = "fleet.worker",
			group = %group,
			consumer = %consumer,
			prefixes = ?self.prefixes(),
			"worker consuming"
		);

		loop {
			if *shutdown.borrow() {
				break;
			}
			self.health.set_state(WorkerState::Waiting);

			let consumed = tokio::select! {
				biased;
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
					continue;
				}
				consumed = self.broker.consume(group, consumer) => consumed,
			};

			match consumed {
				Ok(delivery) => self.process(delivery).await,
				Err(BrokerError::Timeout) => {}
				Err(err) => {
					warn!(target = "fleet.worker", error = %err, backoff = ?error_backoff, "consume failed; backing off");
					self.health.set_state(WorkerState::Error);
					tokio::select! {
						_ = shutdown.changed() => {}
						_ = tokio::time::sleep(*error_backoff) => {}
					}
				}
			}
		}

		info!(target = "fleet.worker", "shutdown requested; releasing engines");
		self.shutdown().await;
		Ok(())
	}

	/// Stops every engine held by every handler.
	pub async fn shutdown(&self) {
		join_all(self.routes.iter().map(|route| route.handler.shutdown())).await;
		self.health.set_state(WorkerState::Shutdown);
	}

	async fn process(&self, delivery: Delivery) {
		self.settle(delivery).await;
		self.processed.fetch_add(1, Ordering::SeqCst);
	}

	async fn settle(&self, delivery: Delivery) {
		let Delivery { id, job, deliveries } = delivery;
		if !self.accepts(&job) {
			debug!(target = "fleet.worker", %id, job_type = %job.job_type, "job outside this worker's prefix; skipping");
			return;
		}

		self.health.set_state(WorkerState::Busy);
		let outcome = self.dispatch(&job).await;

		let reply = match &outcome {
			Ok(value) => {
				debug!(target = "fleet.worker", %id, job_id = %job.id, job_type = %job.job_type, "job completed");
				JobReply::success(&job, value.clone())
			}
			Err(err @ DispatchError::HandlerNotFound { .. }) => {
				warn!(target = "fleet.worker", %id, job_id = %job.id, deliveries, error = %err, "unhandled job");
				return;
			}
			Err(err @ DispatchError::Handler { source, .. }) if source.is_dispatch_error() => {
				warn!(target = "fleet.worker", %id, job_id = %job.id, job_type = %job.job_type, error = %err, "job rejected");
				JobReply::failure(&job, err.to_string())
			}
			Err(err) => {
				error!(target = "fleet.worker", %id, job_id = %job.id, job_type = %job.job_type, error = %err, "job failed");
				JobReply::failure(&job, err.to_string())
			}
		};

		if let Err(err) = self.broker.ack(&self.options.group, id).await {
			warn!(target = "fleet.worker", %id, error = %err, "ack failed");
		}
		if !job.reply_to.is_empty() {
			if let Err(err) = self.broker.reply(reply).await {
				warn!(target = "fleet.worker", %id, reply_to = %job.reply_to, error = %err, "reply failed");
			}
		}
	}
}
