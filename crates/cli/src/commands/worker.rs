//! `fleet worker`: a job router fed from stdin.
//!
//! Each stdin line is a JSON [`Job`] published to an in-process broker; the
//! router consumes it like any other broker client would. Replies go to
//! stdout as NDJSON, everything else to the log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet::{EnginePool, JobRouter, MemoryBroker, QueueDepthEstimator};
use fleet_protocol::Job;
use fleet_runtime::WorkerHealth;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use super::{emit, forward_signals};
use crate::config::FleetConfig;
use crate::engines::HttpEngine;

/// Job types routed to the page engine pool.
pub const BROWSER_PREFIX: &str = "browser.";

const DRAIN_POLL: Duration = Duration::from_millis(50);

pub async fn run(config: FleetConfig, exit_on_eof: bool) -> Result<()> {
	let (reply_tx, mut replies) = mpsc::unbounded_channel();
	let mut broker = MemoryBroker::new(config.stream.clone())
		.with_block(Duration::from_millis(config.block_ms))
		.with_reply_sink(reply_tx);
	if let Some(after) = config.redeliver_after_ms {
		broker = broker.with_redelivery(Duration::from_millis(after));
	}
	let broker = Arc::new(broker);

	let health = Arc::new(WorkerHealth::with_transition_hook(|from, to| {
		debug!(target = "fleet.worker", %from, %to, "health transition");
	}));
	let mut router = JobRouter::new(broker.clone(), config.router_options()).with_health(health);
	router.register_handler(BROWSER_PREFIX, Arc::new(EnginePool::<HttpEngine>::new("browser", config.http.clone())));
	let router = Arc::new(router);

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(forward_signals(shutdown_tx.clone()));

	let printer = tokio::spawn(async move {
		while let Some(reply) = replies.recv().await {
			emit(&reply);
		}
	});
	tokio::spawn(report_metrics(
		QueueDepthEstimator::new(broker.clone()),
		config.clone(),
		shutdown_rx.clone(),
	));

	let consumer = {
		let router = Arc::clone(&router);
		let shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move { router.run(shutdown_rx).await })
	};

	let published = feed_stdin(&broker, shutdown_rx.clone()).await;
	if exit_on_eof {
		wait_until_processed(&router, published, shutdown_rx).await;
		info!(target = "fleet.worker", published, "stdin drained; stopping");
		let _ = shutdown_tx.send(true);
	}

	consumer.await.context("worker task failed")??;
	// The reply sink closes when the broker does.
	drop(router);
	drop(broker);
	let _ = printer.await;
	Ok(())
}

/// Publishes stdin jobs until EOF or shutdown. Returns how many were published.
async fn feed_stdin(broker: &MemoryBroker, mut shutdown: watch::Receiver<bool>) -> u64 {
	let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
	let mut published = 0;

	loop {
		let line = tokio::select! {
			_ = shutdown.changed() => break,
			line = lines.next() => line,
		};
		let line = match line {
			Some(Ok(line)) => line,
			Some(Err(err)) => {
				warn!(target = "fleet.worker", error = %err, "stdin read failed");
				break;
			}
			None => break,
		};
		if line.trim().is_empty() {
			continue;
		}
		match serde_json::from_str::<Job>(&line) {
			Ok(job) => {
				let id = broker.publish(job);
				debug!(target = "fleet.worker", %id, "job published");
				published += 1;
			}
			Err(err) => warn!(target = "fleet.worker", error = %err, "skipping malformed job line"),
		}
	}
	published
}

async fn wait_until_processed(router: &JobRouter, published: u64, mut shutdown: watch::Receiver<bool>) {
	while router.processed() < published {
		tokio::select! {
			_ = shutdown.changed() => return,
			_ = tokio::time::sleep(DRAIN_POLL) => {}
		}
	}
}

async fn report_metrics(estimator: QueueDepthEstimator, config: FleetConfig, mut shutdown: watch::Receiver<bool>) {
	let mut ticker = tokio::time::interval(Duration::from_millis(config.metrics_interval_ms.max(1)));
	ticker.tick().await;

	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			_ = ticker.tick() => {
				let snapshot = estimator.comprehensive_metrics(&config.stream, &config.group).await;
				info!(
					target = "fleet.metrics",
					stream = %snapshot.stream,
					group = %snapshot.group,
					depth = snapshot.true_depth,
					pending = snapshot.pending_count,
					new = snapshot.new_estimate,
					oldest_pending_ms = snapshot.oldest_pending_ms,
					consumers = snapshot.active_consumers,
					health = %snapshot.health_status,
					"queue metrics"
				);
			}
		}
	}
}
