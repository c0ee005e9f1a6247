use std::time::Duration;

use fleet_protocol::Job;

use super::*;

const STREAM: &str = "jobs";
const GROUP: &str = "workers";

fn broker() -> MemoryBroker {
	MemoryBroker::new(STREAM).with_block(Duration::from_millis(100))
}

#[tokio::test]
async fn delivers_backlog_in_order_then_times_out() {
	let broker = broker();
	broker.publish(Job::new("j-1", "browser.goto"));
	broker.publish(Job::new("j-2", "browser.title"));
	broker.ensure_group(GROUP).await.unwrap();

	let first = broker.consume(GROUP, "w1").await.unwrap();
	let second = broker.consume(GROUP, "w1").await.unwrap();
	assert_eq!(first.job.id, "j-1");
	assert_eq!(second.job.id, "j-2");
	assert!(first.id < second.id);
	assert_eq!(first.deliveries, 1);

	assert_eq!(broker.consume(GROUP, "w1").await, Err(BrokerError::Timeout));
}

#[tokio::test]
async fn consume_without_group_fails() {
	let broker = broker();
	let err = broker.consume(GROUP, "w1").await.unwrap_err();
	assert!(matches!(err, BrokerError::NoGroup { .. }));
}

#[tokio::test]
async fn consume_wakes_on_publish() {
	let broker = std::sync::Arc::new(MemoryBroker::new(STREAM).with_block(Duration::from_secs(5)));
	broker.ensure_group(GROUP).await.unwrap();

	let consumer = {
		let broker = std::sync::Arc::clone(&broker);
		tokio::spawn(async move { broker.consume(GROUP, "w1").await })
	};
	tokio::task::yield_now().await;
	broker.publish(Job::new("late", "browser.goto"));

	let delivery = consumer.await.unwrap().unwrap();
	assert_eq!(delivery.job.id, "late");
}

#[tokio::test]
async fn groups_have_independent_cursors() {
	let broker = broker();
	broker.ensure_group("a").await.unwrap();
	broker.ensure_group("b").await.unwrap();
	broker.publish(Job::new("j-1", "x.y"));

	assert_eq!(broker.consume("a", "w1").await.unwrap().job.id, "j-1");
	assert_eq!(broker.consume("b", "w1").await.unwrap().job.id, "j-1");
}

#[tokio::test]
async fn ack_clears_pending_and_trims_entry() {
	let broker = broker();
	broker.ensure_group(GROUP).await.unwrap();
	broker.publish(Job::new("j-1", "x.y"));
	let delivery = broker.consume(GROUP, "w1").await.unwrap();

	let summary = broker.pending_summary(STREAM, GROUP).await.unwrap();
	assert_eq!(summary.count, 1);
	assert_eq!(summary.consumers, vec![("w1".to_string(), 1)]);
	assert!(!broker.is_drained(GROUP));

	assert!(broker.ack(GROUP, delivery.id).await.unwrap());
	assert!(!broker.ack(GROUP, delivery.id).await.unwrap());

	assert_eq!(broker.pending_summary(STREAM, GROUP).await.unwrap().count, 0);
	assert_eq!(broker.stream_len(STREAM).await.unwrap(), 0);
	assert!(broker.is_drained(GROUP));
	let info = broker.stream_info(STREAM).await.unwrap().unwrap();
	assert_eq!(info.last_entry_id, Some(delivery.id));
}

#[tokio::test]
async fn acked_stream_stays_bounded() {
	let broker = broker();
	broker.ensure_group(GROUP).await.unwrap();

	for i in 0..1000 {
		broker.publish(Job::new(format!("j-{i}"), "x.y"));
		let delivery = broker.consume(GROUP, "w1").await.unwrap();
		broker.ack(GROUP, delivery.id).await.unwrap();
	}

	assert!(broker.is_drained(GROUP));
	assert_eq!(broker.stream_len(STREAM).await.unwrap(), 0);
}

#[tokio::test]
async fn trimming_keeps_what_any_group_still_needs() {
	let broker = broker();
	broker.ensure_group("fast").await.unwrap();
	broker.ensure_group("slow").await.unwrap();
	for id in ["j-1", "j-2", "j-3"] {
		broker.publish(Job::new(id, "x.y"));
	}

	for _ in 0..3 {
		let delivery = broker.consume("fast", "w1").await.unwrap();
		broker.ack("fast", delivery.id).await.unwrap();
	}
	assert_eq!(broker.stream_len(STREAM).await.unwrap(), 3);

	// "slow" leaves j-1 unacked; j-2 is acked behind it.
	let stuck = broker.consume("slow", "w2").await.unwrap();
	let second = broker.consume("slow", "w2").await.unwrap();
	broker.ack("slow", second.id).await.unwrap();
	assert_eq!(broker.stream_len(STREAM).await.unwrap(), 3);

	broker.ack("slow", stuck.id).await.unwrap();
	assert_eq!(broker.stream_len(STREAM).await.unwrap(), 1);
	assert_eq!(broker.consume("slow", "w2").await.unwrap().job.id, "j-3");
}

#[tokio::test(start_paused = true)]
async fn idle_pending_entries_are_redelivered() {
	let broker = MemoryBroker::new(STREAM)
		.with_block(Duration::from_millis(100))
		.with_redelivery(Duration::from_secs(30));
	broker.ensure_group(GROUP).await.unwrap();
	broker.publish(Job::new("j-1", "x.y"));

	let first = broker.consume(GROUP, "w1").await.unwrap();
	assert_eq!(broker.consume(GROUP, "w2").await, Err(BrokerError::Timeout));

	tokio::time::advance(Duration::from_secs(31)).await;
	let again = broker.consume(GROUP, "w2").await.unwrap();

	assert_eq!(again.id, first.id);
	assert_eq!(again.deliveries, 2);
	let oldest = broker.pending_range(STREAM, GROUP, 1).await.unwrap();
	assert_eq!(oldest[0].consumer, "w2");
}

#[tokio::test(start_paused = true)]
async fn introspection_reports_group_state() {
	let broker = broker();
	assert_eq!(broker.stream_info(STREAM).await.unwrap(), None);
	assert_eq!(broker.group_info(STREAM, GROUP).await.unwrap(), None);

	broker.ensure_group(GROUP).await.unwrap();
	let first = broker.publish(Job::new("j-1", "x.y"));
	let last = broker.publish(Job::new("j-2", "x.y"));

	let info = broker.group_info(STREAM, GROUP).await.unwrap().unwrap();
	assert!(info.last_delivered_id.is_zero());

	broker.consume(GROUP, "w1").await.unwrap();
	tokio::time::advance(Duration::from_millis(1500)).await;

	let info = broker.group_info(STREAM, GROUP).await.unwrap().unwrap();
	assert_eq!(info.last_delivered_id, first);
	assert_eq!(info.consumers, 1);
	assert_eq!(info.pending, 1);

	let stream = broker.stream_info(STREAM).await.unwrap().unwrap();
	assert_eq!(stream.length, 2);
	assert_eq!(stream.last_entry_id, Some(last));

	let oldest = broker.pending_range(STREAM, GROUP, 1).await.unwrap();
	assert_eq!(oldest.len(), 1);
	assert_eq!(oldest[0].idle_ms, 1500);
}

#[tokio::test]
async fn replies_reach_the_sink() {
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	let broker = broker().with_reply_sink(tx);
	let job = Job::new("j-1", "x.y").with_reply_to("r-1");

	broker
		.reply(JobReply::success(&job, serde_json::json!(1)))
		.await
		.unwrap();

	let reply = rx.recv().await.unwrap();
	assert_eq!(reply.reply_to, "r-1");
	assert!(reply.ok);
}
