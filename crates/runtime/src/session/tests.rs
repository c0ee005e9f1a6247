use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};

use super::*;
use crate::testing::{Script, ScriptedEngine};

fn runtime(script: &Script, queue_capacity: usize) -> Arc<SessionQueueRuntime<ScriptedEngine>> {
	Arc::new(SessionQueueRuntime::new(script.clone(), RuntimeOptions { queue_capacity }))
}

fn kwargs(value: Value) -> Map<String, Value> {
	value.as_object().cloned().unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_touch_creates_one_engine() {
	let script = Script::default().with_start_delay(Duration::from_millis(20));
	let runtime = runtime(&script, 16);

	let mut calls = Vec::new();
	for i in 0..8 {
		let runtime = Arc::clone(&runtime);
		calls.push(tokio::spawn(async move {
			runtime
				.enqueue("chan-1", "add", vec![json!(i), json!(1)], Map::new())
				.await
				.unwrap()
				.await
				.unwrap()
		}));
	}
	for call in calls {
		call.await.unwrap();
	}

	assert_eq!(script.builds(), 1);
	assert_eq!(script.starts(), 1);
	assert_eq!(runtime.sessions(), vec!["chan-1".to_string()]);
}

#[tokio::test]
async fn commands_settle_in_enqueue_order() {
	let script = Script::default();
	let runtime = runtime(&script, 16);

	let mut handles = Vec::new();
	for label in ["a", "b", "c", "d"] {
		handles.push(
			runtime
				.enqueue("chan-1", "record", vec![json!(label)], Map::new())
				.await
				.unwrap(),
		);
	}
	for handle in handles {
		handle.await.unwrap();
	}

	assert_eq!(script.log(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn saturated_queue_fails_fast() {
	let script = Script::default();
	let runtime = runtime(&script, 1);

	let first = runtime.enqueue("chan-1", "hold", vec![], Map::new()).await.unwrap();
	script.entered.notified().await;

	let second = runtime.enqueue("chan-1", "hold", vec![], Map::new()).await.unwrap();
	let err = runtime
		.enqueue("chan-1", "hold", vec![], Map::new())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::QueueFull { capacity: 1, .. }));

	let status = runtime.status();
	assert_eq!(status[0].queue_len, 1);
	assert!(!status[0].idle);

	script.release(2);
	assert_eq!(first.await.unwrap(), json!("released"));
	assert_eq!(second.await.unwrap(), json!("released"));
}

#[tokio::test]
async fn kwargs_are_filtered_to_action_params() {
	let script = Script::default();
	let runtime = runtime(&script, 4);

	let value = runtime
		.enqueue("chan-1", "add", vec![], kwargs(json!({"a": 1, "b": 2, "c": 3})))
		.await
		.unwrap()
		.await
		.unwrap();

	assert_eq!(value, json!(3));
}

#[tokio::test]
async fn failing_command_does_not_kill_worker() {
	let script = Script::default();
	let runtime = runtime(&script, 4);

	let err = runtime
		.enqueue("chan-1", "fail", vec![json!("boom")], Map::new())
		.await
		.unwrap()
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "boom");

	let err = runtime
		.enqueue("chan-1", "no_such_action", vec![], Map::new())
		.await
		.unwrap()
		.await
		.unwrap_err();
	assert!(matches!(err, Error::UnknownAction { .. }));

	let err = runtime
		.enqueue("chan-1", "panic", vec![], Map::new())
		.await
		.unwrap()
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Panicked { ref action } if action == "panic"));

	let value = runtime
		.enqueue("chan-1", "add", vec![json!(2), json!(2)], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();
	assert_eq!(value, json!(4));
}

#[tokio::test]
async fn crashed_engine_heals_before_next_command() {
	let script = Script::default();
	let runtime = runtime(&script, 4);

	runtime
		.enqueue("chan-1", "goto", vec![json!("https://example.com")], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();
	runtime
		.enqueue("chan-1", "crash", vec![], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();
	runtime
		.enqueue("chan-1", "record", vec![json!("after")], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();

	assert_eq!(script.starts(), 2);
	assert_eq!(runtime.lifecycle("chan-1").unwrap().restarts(), 1);
	assert_eq!(
		script.log(),
		vec!["goto:https://example.com", "restore:https://example.com", "after"]
	);
}

#[tokio::test]
async fn close_session_is_idempotent() {
	let script = Script::default();
	let runtime = runtime(&script, 4);
	runtime
		.enqueue("chan-1", "add", vec![json!(1), json!(1)], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();

	assert!(runtime.close_session("chan-1").await);
	assert!(!runtime.close_session("chan-1").await);
	assert!(!runtime.close_session("never-seen").await);

	assert_eq!(script.stops(), 1);
	assert!(runtime.sessions().is_empty());
}

#[tokio::test]
async fn close_swallows_stop_errors() {
	let script = Script::default();
	script.fail_stop.store(true, std::sync::atomic::Ordering::SeqCst);
	let runtime = runtime(&script, 4);
	runtime
		.enqueue("chan-1", "add", vec![json!(1), json!(1)], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();

	assert!(runtime.close_session("chan-1").await);
	assert!(runtime.sessions().is_empty());
}

#[tokio::test]
async fn unsettled_commands_fail_when_session_closes() {
	let script = Script::default();
	let runtime = runtime(&script, 4);

	let held = runtime.enqueue("chan-1", "hold", vec![], Map::new()).await.unwrap();
	script.entered.notified().await;
	let queued = runtime
		.enqueue("chan-1", "record", vec![json!("never")], Map::new())
		.await
		.unwrap();

	runtime.close_session("chan-1").await;

	assert!(matches!(held.await, Err(Error::SessionClosed(_))));
	assert!(matches!(queued.await, Err(Error::SessionClosed(_))));
	assert!(script.log().is_empty());
}

#[tokio::test]
async fn launch_failure_is_reported_and_session_not_tracked() {
	let script = Script::default();
	script.fail_next_starts(1);
	let runtime = runtime(&script, 4);

	let err = runtime
		.enqueue("chan-1", "add", vec![json!(1), json!(1)], Map::new())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::EngineUnavailable(_)));
	assert!(runtime.sessions().is_empty());

	let value = runtime
		.enqueue("chan-1", "add", vec![json!(1), json!(1)], Map::new())
		.await
		.unwrap()
		.await
		.unwrap();
	assert_eq!(value, json!(2));
}

#[tokio::test]
async fn close_all_and_status() {
	let script = Script::default();
	let runtime = runtime(&script, 4);
	for session in ["b", "a", "c"] {
		runtime
			.enqueue(session, "add", vec![json!(1), json!(1)], Map::new())
			.await
			.unwrap()
			.await
			.unwrap();
	}

	let status = runtime.status();
	assert_eq!(
		status.iter().map(|s| s.session.as_str()).collect::<Vec<_>>(),
		vec!["a", "b", "c"]
	);
	assert!(status.iter().all(|s| s.idle && s.queue_len == 0));

	runtime.close_all().await;

	assert!(runtime.status().is_empty());
	assert_eq!(script.stops(), 3);
}
