use std::io::Write;

use super::*;

fn worker_args() -> WorkerArgs {
	WorkerArgs {
		stream: None,
		group: None,
		consumer: None,
		prefix: None,
		metrics_interval_ms: None,
		exit_on_eof: false,
	}
}

#[test]
fn partial_file_keeps_defaults() {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(file, r#"{{"group": "browsers", "http": {{"timeoutMs": 500}}}}"#).unwrap();

	let config = FleetConfig::load(Some(file.path())).unwrap();

	assert_eq!(config.group, "browsers");
	assert_eq!(config.stream, "fleet:jobs");
	assert_eq!(config.http.timeout_ms, 500);
	assert!(config.http.user_agent.starts_with("fleet/"));
	assert_eq!(config.queue_capacity, 64);
}

#[test]
fn explicit_missing_file_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	let err = FleetConfig::load(Some(&dir.path().join("absent.json"))).unwrap_err();
	assert!(err.to_string().contains("failed to read config"));
}

#[test]
fn malformed_file_is_an_error() {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(file, "{{not json").unwrap();
	assert!(FleetConfig::load(Some(file.path())).is_err());
}

#[test]
fn flags_override_file_values() {
	let mut config = FleetConfig {
		consumer: "from-file".to_string(),
		..FleetConfig::default()
	};
	let args = WorkerArgs {
		consumer: Some("worker-9".to_string()),
		prefix: Some("browser.".to_string()),
		..worker_args()
	};

	config.apply_worker_args(&args);
	let options = config.router_options();

	assert_eq!(options.consumer, "worker-9");
	assert_eq!(options.group, "workers");
	assert_eq!(options.job_type_prefix.as_deref(), Some("browser."));
	assert_eq!(options.error_backoff, Duration::from_secs(1));
}

#[test]
fn round_trips_through_camel_case_json() {
	let config = FleetConfig {
		redeliver_after_ms: Some(60_000),
		..FleetConfig::default()
	};
	let json = serde_json::to_value(&config).unwrap();
	assert_eq!(json["redeliverAfterMs"], 60_000);
	assert!(json.get("jobTypePrefix").is_none());
	assert_eq!(serde_json::from_value::<FleetConfig>(json).unwrap(), config);
}
