//! Jobs as delivered by a broker, and the replies a worker publishes for them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kwarg naming the session a job should run against.
pub const SESSION_ID_KEY: &str = "session_id";

/// Kwarg that asks the worker to tear the session's engine down after the call.
pub const CLOSE_SESSION_KEY: &str = "close_session";

/// One unit of distributed work.
///
/// `job_type` is `<domain>.<action>`, e.g. `browser.goto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
	pub id: String,
	#[serde(rename = "type")]
	pub job_type: String,
	#[serde(default)]
	pub args: Vec<Value>,
	#[serde(default)]
	pub kwargs: Map<String, Value>,
	#[serde(default)]
	pub reply_to: String,
	#[serde(default)]
	pub created_ts: f64,
}

impl Job {
	/// Creates a job with no arguments, no reply target and the current timestamp.
	pub fn new(id: impl Into<String>, job_type: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			job_type: job_type.into(),
			args: Vec::new(),
			kwargs: Map::new(),
			reply_to: String::new(),
			created_ts: now_secs(),
		}
	}

	pub fn with_args(mut self, args: Vec<Value>) -> Self {
		self.args = args;
		self
	}

	pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.kwargs.insert(key.into(), value.into());
		self
	}

	pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
		self.reply_to = reply_to.into();
		self
	}

	/// Resolves the session this job belongs to.
	///
	/// Precedence: the `session_id` kwarg, then `reply_to`, then the job id.
	/// Non-string `session_id` values are rendered as JSON text.
	pub fn session_key(&self) -> String {
		match self.kwargs.get(SESSION_ID_KEY) {
			Some(Value::String(id)) if !id.is_empty() => return id.clone(),
			Some(Value::Null) | None => {}
			Some(Value::String(_)) => {}
			Some(other) => return other.to_string(),
		}
		if !self.reply_to.is_empty() {
			return self.reply_to.clone();
		}
		self.id.clone()
	}

	/// Returns `true` when the job carries a truthy `close_session` flag.
	pub fn closes_session(&self) -> bool {
		match self.kwargs.get(CLOSE_SESSION_KEY) {
			Some(Value::Bool(flag)) => *flag,
			Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
			Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
			_ => false,
		}
	}

	/// Returns the action part of `job_type` once `prefix` is stripped.
	pub fn action_after<'a>(&'a self, prefix: &str) -> Option<&'a str> {
		self.job_type.strip_prefix(prefix)
	}
}

/// Result envelope published to a job's `reply_to` target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReply {
	pub job_id: String,
	pub reply_to: String,
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl JobReply {
	pub fn success(job: &Job, result: Value) -> Self {
		Self {
			job_id: job.id.clone(),
			reply_to: job.reply_to.clone(),
			ok: true,
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(job: &Job, error: impl Into<String>) -> Self {
		Self {
			job_id: job.id.clone(),
			reply_to: job.reply_to.clone(),
			ok: false,
			result: None,
			error: Some(error.into()),
		}
	}
}

fn now_secs() -> f64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs_f64()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn deserializes_wire_shape() {
		let job: Job = serde_json::from_value(json!({
			"id": "j-1",
			"type": "browser.goto",
			"args": ["https://example.com"],
			"kwargs": {"session_id": "chan-7", "timeout": 5},
			"reply_to": "replies:chan-7",
			"created_ts": 1700000000.5
		}))
		.unwrap();

		assert_eq!(job.job_type, "browser.goto");
		assert_eq!(job.args, vec![json!("https://example.com")]);
		assert_eq!(job.kwargs["timeout"], json!(5));
		assert_eq!(job.created_ts, 1700000000.5);
	}

	#[test]
	fn optional_fields_default() {
		let job: Job = serde_json::from_value(json!({"id": "j-2", "type": "browser.title"})).unwrap();
		assert!(job.args.is_empty());
		assert!(job.kwargs.is_empty());
		assert_eq!(job.reply_to, "");
	}

	#[test]
	fn session_key_precedence() {
		let job = Job::new("j-1", "browser.goto")
			.with_reply_to("reply-1")
			.with_kwarg(SESSION_ID_KEY, "sess-1");
		assert_eq!(job.session_key(), "sess-1");

		let job = Job::new("j-1", "browser.goto").with_reply_to("reply-1");
		assert_eq!(job.session_key(), "reply-1");

		let job = Job::new("j-1", "browser.goto");
		assert_eq!(job.session_key(), "j-1");

		let job = Job::new("j-1", "browser.goto").with_kwarg(SESSION_ID_KEY, 42);
		assert_eq!(job.session_key(), "42");
	}

	#[test]
	fn close_session_flag_forms() {
		assert!(Job::new("a", "b.c").with_kwarg(CLOSE_SESSION_KEY, true).closes_session());
		assert!(Job::new("a", "b.c").with_kwarg(CLOSE_SESSION_KEY, 1).closes_session());
		assert!(Job::new("a", "b.c").with_kwarg(CLOSE_SESSION_KEY, "True").closes_session());
		assert!(!Job::new("a", "b.c").with_kwarg(CLOSE_SESSION_KEY, false).closes_session());
		assert!(!Job::new("a", "b.c").closes_session());
	}

	#[test]
	fn reply_omits_empty_fields() {
		let job = Job::new("j-9", "browser.title").with_reply_to("r");
		let value = serde_json::to_value(JobReply::failure(&job, "boom")).unwrap();
		assert_eq!(value, json!({"job_id": "j-9", "reply_to": "r", "ok": false, "error": "boom"}));
	}
}
