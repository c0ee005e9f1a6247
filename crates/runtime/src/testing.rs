//! Scripted engine for exercising runtimes and routers without real automation.
//!
//! All counters live in the shared [`Script`], which is also the engine config,
//! so a test can observe every instance a lifecycle builds and relaunches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};

use crate::engine::{Engine, EngineError};

crate::engine_actions! {
	#[derive(Debug, Clone, PartialEq)]
	pub enum ScriptAction {
		/// Appends `label` to the shared log.
		Record => "record" { label: String },
		Add => "add" { a: i64, b: i64 },
		/// Signals `entered`, then waits for a permit on `gate`.
		Hold => "hold" {},
		Fail => "fail" { message: String },
		/// Kills the engine so the next probe fails.
		Crash => "crash" {},
		Goto => "goto" { url: String },
		Panic => "panic" {},
	}
}

/// Shared, cloneable test script. Doubles as the engine config.
#[derive(Clone)]
pub struct Script {
	pub builds: Arc<AtomicUsize>,
	pub starts: Arc<AtomicUsize>,
	pub stops: Arc<AtomicUsize>,
	/// Number of upcoming `start` calls that fail.
	pub fail_starts: Arc<AtomicUsize>,
	/// When set, probes fail until the next successful start.
	pub crashed: Arc<AtomicBool>,
	pub fail_stop: Arc<AtomicBool>,
	pub log: Arc<Mutex<Vec<String>>>,
	pub entered: Arc<Notify>,
	pub gate: Arc<Semaphore>,
	pub start_delay: Duration,
}

impl Default for Script {
	fn default() -> Self {
		Self {
			builds: Arc::default(),
			starts: Arc::default(),
			stops: Arc::default(),
			fail_starts: Arc::default(),
			crashed: Arc::default(),
			fail_stop: Arc::default(),
			log: Arc::default(),
			entered: Arc::default(),
			gate: Arc::new(Semaphore::new(0)),
			start_delay: Duration::ZERO,
		}
	}
}

impl Script {
	pub fn with_start_delay(mut self, delay: Duration) -> Self {
		self.start_delay = delay;
		self
	}

	pub fn starts(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	pub fn builds(&self) -> usize {
		self.builds.load(Ordering::SeqCst)
	}

	pub fn stops(&self) -> usize {
		self.stops.load(Ordering::SeqCst)
	}

	pub fn crash(&self) {
		self.crashed.store(true, Ordering::SeqCst);
	}

	pub fn fail_next_starts(&self, count: usize) {
		self.fail_starts.store(count, Ordering::SeqCst);
	}

	pub fn release(&self, permits: usize) {
		self.gate.add_permits(permits);
	}

	pub fn log(&self) -> Vec<String> {
		self.log.lock().clone()
	}
}

pub struct ScriptedEngine {
	script: Script,
	running: bool,
	url: Option<String>,
}

#[async_trait]
impl Engine for ScriptedEngine {
	type Config = Script;
	type Action = ScriptAction;

	fn build(config: &Script) -> Self {
		config.builds.fetch_add(1, Ordering::SeqCst);
		Self {
			script: config.clone(),
			running: false,
			url: None,
		}
	}

	async fn start(&mut self) -> Result<(), EngineError> {
		self.script.starts.fetch_add(1, Ordering::SeqCst);
		if !self.script.start_delay.is_zero() {
			tokio::time::sleep(self.script.start_delay).await;
		}
		let failed = self
			.script
			.fail_starts
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failed {
			return Err(EngineError::Launch("scripted launch failure".into()));
		}
		self.script.crashed.store(false, Ordering::SeqCst);
		self.running = true;
		Ok(())
	}

	async fn stop(&mut self, _graceful: bool) -> Result<(), EngineError> {
		self.script.stops.fetch_add(1, Ordering::SeqCst);
		self.running = false;
		if self.script.fail_stop.load(Ordering::SeqCst) {
			return Err(EngineError::Action("scripted stop failure".into()));
		}
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.running
	}

	fn describe(&self) -> String {
		format!("scripted(url={})", self.url.as_deref().unwrap_or("-"))
	}

	async fn probe(&mut self) -> Result<(), EngineError> {
		if self.running && !self.script.crashed.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(EngineError::Probe("scripted crash".into()))
		}
	}

	fn checkpoint(&self) -> Option<String> {
		self.url.clone()
	}

	async fn restore(&mut self, checkpoint: &str) -> Result<(), EngineError> {
		self.script.log.lock().push(format!("restore:{checkpoint}"));
		self.url = Some(checkpoint.to_string());
		Ok(())
	}

	async fn execute(&mut self, action: ScriptAction) -> Result<Value, EngineError> {
		match action {
			ScriptAction::Record { label } => {
				self.script.log.lock().push(label.clone());
				Ok(json!(label))
			}
			ScriptAction::Add { a, b } => Ok(json!(a + b)),
			ScriptAction::Hold {} => {
				self.script.entered.notify_one();
				let permit = self
					.script
					.gate
					.acquire()
					.await
					.map_err(|_| EngineError::Action("gate closed".into()))?;
				permit.forget();
				Ok(json!("released"))
			}
			ScriptAction::Fail { message } => Err(EngineError::Action(message)),
			ScriptAction::Crash {} => {
				self.script.crash();
				Ok(Value::Null)
			}
			ScriptAction::Goto { url } => {
				self.script.log.lock().push(format!("goto:{url}"));
				self.url = Some(url.clone());
				Ok(json!(url))
			}
			ScriptAction::Panic {} => panic!("scripted engine panic"),
		}
	}
}
