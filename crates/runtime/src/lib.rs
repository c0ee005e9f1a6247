//! Session-scoped ownership of long-lived automation engines.
//!
//! - [`Engine`] / [`Action`]: the contract an automation engine implements, with
//!   a closed, compile-time set of actions per engine type
//! - [`EngineLifecycle`]: idempotent start, liveness probing and self-healing restart
//! - [`SessionQueueRuntime`]: one engine, one bounded FIFO queue and one worker
//!   task per session key
//! - [`WorkerHealth`]: worker-process state machine read by health transports

pub mod action;
pub mod engine;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{Action, ActionCall, ActionSpec, BoundArgs, filter_kwargs};
pub use engine::{Engine, EngineError};
pub use error::{Error, Result};
pub use health::WorkerHealth;
pub use lifecycle::{EngineLifecycle, EngineState};
pub use session::{CommandHandle, RuntimeOptions, SessionQueueRuntime};
