//! Error types for the session runtime.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by sessions, lifecycles and action binding.
#[derive(Debug, Error)]
pub enum Error {
	/// The session's command queue is saturated; the caller decides whether to retry.
	#[error("command queue for session '{session}' is full ({capacity} queued)")]
	QueueFull { session: String, capacity: usize },

	/// The engine could not be (re)started.
	#[error("engine unavailable: {0}")]
	EngineUnavailable(#[source] EngineError),

	/// The lifecycle was stopped and will not start again.
	#[error("engine has been closed")]
	EngineClosed,

	/// The session went away before the command settled.
	#[error("session '{0}' closed before the command settled")]
	SessionClosed(String),

	/// No action with this name exists for the engine type.
	#[error("unknown action '{action}'")]
	UnknownAction { action: String },

	/// Arguments could not be bound to the action's parameters.
	#[error("invalid arguments for '{action}': {message}")]
	InvalidArguments { action: String, message: String },

	/// The engine panicked while running an action.
	#[error("engine panicked while running '{action}'")]
	Panicked { action: String },

	/// The action ran and the engine reported a failure.
	#[error(transparent)]
	Engine(#[from] EngineError),
}

impl Error {
	/// Returns `true` for errors that mean the engine never ran the action.
	pub fn is_dispatch_error(&self) -> bool {
		matches!(self, Error::UnknownAction { .. } | Error::InvalidArguments { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dispatch_errors_never_reached_the_engine() {
		assert!(Error::UnknownAction { action: "x".into() }.is_dispatch_error());
		assert!(
			Error::InvalidArguments {
				action: "x".into(),
				message: "y".into()
			}
			.is_dispatch_error()
		);
		assert!(!Error::Engine(EngineError::Action("boom".into())).is_dispatch_error());
		assert!(!Error::Panicked { action: "x".into() }.is_dispatch_error());
	}
}
