//! Action catalogs and argument binding.
//!
//! Each engine type declares its actions once with [`engine_actions!`], which
//! generates an enum, a static [`ActionSpec`] catalog and a binder. Binding maps
//! positional args onto parameter names in order, then merges kwargs filtered
//! down to exactly the declared parameter names so routing metadata riding
//! along in a job never reaches the engine.
//!
//! [`engine_actions!`]: crate::engine_actions

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Name and accepted parameter names of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
	pub name: &'static str,
	pub params: &'static [&'static str],
}

/// The closed set of actions an engine supports.
pub trait Action: Sized + Send + 'static {
	const CATALOG: &'static [ActionSpec];

	fn name(&self) -> &'static str;

	/// Resolves `name` and binds `call` onto its parameters.
	fn bind(name: &str, call: ActionCall) -> Result<Self>;

	fn spec(name: &str) -> Option<&'static ActionSpec> {
		Self::CATALOG.iter().find(|spec| spec.name == name)
	}
}

/// Raw arguments for an action invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionCall {
	pub args: Vec<Value>,
	pub kwargs: Map<String, Value>,
}

impl ActionCall {
	pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
		Self { args, kwargs }
	}

	/// Binds positional args then filtered kwargs onto `params`.
	pub fn bind(self, action: &str, params: &[&str]) -> Result<BoundArgs> {
		if self.args.len() > params.len() {
			return Err(Error::InvalidArguments {
				action: action.to_string(),
				message: format!(
					"takes {} positional argument(s) but {} were given",
					params.len(),
					self.args.len()
				),
			});
		}

		let mut values = Map::new();
		for (name, value) in params.iter().zip(self.args) {
			values.insert((*name).to_string(), value);
		}
		for (name, value) in filter_kwargs(params, self.kwargs) {
			if values.contains_key(&name) {
				return Err(Error::InvalidArguments {
					action: action.to_string(),
					message: format!("got multiple values for '{name}'"),
				});
			}
			values.insert(name, value);
		}

		Ok(BoundArgs {
			action: action.to_string(),
			values,
		})
	}
}

/// Keeps only the kwargs whose names appear in `params`.
pub fn filter_kwargs(params: &[&str], kwargs: Map<String, Value>) -> Map<String, Value> {
	let mut kept = Map::new();
	let mut dropped = Vec::new();
	for (name, value) in kwargs {
		if params.contains(&name.as_str()) {
			kept.insert(name, value);
		} else {
			dropped.push(name);
		}
	}
	if !dropped.is_empty() {
		debug!(target = "fleet.action", ?dropped, "dropping kwargs not accepted by action");
	}
	kept
}

/// Arguments bound by name, decoded field by field.
#[derive(Debug)]
pub struct BoundArgs {
	action: String,
	values: Map<String, Value>,
}

impl BoundArgs {
	/// Decodes parameter `name`; a missing value decodes from `null`, so
	/// `Option` parameters are optional and everything else is required.
	pub fn take<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
		let value = self.values.remove(name).unwrap_or(Value::Null);
		serde_json::from_value(value).map_err(|err| Error::InvalidArguments {
			action: self.action.clone(),
			message: format!("{name}: {err}"),
		})
	}
}

/// Declares an engine's action enum and generates its catalog and binder.
///
/// ```rust,ignore
/// engine_actions! {
///     #[derive(Debug, Clone)]
///     pub enum PageAction {
///         Goto => "goto" { url: String },
///         Title => "title" {},
///     }
/// }
/// ```
#[macro_export]
macro_rules! engine_actions {
	(
		$(#[$meta:meta])*
		$vis:vis enum $name:ident {
			$(
				$(#[$vmeta:meta])*
				$variant:ident => $action:literal { $( $field:ident : $ty:ty ),* $(,)? }
			),+ $(,)?
		}
	) => {
		$(#[$meta])*
		$vis enum $name {
			$(
				$(#[$vmeta])*
				$variant { $( $field: $ty ),* }
			),+
		}

		impl $crate::action::Action for $name {
			const CATALOG: &'static [$crate::action::ActionSpec] = &[
				$(
					$crate::action::ActionSpec {
						name: $action,
						params: &[ $( stringify!($field) ),* ],
					}
				),+
			];

			fn name(&self) -> &'static str {
				match self {
					$( $name::$variant { .. } => $action ),+
				}
			}

			#[allow(unused_mut, unused_variables)]
			fn bind(name: &str, call: $crate::action::ActionCall) -> $crate::error::Result<Self> {
				match name {
					$(
						$action => {
							let mut bound = call.bind($action, &[ $( stringify!($field) ),* ])?;
							Ok($name::$variant { $( $field: bound.take(stringify!($field))? ),* })
						}
					)+
					other => Err($crate::error::Error::UnknownAction {
						action: other.to_string(),
					}),
				}
			}
		}
	};
}
