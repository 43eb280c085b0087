use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::policy::Rules;
use crate::raw::builder::empty_class;
use crate::raw::class_file::SUPPORTED_MAJOR_VERSIONS;
use crate::transform::{transform_class, HelperClass, TransformOutput, HELPER_SUFFIX};

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum AgentError {
	/// The security-exception analogue: re-entrant activation is rejected.
	#[error("Agent is already active")]
	AlreadyActive,
	#[error("Agent has not been pre-armed")]
	NotPreArmed,
	#[error("Illegal agent argument: {0}")]
	IllegalArgument(String),
}

/// Process-wide single-slot lifecycle.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AgentState {
	Uninitialized = 0,
	PreArmed = 1,
	Active = 2,
	Retired = 3,
}

impl AgentState {
	fn from_u8(value: u8) -> AgentState {
		match value {
			1 => AgentState::PreArmed,
			2 => AgentState::Active,
			3 => AgentState::Retired,
			_ => AgentState::Uninitialized,
		}
	}
}

/// Supplies the policy. Results are requested per class and never cached
/// across classes, so a controller may refine its answer over time.
pub trait Controller: Send + Sync {
	fn rules_for_caller(&self, module: &str) -> Arc<Rules>;

	fn rules_for_target(&self, module: &str) -> Arc<Rules> {
		self.rules_for_caller(module)
	}
}

/// Constructs a named controller from the agent argument string. A factory
/// refusing both the no-argument and the argument-carrying form makes the
/// name unusable, which `premain` reports as an illegal argument.
pub trait ControllerFactory: Send + Sync {
	fn create(&self, args: Option<&str>) -> Result<Arc<dyn Controller>, AgentError>;
}

/// The built-in `default` controller: all-allow.
pub struct DefaultController {
	rules: Arc<Rules>,
}

impl Controller for DefaultController {
	fn rules_for_caller(&self, _module: &str) -> Arc<Rules> {
		self.rules.clone()
	}
}

struct DefaultControllerFactory;

impl ControllerFactory for DefaultControllerFactory {
	fn create(&self, args: Option<&str>) -> Result<Arc<dyn Controller>, AgentError> {
		match args {
			Some(args) => Err(AgentError::IllegalArgument(format!(
				"The default controller takes no arguments, got `{args}`"
			))),
			None => Ok(Arc::new(DefaultController { rules: Rules::allow_all() })),
		}
	}
}

/// The agent: lifecycle cell, controller slot, and the per-caller registry
/// of generated helper classes.
pub struct Agent {
	state: AtomicU8,
	controller: RwLock<Option<Arc<dyn Controller>>>,
	factories: RwLock<FxHashMap<String, Arc<dyn ControllerFactory>>>,
	helpers: RwLock<FxHashMap<Arc<str>, Arc<[HelperClass]>>>,
}

impl Default for Agent {
	fn default() -> Self {
		Self::new()
	}
}

impl Agent {
	pub fn new() -> Self {
		let agent = Self {
			state: AtomicU8::new(AgentState::Uninitialized as u8),
			controller: RwLock::new(None),
			factories: RwLock::new(FxHashMap::default()),
			helpers: RwLock::new(FxHashMap::default()),
		};
		agent
			.factories
			.write()
			.insert("default".to_string(), Arc::new(DefaultControllerFactory));
		agent
	}

	pub fn state(&self) -> AgentState {
		AgentState::from_u8(self.state.load(Ordering::Acquire))
	}

	/// Makes a controller available under `name` before `premain` runs.
	pub fn register_controller(&self, name: &str, factory: Arc<dyn ControllerFactory>) {
		self.factories.write().insert(name.to_string(), factory);
	}

	/// Startup hook. Accepts `""`, `"<controller>"`, or
	/// `"<controller>=<args>"`; transitions Uninitialized to PreArmed.
	pub fn premain(&self, args: &str) -> Result<(), AgentError> {
		let (name, controller_args) = match args.split_once('=') {
			Some((name, rest)) => (name, Some(rest)),
			None => (args, None),
		};
		let name = match name.is_empty() {
			true => "default",
			false => name,
		};

		let factory = self
			.factories
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| AgentError::IllegalArgument(format!("Unknown controller `{name}`")))?;
		let controller = factory.create(controller_args)?;

		self.state
			.compare_exchange(
				AgentState::Uninitialized as u8,
				AgentState::PreArmed as u8,
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.map_err(|state| match AgentState::from_u8(state) {
				AgentState::Active | AgentState::PreArmed => AgentError::AlreadyActive,
				_ => AgentError::NotPreArmed,
			})?;

		*self.controller.write() = Some(controller);
		Ok(())
	}

	/// First activation transitions PreArmed to Active and enables the
	/// transform hook; any further attempt fails.
	pub fn activate(&self) -> Result<(), AgentError> {
		self.state
			.compare_exchange(
				AgentState::PreArmed as u8,
				AgentState::Active as u8,
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.map_err(|state| match AgentState::from_u8(state) {
				AgentState::Active => AgentError::AlreadyActive,
				_ => AgentError::NotPreArmed,
			})?;
		Ok(())
	}

	/// Test hook: tears the agent down to Retired.
	pub fn retire_for_tests(&self) {
		self.state.store(AgentState::Retired as u8, Ordering::Release);
		*self.controller.write() = None;
		self.helpers.write().clear();
	}

	/// Generated helpers recorded for `caller_class`, if any transform
	/// produced them.
	pub fn helpers_for(&self, caller_class: &str) -> Option<Arc<[HelperClass]>> {
		self.helpers.read().get(caller_class).cloned()
	}

	/// The class-transform hook: `None` leaves the class unchanged.
	/// Parser failures follow the error taxonomy: ignorable errors pass the
	/// class through, hard errors substitute the empty-class form.
	pub fn transform(&self, module: &str, internal_name: &str, bytes: &[u8]) -> Option<TransformOutput> {
		if self.state() != AgentState::Active {
			return None;
		}
		// Generated helpers are never themselves rewritten.
		if internal_name.contains(HELPER_SUFFIX) {
			return None;
		}

		let controller = self.controller.read().clone()?;
		let caller_rules = controller.rules_for_caller(module);
		let target_rules = controller.rules_for_target(module);

		match transform_class(module, internal_name, bytes, &caller_rules, &target_rules) {
			Ok(None) => None,
			Ok(Some(output)) => {
				if !output.helpers.is_empty() {
					// First writer wins; later transforms of the same caller
					// produce identical helpers.
					self.helpers
						.write()
						.entry(Arc::from(internal_name))
						.or_insert_with(|| Arc::from(output.helpers.clone().into_boxed_slice()));
				}
				Some(output)
			},
			Err(error) if error.ignorable() => {
				debug!(class = internal_name, %error, "Leaving class untouched");
				None
			},
			Err(error) => {
				warn!(class = internal_name, %error, "Replacing class with the empty form");
				Some(TransformOutput {
					class_bytes: empty_class(internal_name, major_version_of(bytes)),
					helpers: vec![],
				})
			},
		}
	}
}

/// Best-effort major version for the empty-class substitution when the
/// original could not be parsed.
fn major_version_of(bytes: &[u8]) -> u16 {
	let declared = match bytes {
		[_, _, _, _, _, _, high, low, ..] => u16::from_be_bytes([*high, *low]),
		_ => 52,
	};
	match SUPPORTED_MAJOR_VERSIONS.contains(&declared) {
		true => declared,
		false => 52,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lifecycle_is_single_slot() {
		let agent = Agent::new();
		assert_eq!(agent.state(), AgentState::Uninitialized);

		agent.premain("").unwrap();
		assert_eq!(agent.state(), AgentState::PreArmed);

		agent.activate().unwrap();
		assert_eq!(agent.state(), AgentState::Active);

		assert_eq!(agent.activate(), Err(AgentError::AlreadyActive));

		agent.retire_for_tests();
		assert_eq!(agent.state(), AgentState::Retired);
		assert_eq!(agent.activate(), Err(AgentError::NotPreArmed));
	}

	#[test]
	fn premain_rejects_unknown_controllers_and_stray_arguments() {
		let agent = Agent::new();
		assert!(matches!(
			agent.premain("missing"),
			Err(AgentError::IllegalArgument(_)),
		));
		assert!(matches!(
			agent.premain("default=xyz"),
			Err(AgentError::IllegalArgument(_)),
		));
		assert!(agent.premain("default").is_ok());
	}

	#[test]
	fn activation_requires_premain() {
		let agent = Agent::new();
		assert_eq!(agent.activate(), Err(AgentError::NotPreArmed));
	}

	#[test]
	fn inactive_agent_transforms_nothing() {
		let agent = Agent::new();
		agent.premain("").unwrap();
		assert!(agent.transform("app", "com/example/Main", &[0xCA, 0xFE]).is_none());
	}

	#[test]
	fn hard_errors_substitute_the_empty_class() {
		let agent = Agent::new();
		agent.premain("").unwrap();
		agent.activate().unwrap();

		// Unsupported major version: a hard error even under all-allow.
		let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0xFF];
		let output = agent.transform("app", "com/example/Future", &bytes).unwrap();
		let parsed = crate::raw::class_file::ClassFile::parse(&output.class_bytes).unwrap();
		assert_eq!(parsed.this_class_name(), Some("com/example/Future"));
		assert!(parsed.methods.is_empty());

		// Bad magic: ignorable, class loads unchanged.
		assert!(agent.transform("app", "com/example/NotAClass", &[1, 2, 3, 4]).is_none());
	}
}
