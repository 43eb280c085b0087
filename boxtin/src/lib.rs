//! A load-time JVM bytecode rewriter enforcing a declarative allow/deny
//! policy over method and constructor invocations.
//!
//! The host process hands every loaded class to [`Agent::transform`]; where
//! the policy denies an invocation, the call site is rewritten to a static
//! stub on a generated `$$BoxtinActions` class that throws, substitutes a
//! value, or gates the call on a user predicate.

pub mod agent;
pub mod ffi;
pub mod policy;
pub mod raw;
pub mod transform;
mod utilities;

pub use agent::{Agent, AgentError, AgentState, Controller, ControllerFactory};
pub use policy::{
	CustomInfo, DenyAction, Literal, ModuleCatalog, PolicyError, Rule, RuleApplier, Rules,
	RulesBuilder,
};
pub use raw::ClassFormatError;
pub use transform::{
	transform_class, HelperClass, LookupDecision, ReflectionShim, TransformOutput,
};
