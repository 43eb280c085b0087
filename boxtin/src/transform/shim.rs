use std::sync::Arc;

use crate::policy::{DenyAction, Rule, Rules};
use crate::transform::actions::HELPER_SUFFIX;

/// Outcome of a dynamic (reflective or method-handle) member lookup, as the
/// runtime shim must surface it. This mirrors the planner's decision table
/// for direct call sites: a member denied at the caller must be
/// indistinguishable from an absent one, and the failure must originate in
/// the caller's helper class so tests can tell policy denials from genuine
/// absence.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LookupDecision {
	/// The lookup proceeds as the platform would resolve it.
	Proceed,
	/// Raise the platform's no-such-method signal from `helper_class`.
	NoSuchMember { helper_class: Arc<str> },
	/// The lookup succeeds, but invocations through the produced handle are
	/// gated by the action (a `Checked` rule, or a target-side denial the
	/// target's own entry enforces).
	Gated { action: DenyAction },
}

/// The evaluation half of the reflection shim. The shim's runtime classes
/// (re-implementations of the platform's lookup APIs) live outside this
/// core; they consult this evaluator and then produce the platform-shaped
/// result. Which lookup APIs get redirected is decided by the policy
/// applier's guarded-lookup list, not here.
#[derive(Debug, Clone)]
pub struct ReflectionShim {
	rules: Arc<Rules>,
}

impl ReflectionShim {
	pub fn new(rules: Arc<Rules>) -> Self {
		Self { rules }
	}

	/// Evaluates a reflective method lookup made by `caller_class` (in
	/// `caller_module`) against `target_class.name(descriptor)`.
	pub fn evaluate(
		&self,
		caller_module: &str,
		caller_class: &str,
		target_class: &str,
		name: &str,
		descriptor: &str,
	) -> LookupDecision {
		let mut rule = self
			.rules
			.for_class(caller_module, target_class)
			.rule_for_method(name, descriptor);
		if !rule.is_deny() {
			if let Some(deny) = self.rules.subtype_deny(target_class, name, descriptor) {
				rule = deny.clone();
			}
		}
		self.decide(caller_class, rule)
	}

	pub fn evaluate_constructor(
		&self,
		caller_module: &str,
		caller_class: &str,
		target_class: &str,
		descriptor: &str,
	) -> LookupDecision {
		let rule = self
			.rules
			.for_class(caller_module, target_class)
			.rule_for_constructor(descriptor);
		self.decide(caller_class, rule)
	}

	fn decide(&self, caller_class: &str, rule: Rule) -> LookupDecision {
		match rule {
			Rule::Allow => LookupDecision::Proceed,
			// Target-side denials fire in the rewritten target entry; the
			// handle may be produced.
			Rule::DenyAtTarget(_) => LookupDecision::Proceed,
			Rule::DenyAtCaller(DenyAction::Checked { predicate, inner }) => LookupDecision::Gated {
				action: DenyAction::Checked { predicate, inner },
			},
			Rule::DenyAtCaller(_) => LookupDecision::NoSuchMember {
				helper_class: Arc::from(format!("{caller_class}{HELPER_SUFFIX}")),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::{ModuleCatalog, RulesBuilder};

	fn rules() -> Arc<Rules> {
		let catalog = ModuleCatalog::builder()
			.module("java.base", |module| {
				module.class("java/lang/System", |class| {
					class
						.method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;")
						.method("getProperty", "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;");
				});
			})
			.build();

		let mut builder = RulesBuilder::new(catalog);
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/System")
			.deny_variant(DenyAction::Standard, "getProperty", "(Ljava/lang/String;)");
		builder.build().unwrap()
	}

	#[test]
	fn denied_lookup_reports_absence_from_the_helper() {
		let shim = ReflectionShim::new(rules());
		let decision = shim.evaluate(
			"app",
			"com/example/Main",
			"java/lang/System",
			"getProperty",
			"(Ljava/lang/String;)Ljava/lang/String;",
		);
		assert_eq!(
			decision,
			LookupDecision::NoSuchMember {
				helper_class: Arc::from("com/example/Main$$BoxtinActions"),
			},
		);
	}

	#[test]
	fn undenied_overload_still_resolves() {
		let shim = ReflectionShim::new(rules());
		let decision = shim.evaluate(
			"app",
			"com/example/Main",
			"java/lang/System",
			"getProperty",
			"(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;",
		);
		assert_eq!(decision, LookupDecision::Proceed);
	}
}
