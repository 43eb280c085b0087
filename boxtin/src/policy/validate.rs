use std::sync::Arc;

use fxhash::FxHashMap;

use crate::policy::catalog::{ClassInfo, ModuleCatalog};
use crate::policy::{
	param_key, ClassNode, CustomInfo, DenyAction, Literal, ModuleNode, PolicyError, Rule,
};
use crate::raw::descriptor::{JavaType, MethodDescriptor, ReturnType};

struct Reporter<'l> {
	sink: Option<&'l mut dyn FnMut(&PolicyError)>,
	first: Option<PolicyError>,
}

impl Reporter<'_> {
	/// With a sink, records and keeps going; without, fails immediately.
	fn report(&mut self, error: PolicyError) -> Result<(), PolicyError> {
		match &mut self.sink {
			Some(sink) => {
				sink(&error);
				if self.first.is_none() {
					self.first = Some(error);
				}
				Ok(())
			},
			None => Err(error),
		}
	}

	fn finish(self) -> Result<(), PolicyError> {
		match self.first {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}
}

pub(crate) fn run(
	catalog: &ModuleCatalog,
	root_default: &Rule,
	modules: &FxHashMap<Arc<str>, ModuleNode>,
	sink: Option<&mut dyn FnMut(&PolicyError)>,
) -> Result<(), PolicyError> {
	let mut reporter = Reporter { sink, first: None };

	check_action_structure(catalog, root_default, &mut reporter)?;

	for (module_name, module) in modules {
		let known_module = catalog.module(module_name).is_some();
		// Broad rules tolerate unknown scope names; nodes that name classes
		// must resolve.
		if !known_module && module.packages.values().any(|p| !p.classes.is_empty()) {
			reporter.report(PolicyError::UnknownModule(module_name.clone()))?;
			continue;
		}
		if let Some(default) = &module.default {
			check_action_structure(catalog, default, &mut reporter)?;
		}

		for (package_name, package) in &module.packages {
			let known_package = catalog.package(module_name, package_name).is_some();
			if !known_package && !package.classes.is_empty() {
				reporter.report(PolicyError::UnknownPackage {
					module: module_name.clone(),
					package: package_name.clone(),
				})?;
				continue;
			}
			if let Some(default) = &package.default {
				check_action_structure(catalog, default, &mut reporter)?;
			}

			for (class_name, class_node) in &package.classes {
				let known = catalog.class(class_name).filter(|_| {
					catalog.module_of(class_name) == Some(module_name.as_ref())
						&& crate::policy::catalog::package_of(class_name) == package_name.as_ref()
				});
				let Some(class_info) = known else {
					reporter.report(PolicyError::UnknownClass(class_name.clone()))?;
					continue;
				};
				check_class(catalog, class_info, class_node, &mut reporter)?;
			}
		}
	}

	reporter.finish()
}

fn check_class(
	catalog: &ModuleCatalog,
	info: &ClassInfo,
	node: &ClassNode,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	if let Some(default) = &node.default {
		check_action_structure(catalog, default, reporter)?;
	}

	for (name, method) in &node.methods {
		let Some(declared) = info.methods.get(name) else {
			reporter.report(PolicyError::UnknownMethod {
				class: info.internal_name.clone(),
				name: name.clone(),
			})?;
			continue;
		};

		if let Some(rule) = &method.default {
			check_action_structure(catalog, rule, reporter)?;
			for descriptor in declared {
				check_member_action(catalog, info, name, descriptor, rule, false, reporter)?;
			}
		}

		for (params, rule) in &method.variants {
			let declared = declared.iter().find(|d| param_key(d) == params.as_ref());
			let Some(descriptor) = declared else {
				reporter.report(PolicyError::UnknownVariant {
					class: info.internal_name.clone(),
					name: name.clone(),
					params: params.clone(),
				})?;
				continue;
			};
			check_action_structure(catalog, rule, reporter)?;
			check_member_action(catalog, info, name, descriptor, rule, false, reporter)?;
		}
	}

	if let Some(rule) = &node.constructors.default {
		check_action_structure(catalog, rule, reporter)?;
		for descriptor in &info.constructors {
			check_member_action(catalog, info, "<init>", descriptor, rule, true, reporter)?;
		}
	}
	for (params, rule) in &node.constructors.variants {
		let declared = info.constructors.iter().find(|d| param_key(d) == params.as_ref());
		let Some(descriptor) = declared else {
			reporter.report(PolicyError::UnknownConstructor {
				class: info.internal_name.clone(),
				params: params.clone(),
			})?;
			continue;
		};
		check_action_structure(catalog, rule, reporter)?;
		check_member_action(catalog, info, "<init>", descriptor, rule, true, reporter)?;
	}

	Ok(())
}

/// Scope-level checks that need no member type information: exception
/// constructor presence, custom method existence, checked nesting.
fn check_action_structure(
	catalog: &ModuleCatalog,
	rule: &Rule,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	let Some(action) = rule.action() else {
		return Ok(());
	};
	check_action_structure_inner(catalog, action, reporter)
}

fn check_action_structure_inner(
	catalog: &ModuleCatalog,
	action: &DenyAction,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	match action {
		DenyAction::Standard | DenyAction::Value(_) | DenyAction::Empty => Ok(()),
		DenyAction::Exception { class_name, message } => {
			let constructor: Arc<str> = match message {
				Some(_) => Arc::from("(Ljava/lang/String;)V"),
				None => Arc::from("()V"),
			};
			match catalog.class(class_name) {
				None => reporter.report(PolicyError::UnknownClass(class_name.clone())),
				Some(info) if !info.constructors.contains(constructor.as_ref()) => {
					reporter.report(PolicyError::MissingExceptionConstructor {
						class: class_name.clone(),
						constructor,
					})
				},
				Some(_) => Ok(()),
			}
		},
		DenyAction::Custom(custom) => check_custom_exists(catalog, custom, reporter),
		DenyAction::Checked { predicate, inner } => {
			if matches!(**inner, DenyAction::Checked { .. }) {
				reporter.report(PolicyError::NestedChecked)?;
			}
			check_custom_exists(catalog, predicate, reporter)?;
			check_action_structure_inner(catalog, inner, reporter)
		},
	}
}

fn check_custom_exists(
	catalog: &ModuleCatalog,
	custom: &CustomInfo,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	match catalog.class(&custom.class_name) {
		None => reporter.report(PolicyError::UnknownClass(custom.class_name.clone())),
		Some(info) if !info.declares_method(&custom.method_name, &custom.descriptor) => {
			reporter.report(PolicyError::UnknownMethod {
				class: custom.class_name.clone(),
				name: custom.method_name.clone(),
			})
		},
		Some(_) => Ok(()),
	}
}

/// Member-level checks: return compatibility of `Value`/`Custom`/`Empty`,
/// predicate signatures of `Checked`.
fn check_member_action(
	catalog: &ModuleCatalog,
	info: &ClassInfo,
	name: &str,
	descriptor: &str,
	rule: &Rule,
	is_constructor: bool,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	let Some(action) = rule.action() else {
		return Ok(());
	};
	let Ok(target) = MethodDescriptor::parse(descriptor) else {
		return reporter.report(PolicyError::MalformedDescriptor(Arc::from(descriptor)));
	};

	// A constructor prologue cannot substitute a value for `this`, so a
	// target-side constructor denial has to throw.
	if is_constructor && matches!(rule, Rule::DenyAtTarget(_)) && !is_throwing(action) {
		reporter.report(PolicyError::NonThrowingConstructorDenial {
			class: info.internal_name.clone(),
		})?;
	}

	check_member_action_inner(catalog, info, name, descriptor, &target, action, is_constructor, reporter)
}

fn is_throwing(action: &DenyAction) -> bool {
	match action {
		DenyAction::Standard | DenyAction::Exception { .. } => true,
		DenyAction::Checked { inner, .. } => is_throwing(inner),
		_ => false,
	}
}

#[allow(clippy::too_many_arguments)]
fn check_member_action_inner(
	catalog: &ModuleCatalog,
	info: &ClassInfo,
	name: &str,
	descriptor: &str,
	target: &MethodDescriptor,
	action: &DenyAction,
	is_constructor: bool,
	reporter: &mut Reporter,
) -> Result<(), PolicyError> {
	match action {
		DenyAction::Standard | DenyAction::Exception { .. } => Ok(()),
		DenyAction::Value(literal) => {
			let assignable = !is_constructor && value_assignable(literal, &target.return_type);
			match assignable {
				true => Ok(()),
				false => reporter.report(PolicyError::UnassignableValue {
					class: info.internal_name.clone(),
					name: Arc::from(name),
					descriptor: Arc::from(descriptor),
					literal: literal.clone(),
				}),
			}
		},
		DenyAction::Empty => {
			// Every method return has an empty mapping (`null` at worst);
			// a constructor yields its class, which no mapping produces.
			match is_constructor {
				false => Ok(()),
				true => reporter.report(PolicyError::EmptyNotApplicable {
					class: info.internal_name.clone(),
					name: Arc::from(name),
					descriptor: Arc::from(descriptor),
				}),
			}
		},
		DenyAction::Custom(custom) => {
			let verdict = custom_fits(catalog, custom, info, target, is_constructor);
			match verdict {
				Ok(()) => Ok(()),
				Err(reason) => reporter.report(PolicyError::CustomMismatch {
					class: info.internal_name.clone(),
					name: Arc::from(name),
					descriptor: Arc::from(descriptor),
					custom: custom.descriptor.clone(),
					reason: Arc::from(reason),
				}),
			}
		},
		DenyAction::Checked { predicate, inner } => {
			if let Err(reason) = predicate_fits(catalog, predicate, target) {
				reporter.report(PolicyError::CustomMismatch {
					class: info.internal_name.clone(),
					name: Arc::from(name),
					descriptor: Arc::from(descriptor),
					custom: predicate.descriptor.clone(),
					reason: Arc::from(reason),
				})?;
			}
			check_member_action_inner(catalog, info, name, descriptor, target, inner, is_constructor, reporter)
		},
	}
}

/// JLS 5.1.2 widening primitive conversions.
pub(crate) fn widens_to(from: &JavaType, to: &JavaType) -> bool {
	use JavaType::*;
	if from == to {
		return true;
	}
	match from {
		Byte => matches!(to, Short | Int | Long | Float | Double),
		Short | Char => matches!(to, Int | Long | Float | Double),
		Int => matches!(to, Long | Float | Double),
		Long => matches!(to, Float | Double),
		Float => matches!(to, Double),
		_ => false,
	}
}

fn boxes_to(from: &JavaType, to_name: &str) -> bool {
	match from.box_type() {
		Some(box_name) => {
			to_name == box_name
				|| to_name == "java/lang/Object"
				|| (to_name == "java/lang/Number" && !matches!(from, JavaType::Boolean | JavaType::Char))
		},
		None => false,
	}
}

pub(crate) fn value_assignable(literal: &Literal, return_type: &ReturnType) -> bool {
	let Some(target) = return_type.as_value() else {
		return false;
	};
	let from = literal.java_type();
	match target {
		JavaType::Object(name) => match &from {
			JavaType::Object(literal_name) => {
				literal_name == name
					|| name.as_ref() == "java/lang/Object"
					|| name.as_ref() == "java/lang/CharSequence"
			},
			primitive => boxes_to(primitive, name),
		},
		_ => widens_to(&from, target),
	}
}

pub(crate) fn reference_assignable(catalog: &ModuleCatalog, from: &str, to: &str) -> bool {
	from == to || to == "java/lang/Object" || catalog.depth_between(from, to).is_some()
}

/// Whether a value of declared type `from` can be passed to a parameter of
/// type `to`, with widening and boxing.
fn argument_assignable(catalog: &ModuleCatalog, from: &JavaType, to: &JavaType) -> bool {
	match (from, to) {
		(JavaType::Object(from), JavaType::Object(to)) => reference_assignable(catalog, from, to),
		(JavaType::Array { .. }, JavaType::Object(to)) => to.as_ref() == "java/lang/Object",
		(from, to) if from == to => true,
		(from, JavaType::Object(to)) => boxes_to(from, to),
		(from, to) => widens_to(from, to),
	}
}

const CALLER_CLASS: &str = "java/lang/Class";

/// Splits a custom method's parameters into (takes caller class, takes
/// receiver, argument slice), matching against the target's parameter list.
fn split_custom_params<'l>(
	catalog: &ModuleCatalog,
	custom_params: &'l [JavaType],
	target_class: &str,
	target_params: &[JavaType],
) -> Result<(bool, bool, &'l [JavaType]), String> {
	let mut rest = custom_params;
	let mut takes_caller = false;

	if rest.len() == target_params.len() + 2 || rest.len() == target_params.len() + 1 {
		if let Some(JavaType::Object(first)) = rest.first() {
			if first.as_ref() == CALLER_CLASS && rest.len() == target_params.len() + 2 {
				takes_caller = true;
				rest = &rest[1..];
			} else if first.as_ref() == CALLER_CLASS
				&& rest.len() == target_params.len() + 1
				&& !reference_assignable(catalog, target_class, first)
			{
				takes_caller = true;
				rest = &rest[1..];
			}
		}
	}

	let takes_receiver = match rest.len() {
		n if n == target_params.len() => false,
		n if n == target_params.len() + 1 => {
			let Some(JavaType::Object(receiver)) = rest.first() else {
				return Err("receiver parameter must be a reference type".into());
			};
			if !reference_assignable(catalog, target_class, receiver) {
				return Err(format!("receiver parameter `{receiver}` cannot accept `{target_class}`"));
			}
			rest = &rest[1..];
			true
		},
		_ => return Err("parameter count does not match the denied member".into()),
	};

	Ok((takes_caller, takes_receiver, rest))
}

fn custom_fits(
	catalog: &ModuleCatalog,
	custom: &CustomInfo,
	info: &ClassInfo,
	target: &MethodDescriptor,
	is_constructor: bool,
) -> Result<(), String> {
	let descriptor = MethodDescriptor::parse(&custom.descriptor)
		.map_err(|_| "malformed descriptor".to_string())?;

	let (_caller, _receiver, arguments) = split_custom_params(
		catalog,
		&descriptor.parameters,
		&info.internal_name,
		&target.parameters,
	)?;

	for (argument, parameter) in arguments.iter().zip(&target.parameters) {
		if !argument_assignable(catalog, parameter, argument) {
			return Err(format!("argument `{parameter}` does not fit parameter `{argument}`"));
		}
	}

	match (is_constructor, &target.return_type) {
		(true, _) => match descriptor.return_type.as_value() {
			Some(JavaType::Object(returned))
				if reference_assignable(catalog, returned, &info.internal_name)
					|| reference_assignable(catalog, &info.internal_name, returned) =>
			{
				Ok(())
			},
			_ => Err("constructor replacement must return the constructed type".into()),
		},
		(false, ReturnType::Void) => Ok(()),
		(false, ReturnType::Value(target_return)) => {
			let Some(returned) = descriptor.return_type.as_value() else {
				return Err("replacement returns void for a value-returning member".into());
			};
			let fits = match (returned, target_return) {
				(JavaType::Object(from), JavaType::Object(to)) => reference_assignable(catalog, from, to),
				(from, to) if from == to => true,
				(JavaType::Object(from), to) => {
					// Unboxing to the declared primitive return.
					to.box_type() == Some(from.as_ref())
				},
				(from, JavaType::Object(to)) => boxes_to(from, to),
				(from, to) => widens_to(from, to),
			};
			match fits {
				true => Ok(()),
				false => Err(format!("return `{}` does not fit `{target_return}`", descriptor.return_type)),
			}
		},
	}
}

fn predicate_fits(
	catalog: &ModuleCatalog,
	predicate: &CustomInfo,
	target: &MethodDescriptor,
) -> Result<(), String> {
	let descriptor = MethodDescriptor::parse(&predicate.descriptor)
		.map_err(|_| "malformed descriptor".to_string())?;

	if descriptor.return_type != ReturnType::Value(JavaType::Boolean) {
		return Err("predicate must return boolean".into());
	}

	let mut params = descriptor.parameters.as_slice();
	if params.len() == target.parameters.len() + 1 {
		match params.first() {
			Some(JavaType::Object(first)) if first.as_ref() == CALLER_CLASS => params = &params[1..],
			_ => return Err("parameter count does not match the denied member".into()),
		}
	}
	if params.len() != target.parameters.len() {
		return Err("parameter count does not match the denied member".into());
	}

	for (parameter, argument) in target.parameters.iter().zip(params) {
		if !argument_assignable(catalog, parameter, argument) {
			return Err(format!("argument `{parameter}` does not fit parameter `{argument}`"));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::builder::RulesBuilder;
	use crate::policy::catalog::ModuleCatalog;

	fn catalog() -> Arc<ModuleCatalog> {
		ModuleCatalog::builder()
			.module("java.base", |module| {
				module
					.class("java/lang/Object", |class| {
						class.constructor("()V");
					})
					.class("java/lang/SecurityException", |class| {
						class.constructor("()V").constructor("(Ljava/lang/String;)V");
					})
					.class("java/lang/IllegalStateException", |class| {
						class.constructor("()V");
					})
					.class("java/lang/System", |class| {
						class
							.method("exit", "(I)V")
							.method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;")
							.method("nanoTime", "()J");
					});
			})
			.module("app", |module| {
				module.reads("java.base").class("com/example/Checks", |class| {
					class
						.method("allowExit", "(I)Z")
						.method("replaceProperty", "(Ljava/lang/String;)Ljava/lang/String;")
						.method("badReturn", "(I)V");
				});
			})
			.build()
	}

	fn class_scope(builder: &mut RulesBuilder) -> crate::policy::builder::ClassScope<'_> {
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/System")
	}

	#[test]
	fn unknown_class_is_reported() {
		let mut builder = RulesBuilder::new(catalog());
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/Missing")
			.deny_all(DenyAction::Standard);
		assert!(matches!(builder.build(), Err(PolicyError::UnknownClass(_))));
	}

	#[test]
	fn unknown_method_and_variant_are_reported() {
		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_method(DenyAction::Standard, "halt");
		assert!(matches!(builder.build(), Err(PolicyError::UnknownMethod { .. })));

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(DenyAction::Standard, "exit", "(J)");
		assert!(matches!(builder.build(), Err(PolicyError::UnknownVariant { .. })));
	}

	#[test]
	fn broad_rules_tolerate_unknown_scopes() {
		let mut builder = RulesBuilder::new(catalog());
		builder.for_module("jdk.unsupported").deny_all(DenyAction::Standard);
		assert!(builder.build().is_ok());
	}

	#[test]
	fn exception_actions_need_matching_constructors() {
		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_method(
			DenyAction::Exception {
				class_name: Arc::from("java/lang/IllegalStateException"),
				message: Some(Arc::from("denied")),
			},
			"exit",
		);
		assert!(matches!(
			builder.build(),
			Err(PolicyError::MissingExceptionConstructor { .. })
		));

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_method(
			DenyAction::Exception {
				class_name: Arc::from("java/lang/SecurityException"),
				message: Some(Arc::from("denied")),
			},
			"exit",
		);
		assert!(builder.build().is_ok());
	}

	#[test]
	fn value_actions_must_widen_to_the_return() {
		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(DenyAction::Value(Literal::Int(7)), "nanoTime", "()");
		assert!(builder.build().is_ok(), "int widens to long");

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(
			DenyAction::Value(Literal::String(Arc::from("x"))),
			"exit",
			"(I)",
		);
		assert!(matches!(builder.build(), Err(PolicyError::UnassignableValue { .. })));
	}

	#[test]
	fn custom_actions_must_fit_the_member() {
		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(
			DenyAction::Custom(CustomInfo::new(
				"com/example/Checks",
				"replaceProperty",
				"(Ljava/lang/String;)Ljava/lang/String;",
			)),
			"getProperty",
			"(Ljava/lang/String;)",
		);
		assert!(builder.build().is_ok());

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(
			DenyAction::Custom(CustomInfo::new("com/example/Checks", "badReturn", "(I)V")),
			"getProperty",
			"(Ljava/lang/String;)",
		);
		assert!(matches!(builder.build(), Err(PolicyError::CustomMismatch { .. })));
	}

	#[test]
	fn checked_actions_validate_predicate_and_nesting() {
		let predicate = CustomInfo::new("com/example/Checks", "allowExit", "(I)Z");

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(
			DenyAction::Checked {
				predicate: predicate.clone(),
				inner: Box::new(DenyAction::Standard),
			},
			"exit",
			"(I)",
		);
		assert!(builder.build().is_ok());

		let mut builder = RulesBuilder::new(catalog());
		class_scope(&mut builder).deny_variant(
			DenyAction::Checked {
				predicate: predicate.clone(),
				inner: Box::new(DenyAction::Checked {
					predicate,
					inner: Box::new(DenyAction::Standard),
				}),
			},
			"exit",
			"(I)",
		);
		assert!(matches!(builder.build(), Err(PolicyError::NestedChecked)));
	}

	#[test]
	fn sink_collects_every_failure() {
		let mut builder = RulesBuilder::new(catalog());
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/Missing")
			.deny_all(DenyAction::Standard);
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/System")
			.deny_method(DenyAction::Standard, "halt");

		let mut seen = vec![];
		let mut sink = |error: &PolicyError| seen.push(error.clone());
		let result = builder.validate(Some(&mut sink));
		assert!(result.is_err());
		assert_eq!(seen.len(), 2);
	}

	#[test]
	fn empty_is_rejected_for_constructors() {
		let catalog = ModuleCatalog::builder()
			.module("java.base", |module| {
				module.class("java/lang/ProcessBuilder", |class| {
					class.constructor("([Ljava/lang/String;)V");
				});
			})
			.build();
		let mut builder = RulesBuilder::new(catalog);
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/ProcessBuilder")
			.deny_all_constructors(DenyAction::Empty);
		assert!(matches!(builder.build(), Err(PolicyError::EmptyNotApplicable { .. })));
	}
}
