use std::sync::Arc;

use crate::policy::{DenyAction, Rule, Rules};
use crate::raw::bytecode::{CodeStream, OpCode};
use crate::raw::class_file::{ClassFile, MethodAccessFlags};
use crate::raw::ClassFormatError;

/// How the original invocation dispatches; checked stubs re-issue it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InvocationKind {
	Virtual,
	Static,
	Special,
	Interface,
	Constructor,
}

/// Everything the action writer needs to materialize one deny stub.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StubRequest {
	pub target_class: Arc<str>,
	pub member_name: Arc<str>,
	pub member_descriptor: Arc<str>,
	pub kind: InvocationKind,
	/// The target is declared on an interface.
	pub interface: bool,
	pub action: DenyAction,
}

/// A guarded reflective lookup site to route through the reflection gate.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LookupRequest {
	pub class_name: Arc<str>,
	pub method_name: Arc<str>,
	pub descriptor: Arc<str>,
}

#[derive(Debug, Clone)]
pub enum PlannedAction {
	/// Swap the invocation for a static call to a deny stub.
	Replace(StubRequest),
	/// Swap a constructor invocation, eliding its `new`/`dup` pair.
	ReplaceConstructor {
		request: StubRequest,
		new_slot: usize,
		dup_slot: usize,
	},
	/// Swap a reflective lookup for its gate stub.
	RedirectLookup(LookupRequest),
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
	pub slot: usize,
	pub action: PlannedAction,
}

/// An action prologue spliced ahead of a denied method's first instruction.
#[derive(Debug, Clone)]
pub struct TargetPrologue {
	pub action: DenyAction,
	pub is_static: bool,
	pub is_constructor: bool,
	pub descriptor: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct MethodPlan {
	pub method_index: usize,
	pub entries: Vec<PlanEntry>,
	pub prologue: Option<TargetPrologue>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassPlan {
	pub methods: Vec<MethodPlan>,
	/// Bootstrap-method table entries to repoint at generated bootstrap
	/// stubs, by index into the `BootstrapMethods` attribute.
	pub bootstrap: Vec<(usize, StubRequest)>,
}

impl ClassPlan {
	pub fn is_empty(&self) -> bool {
		self.methods.is_empty() && self.bootstrap.is_empty()
	}
}

/// Walks every method of `class` and decides, per invocation instruction,
/// whether to keep it, replace it with a deny stub, or redirect it to the
/// reflection gate; and, per declared method, whether a target-site
/// prologue is due.
#[tracing::instrument(skip_all, fields(class = class.this_class_name().unwrap_or("?")))]
pub fn plan_class(
	class: &ClassFile,
	caller_module: &str,
	caller_rules: &Rules,
	target_rules: &Rules,
) -> Result<ClassPlan, ClassFormatError> {
	let mut plan = ClassPlan::default();
	let this_class = class.this_class_name().unwrap_or_default().to_string();

	for (method_index, method) in class.methods.iter().enumerate() {
		let Some(code) = method.code(&class.pool) else {
			continue;
		};

		let name = class.pool.utf8(method.name).unwrap_or_default();
		let descriptor = class.pool.utf8(method.descriptor).unwrap_or_default();
		let access = MethodAccessFlags::from_bits_retain(method.access);

		let entries = plan_code(class, caller_module, caller_rules, code.code)?;
		let prologue = plan_prologue(&this_class, caller_module, target_rules, name, descriptor, access);

		if !entries.is_empty() || prologue.is_some() {
			plan.methods.push(MethodPlan { method_index, entries, prologue });
		}
	}

	plan.bootstrap = plan_bootstrap(class, caller_module, caller_rules);
	Ok(plan)
}

fn plan_prologue(
	this_class: &str,
	module: &str,
	target_rules: &Rules,
	name: &str,
	descriptor: &str,
	access: MethodAccessFlags,
) -> Option<TargetPrologue> {
	if access.contains(MethodAccessFlags::ABSTRACT) || access.contains(MethodAccessFlags::NATIVE) {
		return None;
	}
	let view = target_rules.for_class(module, this_class);
	let is_constructor = name == "<init>";
	let rule = match is_constructor {
		true => view.rule_for_constructor(descriptor),
		false => view.rule_for_method(name, descriptor),
	};
	match rule {
		Rule::DenyAtTarget(action) => Some(TargetPrologue {
			action,
			is_static: access.contains(MethodAccessFlags::STATIC),
			is_constructor,
			descriptor: Arc::from(descriptor),
		}),
		_ => None,
	}
}

fn plan_code(
	class: &ClassFile,
	caller_module: &str,
	caller_rules: &Rules,
	code: &[u8],
) -> Result<Vec<PlanEntry>, ClassFormatError> {
	let stream = CodeStream::decode(code)?;
	let mut entries = vec![];
	// Pending `new` instructions, innermost last. Constructor invocations
	// pair with the most recent allocation of the same class.
	let mut pending_new: Vec<(usize, &str)> = vec![];

	for slot in 0..stream.slot_count() {
		let instruction = stream.instruction(slot);

		if let OpCode::new_(index) = instruction {
			let allocated = class
				.pool
				.class_name(crate::raw::constant_pool::ClassIndex(*index))
				.unwrap_or_default();
			pending_new.push((slot, allocated));
			continue;
		}

		let Some(pool_index) = instruction.invocation_pool_index() else {
			continue;
		};
		let Some(member) = class.pool.member_ref(pool_index) else {
			return Err(ClassFormatError::Malformed(format!(
				"Invocation of unresolvable constant-pool entry {pool_index}"
			)));
		};

		// Reflective and method-handle lookups get routed through the gate
		// whenever this caller is subject to any caller-side deny.
		if caller_rules.has_caller_denies()
			&& caller_rules.guarded_lookups().iter().any(|lookup| {
				lookup.class_name.as_ref() == member.class_name
					&& lookup.method_name.as_ref() == member.name
			}) {
			entries.push(PlanEntry {
				slot,
				action: PlannedAction::RedirectLookup(LookupRequest {
					class_name: Arc::from(member.class_name),
					method_name: Arc::from(member.name),
					descriptor: Arc::from(member.descriptor),
				}),
			});
			continue;
		}

		let view = caller_rules.for_class(caller_module, member.class_name);
		let is_init = member.name == "<init>";

		if is_init {
			let rule = view.rule_for_constructor(member.descriptor);
			let Rule::DenyAtCaller(action) = rule else {
				// Allowed, or enforced at the target's entry instead.
				if matches!(instruction, OpCode::invokespecial(_)) {
					pop_matching_new(&mut pending_new, member.class_name);
				}
				continue;
			};

			let Some((new_slot, _)) = pop_matching_new(&mut pending_new, member.class_name) else {
				// A super()/this() call cannot be denied at this site; the
				// constructor itself is rewritten when its class loads.
				continue;
			};
			let dup_slot = new_slot + 1;
			if !matches!(stream.instruction(dup_slot), OpCode::dup) {
				return Err(ClassFormatError::Malformed(format!(
					"Unpaired allocation of {}",
					member.class_name
				)));
			}

			entries.push(PlanEntry {
				slot,
				action: PlannedAction::ReplaceConstructor {
					request: StubRequest {
						target_class: Arc::from(member.class_name),
						member_name: Arc::from(member.name),
						member_descriptor: Arc::from(member.descriptor),
						kind: InvocationKind::Constructor,
						interface: false,
						action,
					},
					new_slot,
					dup_slot,
				},
			});
			continue;
		}

		let mut rule = view.rule_for_method(member.name, member.descriptor);
		if !rule.is_deny() {
			// A deeper subclass deny reaches calls expressed against this
			// type.
			if let Some(deny) = caller_rules.subtype_deny(member.class_name, member.name, member.descriptor) {
				rule = deny.clone();
			}
		}

		let Rule::DenyAtCaller(action) = rule else {
			continue;
		};

		let kind = match instruction {
			OpCode::invokevirtual(_) => InvocationKind::Virtual,
			OpCode::invokestatic(_) => InvocationKind::Static,
			OpCode::invokespecial(_) => InvocationKind::Special,
			OpCode::invokeinterface(_) => InvocationKind::Interface,
			_ => continue,
		};

		entries.push(PlanEntry {
			slot,
			action: PlannedAction::Replace(StubRequest {
				target_class: Arc::from(member.class_name),
				member_name: Arc::from(member.name),
				member_descriptor: Arc::from(member.descriptor),
				kind,
				interface: member.interface,
				action,
			}),
		});
	}

	Ok(entries)
}

fn pop_matching_new<'l>(pending: &mut Vec<(usize, &'l str)>, class_name: &str) -> Option<(usize, &'l str)> {
	match pending.last() {
		Some((_, allocated)) if *allocated == class_name => pending.pop(),
		_ => None,
	}
}

/// Invoke-dynamic sites resolve through the bootstrap-methods table; a
/// bootstrap handle landing on a denied member gets the whole table entry
/// repointed at a generated bootstrap stub.
fn plan_bootstrap(class: &ClassFile, caller_module: &str, caller_rules: &Rules) -> Vec<(usize, StubRequest)> {
	let Some(bootstrap) = class.bootstrap_methods() else {
		return vec![];
	};

	let mut planned = vec![];
	for (index, method) in bootstrap.methods.iter().enumerate() {
		let Some(crate::raw::constant_pool::Constant::MethodHandle { reference, .. }) =
			class.pool.get(method.method_ref)
		else {
			continue;
		};
		let Some(member) = class.pool.member_ref(*reference) else {
			continue;
		};

		let view = caller_rules.for_class(caller_module, member.class_name);
		let rule = match member.name == "<init>" {
			true => view.rule_for_constructor(member.descriptor),
			false => view.rule_for_method(member.name, member.descriptor),
		};
		let Rule::DenyAtCaller(action) = rule else {
			continue;
		};

		planned.push((
			index,
			StubRequest {
				target_class: Arc::from(member.class_name),
				member_name: Arc::from(member.name),
				member_descriptor: Arc::from(member.descriptor),
				kind: InvocationKind::Static,
				interface: member.interface,
				action,
			},
		));
	}
	planned
}
