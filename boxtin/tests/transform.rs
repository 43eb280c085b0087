use std::sync::Arc;

use pretty_assertions::assert_eq;

use boxtin::policy::catalog::ModuleCatalog;
use boxtin::policy::{CustomInfo, DenyAction, Literal, Rules, RulesBuilder};
use boxtin::raw::attributes::{BootstrapMethods, FrameKind, VerificationType};
use boxtin::raw::builder::{ClassWriter, CodeWriter};
use boxtin::raw::bytecode::{DynamicInvocation, InterfaceInvocation, OpCode, OpCodeIterator};
use boxtin::raw::class_file::{ClassAccessFlags, ClassFile, MethodAccessFlags};
use boxtin::raw::constant_pool::Constant;
use boxtin::transform::transform_class;
use boxtin::{Agent, Controller, ControllerFactory};

const MAIN: &str = "com/example/Main";
const HELPER: &str = "com/example/Main$$BoxtinActions";

fn catalog() -> Arc<ModuleCatalog> {
	ModuleCatalog::builder()
		.module("java.base", |module| {
			module
				.class("java/lang/Object", |class| {
					class.method("toString", "()Ljava/lang/String;").constructor("()V");
				})
				.class("java/lang/SecurityException", |class| {
					class.constructor("()V").constructor("(Ljava/lang/String;)V");
				})
				.class("java/lang/System", |class| {
					class
						.method("exit", "(I)V")
						.method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;")
						.method("getProperty", "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;");
				})
				.class("java/lang/Class", |class| {
					class.method("getMethod", "(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;");
				})
				.class("java/io/FileInputStream", |class| {
					class
						.constructor("(Ljava/lang/String;)V")
						.constructor("(Ljava/io/File;)V");
				})
				.class("java/util/Map", |class| {
					class.method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;");
				});
		})
		.module("app", |module| {
			module
				.reads("java.base")
				.class(MAIN, |class| {
					class.method("run", "()V").constructor("()V");
				})
				.class("com/example/Provider", |class| {
					class
						.implements("java/util/Map")
						.method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")
						.constructor("()V");
				})
				.class("com/example/DynamicOps", |class| {
					class
						.method("op1", "()Ljava/lang/String;")
						.method("op1", "(I)I")
						.constructor("()V");
				})
				.class("com/example/Checks", |class| {
					class.method("allowOp", "(I)Z");
				});
		})
		.build()
}

fn allow_all() -> Arc<Rules> {
	RulesBuilder::new(catalog()).build().unwrap()
}

fn build_main(configure: impl FnOnce(&mut ClassWriter)) -> Vec<u8> {
	let mut writer = ClassWriter::new(
		52,
		ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
		MAIN,
		"java/lang/Object",
	);
	configure(&mut writer);
	writer.finish()
}

fn method_ops(bytes: &[u8], method: &str) -> Vec<(u32, OpCode)> {
	let class = ClassFile::parse(bytes).unwrap();
	let member = class
		.methods
		.iter()
		.find(|m| class.pool.utf8(m.name) == Some(method))
		.unwrap_or_else(|| panic!("no method `{method}`"));
	let code = member.code(&class.pool).unwrap();
	OpCodeIterator::new(code.code)
		.map(|(offset, op)| (offset, op.unwrap()))
		.collect()
}

fn opcodes(ops: &[(u32, OpCode)]) -> Vec<u8> {
	ops.iter().map(|(_, op)| op.opcode()).collect()
}

/// Resolves the helper-class stub a rewritten call site lands on.
fn stub_target(bytes: &[u8], method: &str, at: usize) -> (String, String, String) {
	let class = ClassFile::parse(bytes).unwrap();
	let ops = method_ops(bytes, method);
	let OpCode::invokestatic(index) = &ops[at].1 else {
		panic!("expected invokestatic at {at}, found {:?}", ops[at].1);
	};
	let member = class.pool.member_ref(*index).unwrap();
	(member.class_name.to_string(), member.name.to_string(), member.descriptor.to_string())
}

fn helper_stub_ops(helper_bytes: &[u8], stub_name: &str) -> Vec<(u32, OpCode)> {
	method_ops(helper_bytes, stub_name)
}

#[test]
fn all_allow_policies_leave_classes_untouched() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let mut code = CodeWriter::new(1, 0);
		code.op(OpCode::iconst_1).op(OpCode::invokestatic(exit.0)).op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let rules = allow_all();
	let result = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap();
	assert!(result.is_none());

	// And the codec round-trips the class byte-for-byte.
	let parsed = ClassFile::parse(&bytes).unwrap();
	assert_eq!(parsed.emit(&Default::default(), None), bytes);
}

#[test]
fn denied_call_sites_are_replaced_with_throwing_stubs() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let mut code = CodeWriter::new(1, 0);
		code.op(OpCode::iconst_1).op(OpCode::invokestatic(exit.0)).op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();

	let (stub_class, stub_name, stub_descriptor) = stub_target(&output.class_bytes, "run", 1);
	assert_eq!(stub_class, HELPER);
	assert!(stub_name.starts_with("deny_"));
	assert_eq!(stub_descriptor, "(I)V");

	assert_eq!(output.helpers.len(), 1);
	let helper = &output.helpers[0];
	assert_eq!(helper.internal_name.as_ref(), HELPER);

	// new SecurityException; dup; invokespecial <init>; athrow
	let stub_ops = helper_stub_ops(&helper.bytes, &stub_name);
	assert_eq!(opcodes(&stub_ops), [0xbb, 0x59, 0xb7, 0xbf]);

	let helper_class = ClassFile::parse(&helper.bytes).unwrap();
	let OpCode::new_(exception) = &stub_ops[0].1 else { unreachable!() };
	assert_eq!(
		helper_class.pool.class_name(boxtin::raw::constant_pool::ClassIndex(*exception)),
		Some("java/lang/SecurityException"),
	);
}

#[test]
fn empty_actions_return_normally() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let mut code = CodeWriter::new(1, 0);
		code.op(OpCode::iconst_1).op(OpCode::invokestatic(exit.0)).op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Empty, "exit");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let (_, stub_name, _) = stub_target(&output.class_bytes, "run", 1);
	let stub_ops = helper_stub_ops(&output.helpers[0].bytes, &stub_name);
	assert_eq!(opcodes(&stub_ops), [0xb1]);
}

#[test]
fn value_actions_substitute_the_result() {
	let bytes = build_main(|writer| {
		let op1 = writer.pool.intern_method_ref("com/example/DynamicOps", "op1", "()Ljava/lang/String;");
		let mut code = CodeWriter::new(1, 1);
		code.op(OpCode::aload_0).op(OpCode::invokevirtual(op1.0)).op(OpCode::areturn);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"call",
			"(Lcom/example/DynamicOps;)Ljava/lang/String;",
			Some(code),
		);
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("app")
		.for_package("com/example")
		.for_class("com/example/DynamicOps")
		.deny_variant(DenyAction::Value(Literal::String(Arc::from("denied1"))), "op1", "()");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let (_, stub_name, stub_descriptor) = stub_target(&output.class_bytes, "call", 1);
	assert_eq!(stub_descriptor, "(Lcom/example/DynamicOps;)Ljava/lang/String;");

	let helper = &output.helpers[0];
	let stub_ops = helper_stub_ops(&helper.bytes, &stub_name);
	assert_eq!(opcodes(&stub_ops), [0x13, 0xb0]);

	let helper_class = ClassFile::parse(&helper.bytes).unwrap();
	let OpCode::ldc_w(index) = &stub_ops[0].1 else { unreachable!() };
	let Some(Constant::String { value }) = helper_class.pool.get(*index) else {
		panic!("expected a string constant");
	};
	assert_eq!(helper_class.pool.utf8(*value), Some("denied1"));
}

#[test]
fn checked_actions_gate_the_original_call() {
	let bytes = build_main(|writer| {
		let op1 = writer.pool.intern_method_ref("com/example/DynamicOps", "op1", "(I)I");
		let mut code = CodeWriter::new(2, 2);
		code.op(OpCode::aload_0)
			.op(OpCode::iload_1)
			.op(OpCode::invokevirtual(op1.0))
			.op(OpCode::ireturn);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"call",
			"(Lcom/example/DynamicOps;I)I",
			Some(code),
		);
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("app")
		.for_package("com/example")
		.for_class("com/example/DynamicOps")
		.deny_variant(
			DenyAction::Checked {
				predicate: CustomInfo::new("com/example/Checks", "allowOp", "(I)Z"),
				inner: Box::new(DenyAction::Standard),
			},
			"op1",
			"(I)",
		);
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let (_, stub_name, stub_descriptor) = stub_target(&output.class_bytes, "call", 2);
	assert_eq!(stub_descriptor, "(Lcom/example/DynamicOps;I)I");

	let helper = &output.helpers[0];
	let stub_ops = helper_stub_ops(&helper.bytes, &stub_name);
	// iload_1; invokestatic predicate; ifeq; aload_0; iload_1;
	// invokevirtual op1; ireturn; new; dup; invokespecial; athrow
	assert_eq!(
		opcodes(&stub_ops),
		[0x1b, 0xb8, 0x99, 0x2a, 0x1b, 0xb6, 0xac, 0xbb, 0x59, 0xb7, 0xbf],
	);

	// The predicate-rejected branch begins at a full frame.
	let helper_class = ClassFile::parse(&helper.bytes).unwrap();
	let member = helper_class
		.methods
		.iter()
		.find(|m| helper_class.pool.utf8(m.name) == Some(stub_name.as_str()))
		.unwrap();
	let code = member.code(&helper_class.pool).unwrap();
	let table = code.stack_map(&helper_class.pool).unwrap();
	assert_eq!(table.frames.len(), 1);
	assert_eq!(table.frames[0].offset, stub_ops[7].0);
	let FrameKind::Full { locals, stack } = &table.frames[0].kind else {
		panic!("expected a full frame");
	};
	assert!(stack.is_empty());
	assert_eq!(locals.len(), 2);
	assert_eq!(locals[1], VerificationType::Integer);
}

#[test]
fn constructor_denials_elide_the_allocation() {
	let bytes = build_main(|writer| {
		let class = writer.pool.intern_class("java/io/FileInputStream");
		let init = writer
			.pool
			.intern_method_ref("java/io/FileInputStream", "<init>", "(Ljava/lang/String;)V");
		let path = writer.pool.intern_string("x");
		let mut code = CodeWriter::new(3, 0);
		code.op(OpCode::new_(class.0))
			.op(OpCode::dup)
			.op(OpCode::ldc_w(path))
			.op(OpCode::invokespecial(init.0))
			.op(OpCode::areturn);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"open",
			"()Ljava/io/FileInputStream;",
			Some(code),
		);
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/io")
		.for_class("java/io/FileInputStream")
		.deny_constructor(DenyAction::Standard, "(Ljava/lang/String;)");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();

	let ops = method_ops(&output.class_bytes, "open");
	// ldc_w "x"; invokestatic stub; areturn, with new/dup elided
	assert_eq!(opcodes(&ops), [0x13, 0xb8, 0xb0]);

	let (stub_class, stub_name, stub_descriptor) = stub_target(&output.class_bytes, "open", 1);
	assert_eq!(stub_class, HELPER);
	assert_eq!(stub_descriptor, "(Ljava/lang/String;)Ljava/io/FileInputStream;");

	let stub_ops = helper_stub_ops(&output.helpers[0].bytes, &stub_name);
	assert_eq!(opcodes(&stub_ops), [0xbb, 0x59, 0xb7, 0xbf]);
}

#[test]
fn subclass_denials_reach_calls_through_interface_references() {
	let bytes = build_main(|writer| {
		let put = writer.pool.intern_interface_method_ref(
			"java/util/Map",
			"put",
			"(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
		);
		let mut code = CodeWriter::new(3, 1);
		code.op(OpCode::aload_0)
			.op(OpCode::aconst_null)
			.op(OpCode::aconst_null)
			.op(OpCode::invokeinterface(InterfaceInvocation { method: put.0, count: 3 }))
			.op(OpCode::pop)
			.op(OpCode::return_);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"use",
			"(Ljava/util/Map;)V",
			Some(code),
		);
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("app")
		.for_package("com/example")
		.for_class("com/example/Provider")
		.deny_all(DenyAction::Standard);
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let ops = method_ops(&output.class_bytes, "use");
	assert_eq!(opcodes(&ops), [0x2a, 0x01, 0x01, 0xb8, 0x57, 0xb1]);

	let (stub_class, _, stub_descriptor) = stub_target(&output.class_bytes, "use", 3);
	assert_eq!(stub_class, HELPER);
	assert_eq!(
		stub_descriptor,
		"(Ljava/util/Map;Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
	);
}

#[test]
fn reflective_lookups_route_through_the_gate() {
	let bytes = build_main(|writer| {
		let get_method = writer.pool.intern_method_ref(
			"java/lang/Class",
			"getMethod",
			"(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
		);
		let mut code = CodeWriter::new(3, 1);
		code.op(OpCode::aload_0)
			.op(OpCode::aconst_null)
			.op(OpCode::aconst_null)
			.op(OpCode::invokevirtual(get_method.0))
			.op(OpCode::areturn);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"lookup",
			"(Ljava/lang/Class;)Ljava/lang/reflect/Method;",
			Some(code),
		);
	});

	// Any caller-side deny arms the redirection.
	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let (stub_class, stub_name, stub_descriptor) = stub_target(&output.class_bytes, "lookup", 3);
	assert_eq!(stub_class, HELPER);
	assert!(stub_name.starts_with("gate_"));
	assert_eq!(
		stub_descriptor,
		"(Ljava/lang/Class;Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
	);

	let stub_ops = helper_stub_ops(&output.helpers[0].bytes, &stub_name);
	let bytes_only = opcodes(&stub_ops);
	// allows(...) gate, a NoSuchMethodException throw, then the forwarded
	// lookup.
	assert_eq!(
		bytes_only,
		[0x2a, 0x2b, 0x2c, 0xb8, 0x9a, 0xbb, 0x59, 0xb7, 0xbf, 0x2a, 0x2b, 0x2c, 0xb6, 0xb0],
	);
}

#[test]
fn target_side_denials_guard_the_method_entry() {
	let bytes = build_main(|writer| {
		let mut code = CodeWriter::new(0, 0);
		code.op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("app")
		.for_package("com/example")
		.for_class(MAIN)
		.deny_method_at_target(DenyAction::Standard, "run");
	let target_rules = builder.build().unwrap();
	let caller_rules = allow_all();

	let output = transform_class("app", MAIN, &bytes, &caller_rules, &target_rules)
		.unwrap()
		.unwrap();
	assert!(output.helpers.is_empty(), "target-site prologues need no helper class");

	let ops = method_ops(&output.class_bytes, "run");
	assert_eq!(opcodes(&ops), [0xbb, 0x59, 0xb7, 0xbf, 0xb1]);

	let class = ClassFile::parse(&output.class_bytes).unwrap();
	let member = &class.methods[0];
	let code = member.code(&class.pool).unwrap();
	let table = code.stack_map(&class.pool).unwrap();
	assert_eq!(table.frames.len(), 1);
	assert_eq!(table.frames[0].offset, 8);
	assert_eq!(
		table.frames[0].kind,
		FrameKind::Full { locals: vec![], stack: vec![] },
	);
}

#[test]
fn transforms_are_deterministic() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let get = writer.pool.intern_method_ref(
			"java/lang/System",
			"getProperty",
			"(Ljava/lang/String;)Ljava/lang/String;",
		);
		let mut code = CodeWriter::new(1, 0);
		code.op(OpCode::iconst_1)
			.op(OpCode::invokestatic(exit.0))
			.op(OpCode::aconst_null)
			.op(OpCode::invokestatic(get.0))
			.op(OpCode::pop)
			.op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let rules = builder.build().unwrap();

	let first = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let second = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	assert_eq!(first.class_bytes, second.class_bytes);
	assert_eq!(first.helpers, second.helpers);
}

#[test]
fn kept_sites_stay_kept_as_the_policy_tightens() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let get = writer.pool.intern_method_ref(
			"java/lang/System",
			"getProperty",
			"(Ljava/lang/String;)Ljava/lang/String;",
		);
		let mut code = CodeWriter::new(1, 0);
		code.op(OpCode::iconst_1)
			.op(OpCode::invokestatic(exit.0))
			.op(OpCode::aconst_null)
			.op(OpCode::invokestatic(get.0))
			.op(OpCode::pop)
			.op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let permissive = allow_all();
	assert!(transform_class("app", MAIN, &bytes, &permissive, &permissive).unwrap().is_none());

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let restrictive = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &restrictive, &restrictive)
		.unwrap()
		.unwrap();
	let ops = method_ops(&output.class_bytes, "run");
	// The getProperty site stays a direct call to System under both
	// policies; only the exit site moved to the helper.
	let class = ClassFile::parse(&output.class_bytes).unwrap();
	let OpCode::invokestatic(kept) = &ops[3].1 else { panic!() };
	assert_eq!(class.pool.member_ref(*kept).unwrap().class_name, "java/lang/System");
	let OpCode::invokestatic(moved) = &ops[1].1 else { panic!() };
	assert_eq!(class.pool.member_ref(*moved).unwrap().class_name, HELPER);
}

#[test]
fn denied_bootstrap_targets_are_repointed() {
	use boxtin::raw::constant_pool::MethodHandleKind;

	let bytes = {
		let mut writer = ClassWriter::new(
			52,
			ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
			MAIN,
			"java/lang/Object",
		);
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let handle = writer.pool.intern_method_handle(MethodHandleKind::InvokeStatic, exit.0);
		let stray_argument = writer.pool.intern_string("static-arg");
		let call_site = writer.pool.intern_invoke_dynamic(0, "run", "()V");

		let mut body = vec![];
		BootstrapMethods {
			methods: vec![boxtin::raw::attributes::BootstrapMethod {
				method_ref: handle,
				arguments: vec![stray_argument],
			}],
		}
		.write(&mut body);
		writer.attribute("BootstrapMethods", body);

		let mut code = CodeWriter::new(0, 0);
		code.op(OpCode::invokedynamic(DynamicInvocation { call_site }))
			.op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
		writer.finish()
	};

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let rules = builder.build().unwrap();

	let output = transform_class("app", MAIN, &bytes, &rules, &rules).unwrap().unwrap();
	let class = ClassFile::parse(&output.class_bytes).unwrap();
	let bootstrap = class.bootstrap_methods().unwrap();
	assert!(bootstrap.methods[0].arguments.is_empty());

	let Some(Constant::MethodHandle { kind, reference }) = class.pool.get(bootstrap.methods[0].method_ref)
	else {
		panic!("expected a method handle");
	};
	assert_eq!(*kind, MethodHandleKind::InvokeStatic);
	let member = class.pool.member_ref(*reference).unwrap();
	assert_eq!(member.class_name, HELPER);
	assert!(member.name.starts_with("bootstrap_"));

	let stub_ops = helper_stub_ops(&output.helpers[0].bytes, member.name);
	assert_eq!(opcodes(&stub_ops), [0xbb, 0x59, 0xb7, 0xbf]);
}

struct FixedRules(Arc<Rules>);

impl Controller for FixedRules {
	fn rules_for_caller(&self, _module: &str) -> Arc<Rules> {
		self.0.clone()
	}
}

struct FixedRulesFactory(Arc<Rules>);

impl ControllerFactory for FixedRulesFactory {
	fn create(&self, _args: Option<&str>) -> Result<Arc<dyn Controller>, boxtin::AgentError> {
		Ok(Arc::new(FixedRules(self.0.clone())))
	}
}

#[test]
fn oversize_methods_are_replaced_with_the_empty_class_form() {
	let bytes = build_main(|writer| {
		let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		let mut code = CodeWriter::new(1, 0);
		for _ in 0..70_000 {
			code.op(OpCode::nop);
		}
		code.op(OpCode::iconst_1).op(OpCode::invokestatic(exit.0)).op(OpCode::return_);
		writer.method(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "run", "()V", Some(code));
	});

	let mut builder = RulesBuilder::new(catalog());
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Standard, "exit");
	let rules = builder.build().unwrap();

	let agent = Agent::new();
	agent.register_controller("fixed", Arc::new(FixedRulesFactory(rules)));
	agent.premain("fixed").unwrap();
	agent.activate().unwrap();

	let output = agent.transform("app", MAIN, &bytes).unwrap();
	let class = ClassFile::parse(&output.class_bytes).unwrap();
	assert_eq!(class.this_class_name(), Some(MAIN));
	assert!(class.methods.is_empty());
	assert!(output.helpers.is_empty());
}
