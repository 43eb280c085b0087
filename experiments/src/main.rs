use std::time::SystemTime;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use boxtin::policy::catalog::ModuleCatalog;
use boxtin::policy::{DenyAction, RulesBuilder};
use boxtin::raw::builder::{ClassWriter, CodeWriter};
use boxtin::raw::bytecode::OpCode;
use boxtin::raw::class_file::{ClassAccessFlags, MethodAccessFlags};
use boxtin::transform::transform_class;

fn setup_global_subscriber() {
	let subscriber = Registry::default()
		.with(EnvFilter::from_default_env())
		.with(tracing_subscriber::fmt::layer());
	tracing::subscriber::set_global_default(subscriber).expect("Could not set global default");
}

/// A caller that invokes `System.exit(1)`; the transform must swap the call
/// for an `Empty` stub so it returns normally.
fn synthesize_caller() -> Vec<u8> {
	let mut writer = ClassWriter::new(
		52,
		ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
		"com/demo/Main",
		"java/lang/Object",
	);
	let exit = writer.pool.intern_method_ref("java/lang/System", "exit", "(I)V");

	let mut code = CodeWriter::new(1, 0);
	code.op(OpCode::iconst_1)
		.op(OpCode::invokestatic(exit.0))
		.op(OpCode::return_);
	writer.method(
		MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
		"run",
		"()V",
		Some(code),
	);
	writer.finish()
}

fn main() {
	setup_global_subscriber();

	let mut start = SystemTime::now();
	let catalog = ModuleCatalog::builder()
		.module("java.base", |module| {
			module.class("java/lang/System", |class| {
				class.method("exit", "(I)V");
			});
		})
		.module("app", |module| {
			module.reads("java.base").class("com/demo/Main", |class| {
				class.method("run", "()V").constructor("()V");
			});
		})
		.build();

	let mut builder = RulesBuilder::new(catalog);
	builder
		.for_module("java.base")
		.for_package("java/lang")
		.for_class("java/lang/System")
		.deny_method(DenyAction::Empty, "exit");
	let rules = builder.build().expect("rules must validate");

	println!("Rules build time: {:?}", start.elapsed().unwrap());

	let bytes = synthesize_caller();
	start = SystemTime::now();
	let output = transform_class("app", "com/demo/Main", &bytes, &rules, &rules)
		.expect("transform must succeed")
		.expect("a denied call site must rewrite the class");

	println! {
		"Transform time: {:?}, {} -> {} bytes, {} helper(s)",
		start.elapsed().unwrap(),
		bytes.len(),
		output.class_bytes.len(),
		output.helpers.len(),
	}

	for helper in &output.helpers {
		println!("Helper {}: {} bytes", helper.internal_name, helper.bytes.len());
	}
}
