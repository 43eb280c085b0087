use std::sync::Arc;

use fxhash::FxHashMap;

use crate::policy::catalog::ModuleCatalog;
use crate::policy::{DenyAction, Literal};
use crate::raw::builder::{ClassWriter, CodeWriter};
use crate::raw::bytecode::{InterfaceInvocation, OpCode};
use crate::raw::attributes::{FrameKind, StackMapFrame, VerificationType};
use crate::raw::class_file::{ClassAccessFlags, MethodAccessFlags};
use crate::raw::constant_pool::ConstantPool;
use crate::raw::descriptor::{JavaType, MethodDescriptor, ReturnType};
use crate::raw::ClassFormatError;
use crate::transform::planner::{InvocationKind, LookupRequest, StubRequest};

pub const HELPER_SUFFIX: &str = "$$BoxtinActions";
pub const SECURITY_EXCEPTION: &str = "java/lang/SecurityException";
pub const NO_SUCH_METHOD: &str = "java/lang/NoSuchMethodException";

/// The runtime class backing redirected reflective lookups. Provided by the
/// reflection-shim component; only its contract is consumed here.
pub const REFLECTION_GATE: &str = "boxtin/runtime/ReflectionGate";

/// A generated class the host must define alongside the rewritten caller.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HelperClass {
	pub internal_name: Arc<str>,
	pub bytes: Vec<u8>,
}

/// Resolved coordinates of an emitted stub.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StubHandle {
	pub class_name: Arc<str>,
	pub method_name: Arc<str>,
	pub descriptor: Arc<str>,
}

/// Aggregates every deny stub one caller needs into a single
/// `<caller>$$BoxtinActions` class. Stub code interns directly into the
/// helper's constant pool as it is generated.
pub struct ActionWriter<'l> {
	catalog: &'l ModuleCatalog,
	caller_class: Arc<str>,
	helper_name: Arc<str>,
	writer: ClassWriter,
	stub_count: usize,
	by_name: FxHashMap<String, StubHandle>,
}

impl<'l> ActionWriter<'l> {
	pub fn new(catalog: &'l ModuleCatalog, caller_class: &str, major_version: u16) -> Self {
		let mut helper_name = format!("{caller_class}{HELPER_SUFFIX}");
		let mut suffix = 0u32;
		while catalog.class(&helper_name).is_some() {
			suffix += 1;
			helper_name = format!("{caller_class}{HELPER_SUFFIX}${suffix}");
		}

		let writer = ClassWriter::new(
			major_version,
			ClassAccessFlags::PUBLIC
				| ClassAccessFlags::FINAL
				| ClassAccessFlags::SUPER
				| ClassAccessFlags::SYNTHETIC,
			&helper_name,
			"java/lang/Object",
		);

		Self {
			catalog,
			caller_class: Arc::from(caller_class),
			helper_name: Arc::from(helper_name),
			writer,
			stub_count: 0,
			by_name: FxHashMap::default(),
		}
	}

	pub fn helper_name(&self) -> &str {
		&self.helper_name
	}

	/// Emits (or reuses) the deny stub for one planned call-site
	/// replacement.
	pub fn stub_for(&mut self, request: &StubRequest) -> Result<StubHandle, ClassFormatError> {
		let name = stub_name("deny", request);
		if let Some(handle) = self.by_name.get(&name) {
			return Ok(handle.clone());
		}

		let descriptor = stub_descriptor(request);
		let stub = MethodDescriptor::parse(&descriptor)
			.map_err(|_| malformed(&request.member_descriptor))?;
		let target = MethodDescriptor::parse(&request.member_descriptor)
			.map_err(|_| malformed(&request.member_descriptor))?;

		let mut code = CodeWriter::new(
			max_stack_for(&stub.parameters),
			slots_of(&stub.parameters),
		);
		self.emit_action(&mut code, &request.action, request, &stub, &target)?;

		self.push(name, descriptor, code)
	}

	/// Emits (or reuses) the gate stub for a guarded reflective lookup.
	pub fn gate_for(&mut self, request: &LookupRequest) -> Result<StubHandle, ClassFormatError> {
		let name = format!(
			"gate_{:016x}",
			fxhash::hash64(&(&request.class_name, &request.method_name, &request.descriptor)),
		);
		if let Some(handle) = self.by_name.get(&name) {
			return Ok(handle.clone());
		}

		let descriptor = format!(
			"(L{};{}",
			request.class_name,
			&request.descriptor[1..],
		);
		let stub = MethodDescriptor::parse(&descriptor).map_err(|_| malformed(&request.descriptor))?;

		let mut code = CodeWriter::new(max_stack_for(&stub.parameters), slots_of(&stub.parameters));

		// allows(receiver, args…) then either raise no-such-method here (so
		// the failure's top frame names this class) or forward the lookup.
		load_params(&mut code, &stub.parameters, 0);
		let allows_descriptor = format!("(L{};{})Z", request.class_name, params_of(&request.descriptor));
		let allows = self.writer.pool.intern_method_ref(REFLECTION_GATE, "allows", &allows_descriptor);
		code.op(OpCode::invokestatic(allows.0));

		let deny = throw_block(&mut self.writer.pool, NO_SUCH_METHOD, None);
		code.op(OpCode::ifne(3 + deny.len() as i16));
		code.raw(&deny);

		let frame_offset = code.here();
		let locals = frame_locals(&mut self.writer.pool, &stub.parameters);
		code.frame(StackMapFrame {
			offset: frame_offset as u32,
			kind: FrameKind::Full { locals, stack: vec![] },
		});

		load_params(&mut code, &stub.parameters, 0);
		let original = self
			.writer
			.pool
			.intern_method_ref(&request.class_name, &request.method_name, &request.descriptor);
		code.op(OpCode::invokevirtual(original.0));
		code.op(return_op(&stub.return_type));

		self.push(name, descriptor, code)
	}

	/// Emits (or reuses) a bootstrap stub that raises the action at
	/// invoke-dynamic linkage.
	pub fn bootstrap_for(&mut self, request: &StubRequest) -> Result<StubHandle, ClassFormatError> {
		let name = stub_name("bootstrap", request);
		if let Some(handle) = self.by_name.get(&name) {
			return Ok(handle.clone());
		}

		let descriptor = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;\
			Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;"
			.to_string();

		// Linkage-time denial: value-shaped actions still refuse the call
		// site, surfacing as the standard security exception.
		let mut code = CodeWriter::new(3, 3);
		let body = match &request.action {
			DenyAction::Exception { class_name, message } => {
				throw_block(&mut self.writer.pool, class_name, message.as_deref())
			},
			_ => throw_block(&mut self.writer.pool, SECURITY_EXCEPTION, None),
		};
		code.raw(&body);

		self.push(name, descriptor, code)
	}

	/// Finishes the helper class, or `None` when no stub was requested.
	pub fn finish(self) -> Option<HelperClass> {
		if self.stub_count == 0 {
			return None;
		}
		Some(HelperClass {
			internal_name: self.helper_name,
			bytes: self.writer.finish(),
		})
	}

	fn push(&mut self, name: String, descriptor: String, code: CodeWriter) -> Result<StubHandle, ClassFormatError> {
		let handle = StubHandle {
			class_name: self.helper_name.clone(),
			method_name: Arc::from(name.as_str()),
			descriptor: Arc::from(descriptor.as_str()),
		};
		self.by_name.insert(name, handle.clone());
		self.writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
			&handle.method_name,
			&descriptor,
			Some(code),
		);
		self.stub_count += 1;
		Ok(handle)
	}

	fn emit_action(
		&mut self,
		code: &mut CodeWriter,
		action: &DenyAction,
		request: &StubRequest,
		stub: &MethodDescriptor,
		target: &MethodDescriptor,
	) -> Result<(), ClassFormatError> {
		match action {
			DenyAction::Standard => {
				let body = throw_block(&mut self.writer.pool, SECURITY_EXCEPTION, None);
				code.raw(&body);
				Ok(())
			},
			DenyAction::Exception { class_name, message } => {
				let body = throw_block(&mut self.writer.pool, class_name, message.as_deref());
				code.raw(&body);
				Ok(())
			},
			DenyAction::Value(literal) => {
				emit_value(code, &mut self.writer.pool, literal, &stub.return_type);
				code.op(return_op(&stub.return_type));
				Ok(())
			},
			DenyAction::Empty => {
				emit_empty(code, &mut self.writer.pool, self.catalog, &stub.return_type);
				code.op(return_op(&stub.return_type));
				Ok(())
			},
			DenyAction::Custom(custom) => {
				self.emit_custom(code, custom, request, stub, target)?;
				code.op(return_op(&stub.return_type));
				Ok(())
			},
			DenyAction::Checked { predicate, inner } => {
				self.emit_checked(code, predicate, inner, request, stub, target)
			},
		}
	}

	/// Forwards to the user replacement, shuffling in the caller class and
	/// receiver where its signature asks for them.
	fn emit_custom(
		&mut self,
		code: &mut CodeWriter,
		custom: &crate::policy::CustomInfo,
		request: &StubRequest,
		stub: &MethodDescriptor,
		target: &MethodDescriptor,
	) -> Result<(), ClassFormatError> {
		let declared = MethodDescriptor::parse(&custom.descriptor)
			.map_err(|_| malformed(&custom.descriptor))?;
		let has_receiver = request.kind != InvocationKind::Static
			&& request.kind != InvocationKind::Constructor;

		// Parameter shapes were verified at rules validation; classify by
		// count here. One extra parameter is the receiver when the target is
		// an instance member, unless it is the caller-class sentinel and the
		// receiver could not be confused for it.
		let extra = declared.parameters.len() as isize - target.parameters.len() as isize;
		let first_is_sentinel = matches!(
			declared.parameters.first(),
			Some(JavaType::Object(first)) if first.as_ref() == "java/lang/Class"
		);
		let (takes_caller, takes_receiver) = match extra {
			2 => (true, true),
			1 if !has_receiver => (true, false),
			1 if first_is_sentinel && request.target_class.as_ref() != "java/lang/Class" => (true, false),
			1 => (false, true),
			_ => (false, false),
		};

		let mut declared_params = declared.parameters.iter();
		if takes_caller {
			let class_index = self.writer.pool.intern_class(&self.caller_class);
			code.op(OpCode::ldc_w(class_index.0));
			declared_params.next();
		}
		if takes_receiver {
			code.op(load_op(&JavaType::Object(request.target_class.as_ref().into()), 0));
			declared_params.next();
		}

		let mut slot = if has_receiver { 1 } else { 0 };
		for (parameter, declared) in target.parameters.iter().zip(declared_params) {
			code.op(load_op(parameter, slot));
			adapt_argument(code, &mut self.writer.pool, parameter, declared);
			slot += parameter.width();
		}

		let reference = self
			.writer
			.pool
			.intern_method_ref(&custom.class_name, &custom.method_name, &custom.descriptor);
		code.op(OpCode::invokestatic(reference.0));
		adapt_return(code, &mut self.writer.pool, &declared.return_type, &stub.return_type);
		Ok(())
	}

	/// Predicate gate: when it approves, the original call runs inside the
	/// stub; otherwise the inner action fires.
	fn emit_checked(
		&mut self,
		code: &mut CodeWriter,
		predicate: &crate::policy::CustomInfo,
		inner: &DenyAction,
		request: &StubRequest,
		stub: &MethodDescriptor,
		target: &MethodDescriptor,
	) -> Result<(), ClassFormatError> {
		let declared = MethodDescriptor::parse(&predicate.descriptor)
			.map_err(|_| malformed(&predicate.descriptor))?;
		let has_receiver = request.kind != InvocationKind::Static
			&& request.kind != InvocationKind::Constructor;
		let args_start: u16 = if has_receiver { 1 } else { 0 };

		if declared.parameters.len() == target.parameters.len() + 1 {
			let class_index = self.writer.pool.intern_class(&self.caller_class);
			code.op(OpCode::ldc_w(class_index.0));
		}
		load_params(code, &target.parameters, args_start);
		let reference = self
			.writer
			.pool
			.intern_method_ref(&predicate.class_name, &predicate.method_name, &predicate.descriptor);
		code.op(OpCode::invokestatic(reference.0));

		// Approved branch, assembled out of line to size the gate jump.
		let mut approved = CodeWriter::new(0, 0);
		match request.kind {
			InvocationKind::Constructor => {
				let class_index = self.writer.pool.intern_class(&request.target_class);
				approved.op(OpCode::new_(class_index.0));
				approved.op(OpCode::dup);
				load_params(&mut approved, &target.parameters, args_start);
				let init = self.writer.pool.intern_method_ref(
					&request.target_class,
					"<init>",
					&request.member_descriptor,
				);
				approved.op(OpCode::invokespecial(init.0));
			},
			kind => {
				load_params(&mut approved, &stub.parameters, 0);
				let member = match request.interface {
					true => self.writer.pool.intern_interface_method_ref(
						&request.target_class,
						&request.member_name,
						&request.member_descriptor,
					),
					false => self.writer.pool.intern_method_ref(
						&request.target_class,
						&request.member_name,
						&request.member_descriptor,
					),
				};
				let invocation = match kind {
					InvocationKind::Virtual => OpCode::invokevirtual(member.0),
					InvocationKind::Static => OpCode::invokestatic(member.0),
					InvocationKind::Special => OpCode::invokespecial(member.0),
					InvocationKind::Interface => OpCode::invokeinterface(InterfaceInvocation {
						method: member.0,
						count: 1 + slots_of(&target.parameters) as u8,
					}),
					InvocationKind::Constructor => unreachable!(),
				};
				approved.op(invocation);
			},
		}
		approved.op(return_op(&stub.return_type));

		let approved_bytes = approved.into_code();
		code.op(OpCode::ifeq(3 + approved_bytes.len() as i16));
		code.raw(&approved_bytes);

		let frame_offset = code.here();
		let locals = frame_locals(&mut self.writer.pool, &stub.parameters);
		code.frame(StackMapFrame {
			offset: frame_offset as u32,
			kind: FrameKind::Full { locals, stack: vec![] },
		});

		self.emit_action(code, inner, request, stub, target)
	}
}

fn malformed(descriptor: &str) -> ClassFormatError {
	ClassFormatError::Malformed(format!("Malformed descriptor `{descriptor}`"))
}

/// Stable stub name derived from the denied member and action shape.
fn stub_name(prefix: &str, request: &StubRequest) -> String {
	let hash = fxhash::hash64(&(
		&request.target_class,
		&request.member_name,
		&request.member_descriptor,
		request.action.shape(),
	));
	format!("{prefix}_{hash:016x}")
}

/// The stub's signature mirrors the denied member, with the receiver as an
/// explicit first parameter for instance calls and the constructed type as
/// the return for constructor sites.
fn stub_descriptor(request: &StubRequest) -> String {
	match request.kind {
		InvocationKind::Static => request.member_descriptor.to_string(),
		InvocationKind::Constructor => format!(
			"({})L{};",
			params_of(&request.member_descriptor),
			request.target_class,
		),
		_ => format!("(L{};{}", request.target_class, &request.member_descriptor[1..]),
	}
}

/// The raw parameter segment of a descriptor, parens excluded.
fn params_of(descriptor: &str) -> &str {
	let close = descriptor.find(')').unwrap_or(descriptor.len());
	&descriptor[1..close]
}

pub(crate) fn slots_of(params: &[JavaType]) -> u16 {
	params.iter().map(JavaType::width).sum()
}

fn max_stack_for(params: &[JavaType]) -> u16 {
	// Enough for all forwarded arguments plus allocation/boxing scratch.
	slots_of(params) + 3
}

pub(crate) fn load_op(ty: &JavaType, slot: u16) -> OpCode {
	use OpCode::*;
	match ty {
		JavaType::Long => match slot {
			0 => lload_0,
			1 => lload_1,
			2 => lload_2,
			3 => lload_3,
			_ => lload(slot as u8),
		},
		JavaType::Float => match slot {
			0 => fload_0,
			1 => fload_1,
			2 => fload_2,
			3 => fload_3,
			_ => fload(slot as u8),
		},
		JavaType::Double => match slot {
			0 => dload_0,
			1 => dload_1,
			2 => dload_2,
			3 => dload_3,
			_ => dload(slot as u8),
		},
		JavaType::Object(_) | JavaType::Array { .. } => match slot {
			0 => aload_0,
			1 => aload_1,
			2 => aload_2,
			3 => aload_3,
			_ => aload(slot as u8),
		},
		_ => match slot {
			0 => iload_0,
			1 => iload_1,
			2 => iload_2,
			3 => iload_3,
			_ => iload(slot as u8),
		},
	}
}

pub(crate) fn return_op(return_type: &ReturnType) -> OpCode {
	match return_type {
		ReturnType::Void => OpCode::return_,
		ReturnType::Value(JavaType::Long) => OpCode::lreturn,
		ReturnType::Value(JavaType::Float) => OpCode::freturn,
		ReturnType::Value(JavaType::Double) => OpCode::dreturn,
		ReturnType::Value(JavaType::Object(_) | JavaType::Array { .. }) => OpCode::areturn,
		ReturnType::Value(_) => OpCode::ireturn,
	}
}

pub(crate) fn load_params(code: &mut CodeWriter, params: &[JavaType], start_slot: u16) {
	let mut slot = start_slot;
	for param in params {
		code.op(load_op(param, slot));
		slot += param.width();
	}
}

/// `new X; dup; [ldc msg;] invokespecial X.<init>; athrow` as raw bytes.
pub(crate) fn throw_block(pool: &mut ConstantPool, class_name: &str, message: Option<&str>) -> Vec<u8> {
	let class_index = pool.intern_class(class_name);
	let constructor = match message {
		Some(_) => pool.intern_method_ref(class_name, "<init>", "(Ljava/lang/String;)V"),
		None => pool.intern_method_ref(class_name, "<init>", "()V"),
	};
	let message_index = message.map(|message| pool.intern_string(message));

	let mut bytes = vec![];
	OpCode::new_(class_index.0).write(&mut bytes);
	OpCode::dup.write(&mut bytes);
	if let Some(index) = message_index {
		OpCode::ldc_w(index).write(&mut bytes);
	}
	OpCode::invokespecial(constructor.0).write(&mut bytes);
	OpCode::athrow.write(&mut bytes);
	bytes
}

/// Emits the constant for a `Value` action, pre-widened to the declared
/// return category.
pub(crate) fn emit_value(code: &mut CodeWriter, pool: &mut ConstantPool, literal: &Literal, return_type: &ReturnType) {
	let target = return_type.as_value().cloned().unwrap_or(JavaType::Int);
	match &target {
		JavaType::Long => {
			let value = literal_as_i64(literal);
			match value {
				0 => code.op(OpCode::lconst_0),
				1 => code.op(OpCode::lconst_1),
				_ => code.op(OpCode::ldc2_w(pool.intern_long(value))),
			};
		},
		JavaType::Float => {
			let value = literal_as_f64(literal) as f32;
			match value.to_bits() {
				bits if bits == 0f32.to_bits() => code.op(OpCode::fconst_0),
				bits if bits == 1f32.to_bits() => code.op(OpCode::fconst_1),
				bits if bits == 2f32.to_bits() => code.op(OpCode::fconst_2),
				_ => code.op(OpCode::ldc_w(pool.intern_float(value))),
			};
		},
		JavaType::Double => {
			let value = literal_as_f64(literal);
			match value.to_bits() {
				bits if bits == 0f64.to_bits() => code.op(OpCode::dconst_0),
				bits if bits == 1f64.to_bits() => code.op(OpCode::dconst_1),
				_ => code.op(OpCode::ldc2_w(pool.intern_double(value))),
			};
		},
		JavaType::Object(name) => match literal {
			Literal::String(value) => {
				code.op(OpCode::ldc_w(pool.intern_string(value)));
			},
			primitive_literal => {
				let primitive = unboxed_of(name).unwrap_or(primitive_literal.java_type());
				emit_value(code, pool, primitive_literal, &ReturnType::Value(primitive.clone()));
				box_value(code, pool, &primitive);
			},
		},
		_ => {
			let value = literal_as_i32(literal);
			emit_int(code, pool, value);
		},
	}
}

fn emit_int(code: &mut CodeWriter, pool: &mut ConstantPool, value: i32) {
	match value {
		-1 => code.op(OpCode::iconst_m1),
		0 => code.op(OpCode::iconst_0),
		1 => code.op(OpCode::iconst_1),
		2 => code.op(OpCode::iconst_2),
		3 => code.op(OpCode::iconst_3),
		4 => code.op(OpCode::iconst_4),
		5 => code.op(OpCode::iconst_5),
		-128..=127 => code.op(OpCode::bipush(value as i8)),
		-32768..=32767 => code.op(OpCode::sipush(value as i16)),
		_ => code.op(OpCode::ldc_w(pool.intern_integer(value))),
	};
}

fn literal_as_i32(literal: &Literal) -> i32 {
	match literal {
		Literal::Boolean(v) => *v as i32,
		Literal::Byte(v) => *v as i32,
		Literal::Short(v) => *v as i32,
		Literal::Char(v) => *v as i32,
		Literal::Int(v) => *v,
		Literal::Long(v) => *v as i32,
		Literal::Float(v) => *v as i32,
		Literal::Double(v) => *v as i32,
		Literal::String(_) => 0,
	}
}

fn literal_as_i64(literal: &Literal) -> i64 {
	match literal {
		Literal::Long(v) => *v,
		other => literal_as_i32(other) as i64,
	}
}

fn literal_as_f64(literal: &Literal) -> f64 {
	match literal {
		Literal::Float(v) => *v as f64,
		Literal::Double(v) => *v,
		Literal::Long(v) => *v as f64,
		other => literal_as_i32(other) as f64,
	}
}

/// Box name to its primitive, the reverse of [`JavaType::box_type`].
fn unboxed_of(box_name: &str) -> Option<JavaType> {
	Some(match box_name {
		"java/lang/Byte" => JavaType::Byte,
		"java/lang/Character" => JavaType::Char,
		"java/lang/Short" => JavaType::Short,
		"java/lang/Boolean" => JavaType::Boolean,
		"java/lang/Integer" => JavaType::Int,
		"java/lang/Long" => JavaType::Long,
		"java/lang/Float" => JavaType::Float,
		"java/lang/Double" => JavaType::Double,
		_ => return None,
	})
}

fn box_value(code: &mut CodeWriter, pool: &mut ConstantPool, primitive: &JavaType) {
	let Some(box_name) = primitive.box_type() else {
		return;
	};
	let descriptor = format!("({})L{};", primitive, box_name);
	let value_of = pool.intern_method_ref(box_name, "valueOf", &descriptor);
	code.op(OpCode::invokestatic(value_of.0));
}

/// Widening conversions between stack categories.
fn widen(code: &mut CodeWriter, from: &JavaType, to: &JavaType) {
	use JavaType::*;
	let from_kind = match from {
		Long => Long,
		Float => Float,
		Double => Double,
		_ => Int,
	};
	match (&from_kind, to) {
		(Int, Long) => {
			code.op(OpCode::i2l);
		},
		(Int, Float) => {
			code.op(OpCode::i2f);
		},
		(Int, Double) => {
			code.op(OpCode::i2d);
		},
		(Long, Float) => {
			code.op(OpCode::l2f);
		},
		(Long, Double) => {
			code.op(OpCode::l2d);
		},
		(Float, Double) => {
			code.op(OpCode::f2d);
		},
		_ => {},
	}
}

/// Adapts a loaded argument of `from` to a declared parameter of `to`:
/// widening and boxing only, as verified at validation time.
fn adapt_argument(code: &mut CodeWriter, pool: &mut ConstantPool, from: &JavaType, to: &JavaType) {
	match (from.is_primitive(), to) {
		(true, JavaType::Object(_)) => {
			box_value(code, pool, from);
		},
		(true, to) if from != to => widen(code, from, to),
		_ => {},
	}
}

/// Adapts the replacement's return value to the stub's declared return:
/// unboxing, widening, or nothing.
fn adapt_return(code: &mut CodeWriter, pool: &mut ConstantPool, from: &ReturnType, to: &ReturnType) {
	let (Some(from), Some(to)) = (from.as_value(), to.as_value()) else {
		return;
	};
	if from == to {
		return;
	}
	match (from, to) {
		(JavaType::Object(box_name), to) if to.is_primitive() => {
			// Integer.intValue and friends.
			if let Some(primitive) = unboxed_of(box_name) {
				let method = match primitive {
					JavaType::Byte => "byteValue",
					JavaType::Char => "charValue",
					JavaType::Short => "shortValue",
					JavaType::Boolean => "booleanValue",
					JavaType::Int => "intValue",
					JavaType::Long => "longValue",
					JavaType::Float => "floatValue",
					JavaType::Double => "doubleValue",
					_ => return,
				};
				let descriptor = format!("(){primitive}");
				let reference = pool.intern_method_ref(box_name, method, &descriptor);
				code.op(OpCode::invokevirtual(reference.0));
				widen(code, &primitive, to);
			}
		},
		(from, JavaType::Object(_)) if from.is_primitive() => box_value(code, pool, from),
		(from, to) if from.is_primitive() && to.is_primitive() => widen(code, from, to),
		_ => {},
	}
}

/// Verifier types for a parameter list, used for full frames in branching
/// stubs.
pub(crate) fn frame_locals(pool: &mut ConstantPool, params: &[JavaType]) -> Vec<VerificationType> {
	params.iter().map(|param| verification_type(pool, param)).collect()
}

pub(crate) fn verification_type(pool: &mut ConstantPool, ty: &JavaType) -> VerificationType {
	match ty {
		JavaType::Long => VerificationType::Long,
		JavaType::Float => VerificationType::Float,
		JavaType::Double => VerificationType::Double,
		JavaType::Object(name) => VerificationType::Object(pool.intern_class(name)),
		JavaType::Array { .. } => VerificationType::Object(pool.intern_class(&ty.to_string())),
		_ => VerificationType::Integer,
	}
}

/// The §external-interface empty-value table, emitted as bytecode.
pub(crate) fn emit_empty(
	code: &mut CodeWriter,
	pool: &mut ConstantPool,
	catalog: &ModuleCatalog,
	return_type: &ReturnType,
) {
	let Some(target) = return_type.as_value() else {
		return;
	};

	match target {
		JavaType::Long => {
			code.op(OpCode::lconst_0);
		},
		JavaType::Float => {
			code.op(OpCode::fconst_0);
		},
		JavaType::Double => {
			code.op(OpCode::dconst_0);
		},
		JavaType::Array { dimensions, element } => {
			code.op(OpCode::iconst_0);
			match (dimensions, element.as_ref()) {
				(1, JavaType::Object(name)) => {
					let class = pool.intern_class(name);
					code.op(OpCode::anewarray(class.0));
				},
				(1, primitive) => {
					code.op(OpCode::newarray(newarray_code(primitive)));
				},
				(dimensions, _) => {
					// Zero-length outer array of the remaining component.
					let component = JavaType::Array {
						dimensions: dimensions - 1,
						element: element.clone(),
					};
					let class = pool.intern_class(&component.to_string());
					code.op(OpCode::anewarray(class.0));
				},
			}
		},
		JavaType::Object(name) => emit_empty_reference(code, pool, catalog, name),
		_ => {
			code.op(OpCode::iconst_0);
		},
	}
}

fn emit_empty_reference(code: &mut CodeWriter, pool: &mut ConstantPool, catalog: &ModuleCatalog, name: &str) {
	// (owner, method, descriptor, owner is an interface)
	let factory: Option<(&str, &str, String, bool)> = match name {
		"java/lang/String" => {
			code.op(OpCode::ldc_w(pool.intern_string("")));
			return;
		},
		"java/util/List" | "java/util/Collection" | "java/lang/Iterable" => {
			Some(("java/util/Collections", "emptyList", "()Ljava/util/List;".into(), false))
		},
		"java/util/Set" => Some(("java/util/Collections", "emptySet", "()Ljava/util/Set;".into(), false)),
		"java/util/Map" => Some(("java/util/Collections", "emptyMap", "()Ljava/util/Map;".into(), false)),
		"java/util/Iterator" => {
			Some(("java/util/Collections", "emptyIterator", "()Ljava/util/Iterator;".into(), false))
		},
		"java/util/ListIterator" => Some((
			"java/util/Collections",
			"emptyListIterator",
			"()Ljava/util/ListIterator;".into(),
			false,
		)),
		"java/util/Enumeration" => Some((
			"java/util/Collections",
			"emptyEnumeration",
			"()Ljava/util/Enumeration;".into(),
			false,
		)),
		"java/util/Spliterator" => Some((
			"java/util/Spliterators",
			"emptySpliterator",
			"()Ljava/util/Spliterator;".into(),
			false,
		)),
		"java/util/stream/Stream" => {
			Some(("java/util/stream/Stream", "empty", "()Ljava/util/stream/Stream;".into(), true))
		},
		"java/util/stream/IntStream" => Some((
			"java/util/stream/IntStream",
			"empty",
			"()Ljava/util/stream/IntStream;".into(),
			true,
		)),
		"java/util/stream/LongStream" => Some((
			"java/util/stream/LongStream",
			"empty",
			"()Ljava/util/stream/LongStream;".into(),
			true,
		)),
		"java/util/stream/DoubleStream" => Some((
			"java/util/stream/DoubleStream",
			"empty",
			"()Ljava/util/stream/DoubleStream;".into(),
			true,
		)),
		"java/util/Optional" => Some(("java/util/Optional", "empty", "()Ljava/util/Optional;".into(), false)),
		"java/util/OptionalInt" => {
			Some(("java/util/OptionalInt", "empty", "()Ljava/util/OptionalInt;".into(), false))
		},
		"java/util/OptionalLong" => {
			Some(("java/util/OptionalLong", "empty", "()Ljava/util/OptionalLong;".into(), false))
		},
		"java/util/OptionalDouble" => {
			Some(("java/util/OptionalDouble", "empty", "()Ljava/util/OptionalDouble;".into(), false))
		},
		_ => None,
	};

	if let Some((owner, method, descriptor, interface)) = factory {
		let reference = match interface {
			true => pool.intern_interface_method_ref(owner, method, &descriptor),
			false => pool.intern_method_ref(owner, method, &descriptor),
		};
		code.op(OpCode::invokestatic(reference.0));
		return;
	}

	if let Some(primitive) = unboxed_of(name) {
		emit_value(code, pool, &Literal::Int(0), &ReturnType::Value(primitive.clone()));
		box_value(code, pool, &primitive);
		return;
	}

	let default_constructible = catalog
		.class(name)
		.map(|info| info.default_constructible())
		.unwrap_or(false);
	match default_constructible {
		true => {
			let class = pool.intern_class(name);
			let init = pool.intern_method_ref(name, "<init>", "()V");
			code.op(OpCode::new_(class.0));
			code.op(OpCode::dup);
			code.op(OpCode::invokespecial(init.0));
		},
		false => {
			code.op(OpCode::aconst_null);
		},
	}
}

fn newarray_code(primitive: &JavaType) -> u8 {
	match primitive {
		JavaType::Boolean => 4,
		JavaType::Char => 5,
		JavaType::Float => 6,
		JavaType::Double => 7,
		JavaType::Byte => 8,
		JavaType::Short => 9,
		JavaType::Int => 10,
		JavaType::Long => 11,
		_ => 10,
	}
}

