use crate::policy::catalog::ModuleCatalog;
use crate::policy::{CustomInfo, DenyAction};
use crate::raw::attributes::{
	write_attribute, AttributeInfo, BootstrapMethods, ExceptionHandler, FrameKind, StackMapFrame,
	VerificationType,
};
use crate::raw::builder::CodeWriter;
use crate::raw::bytecode::{CodeStream, EncodedCode, OpCode};
use crate::raw::class_file::Member;
use crate::raw::constant_pool::ConstantPool;
use crate::raw::descriptor::{JavaType, MethodDescriptor};
use crate::raw::ClassFormatError;
use crate::transform::actions::{
	emit_empty, emit_value, load_op, load_params, return_op, slots_of, throw_block,
	verification_type, ActionWriter, SECURITY_EXCEPTION,
};
use crate::transform::planner::{MethodPlan, PlannedAction, StubRequest, TargetPrologue};
use crate::utilities::ToByteBuffer;

/// A constructor elision recorded while applying the plan; its frames lose
/// their uninitialized stack entries.
struct ElidedAllocation {
	new_offset: u32,
	init_offset: u32,
}

/// Rewrites one method according to its plan and returns the complete
/// replacement `method_info` record.
#[tracing::instrument(skip_all)]
pub fn rewrite_method(
	pool: &mut ConstantPool,
	catalog: &ModuleCatalog,
	this_class: &str,
	method: &Member,
	plan: &MethodPlan,
	actions: &mut ActionWriter,
) -> Result<Vec<u8>, ClassFormatError> {
	let name = pool.utf8(method.name).unwrap_or_default().to_string();
	let descriptor = pool.utf8(method.descriptor).unwrap_or_default().to_string();
	let Some(code_attribute) = method.code(pool) else {
		return Err(ClassFormatError::Malformed(format!("Method {name} has no code")));
	};
	let original_frames: Vec<StackMapFrame> = code_attribute
		.stack_map(pool)
		.map(|table| table.frames.clone())
		.unwrap_or_default();

	let mut stream = CodeStream::decode(code_attribute.code)?;
	let mut elided = vec![];

	for entry in &plan.entries {
		match &entry.action {
			PlannedAction::Replace(request) => {
				let stub = actions.stub_for(request)?;
				let reference =
					pool.intern_method_ref(&stub.class_name, &stub.method_name, &stub.descriptor);
				stream.replace(entry.slot, vec![OpCode::invokestatic(reference.0)]);
			},
			PlannedAction::ReplaceConstructor { request, new_slot, dup_slot } => {
				let stub = actions.stub_for(request)?;
				let reference =
					pool.intern_method_ref(&stub.class_name, &stub.method_name, &stub.descriptor);
				elided.push(ElidedAllocation {
					new_offset: stream.original_offset(*new_slot),
					init_offset: stream.original_offset(entry.slot),
				});
				stream.replace(*new_slot, vec![]);
				stream.replace(*dup_slot, vec![]);
				stream.replace(entry.slot, vec![OpCode::invokestatic(reference.0)]);
			},
			PlannedAction::RedirectLookup(request) => {
				let gate = actions.gate_for(request)?;
				let reference =
					pool.intern_method_ref(&gate.class_name, &gate.method_name, &gate.descriptor);
				stream.replace(entry.slot, vec![OpCode::invokestatic(reference.0)]);
			},
		}
	}

	let prologue = match &plan.prologue {
		Some(spec) => Some(build_prologue(pool, catalog, this_class, spec)?),
		None => None,
	};
	if let Some(prologue) = &prologue {
		stream.prepend_raw(&prologue.bytes)?;
	}

	let encoded = stream.encode().map_err(|error| match error.to_string().as_str() {
		"Method is too large" => ClassFormatError::MethodTooLarge {
			name: name.clone(),
			descriptor: descriptor.clone(),
		},
		_ => ClassFormatError::from(error),
	})?;

	let max_stack = code_attribute
		.max_stack
		.max(prologue.as_ref().map(|p| p.max_stack).unwrap_or(0));
	let mut writer = CodeWriter::new(max_stack, code_attribute.max_locals);
	writer.raw(&encoded.bytes);

	for handler in &code_attribute.handlers {
		writer.handler(ExceptionHandler {
			start_pc: encoded.map_offset(handler.start_pc as u32)? as u16,
			end_pc: encoded.map_offset(handler.end_pc as u32)? as u16,
			handler_pc: encoded.map_offset(handler.handler_pc as u32)? as u16,
			catch_type: handler.catch_type,
		});
	}

	for frame in rewrite_frames(&original_frames, &encoded, &elided, prologue.as_ref())? {
		writer.frame(frame);
	}

	// Assemble the replacement method record: the rebuilt Code attribute
	// first, then every non-Code attribute byte-for-byte. Offset-bearing
	// debug tables (line numbers, local variables) inside the old Code
	// attribute are stale after the splice and are not carried over.
	let mut body = vec![];
	writer.write_body(pool, &mut body);

	let mut bytes = vec![];
	method.access.write(&mut bytes);
	method.name.0.write(&mut bytes);
	method.descriptor.0.write(&mut bytes);

	let other: Vec<_> = method
		.attributes
		.iter()
		.filter(|attribute| !matches!(attribute.info, AttributeInfo::Code(_)))
		.collect();
	((other.len() + 1) as u16).write(&mut bytes);

	let code_name = pool.intern_utf8("Code");
	write_attribute(code_name, &body, &mut bytes);
	for attribute in other {
		attribute.write_raw(&mut bytes);
	}

	Ok(bytes)
}

/// Repoints denied bootstrap-method entries at generated bootstrap stubs.
/// Static arguments are dropped alongside, matching the stub's fixed
/// `(Lookup, String, MethodType)` shape.
pub fn rewrite_bootstrap(
	pool: &mut ConstantPool,
	original: &BootstrapMethods,
	planned: &[(usize, StubRequest)],
	actions: &mut ActionWriter,
) -> Result<BootstrapMethods, ClassFormatError> {
	use crate::raw::constant_pool::MethodHandleKind;

	let mut methods = original.clone();
	for (index, request) in planned {
		let stub = actions.bootstrap_for(request)?;
		let reference = pool.intern_method_ref(&stub.class_name, &stub.method_name, &stub.descriptor);
		let handle = pool.intern_method_handle(MethodHandleKind::InvokeStatic, reference.0);
		if let Some(method) = methods.methods.get_mut(*index) {
			method.method_ref = handle;
			method.arguments.clear();
		}
	}
	Ok(methods)
}

struct PrologueCode {
	bytes: Vec<u8>,
	entry_locals: Vec<VerificationType>,
	max_stack: u16,
}

/// Builds the target-site action prologue: it runs before any original
/// instruction and leaves the declared signature untouched.
fn build_prologue(
	pool: &mut ConstantPool,
	catalog: &ModuleCatalog,
	this_class: &str,
	spec: &TargetPrologue,
) -> Result<PrologueCode, ClassFormatError> {
	let descriptor = MethodDescriptor::parse(&spec.descriptor)
		.map_err(|_| ClassFormatError::Malformed(format!("Malformed descriptor `{}`", spec.descriptor)))?;
	let args_start: u16 = if spec.is_static { 0 } else { 1 };

	let mut code = CodeWriter::new(0, 0);
	match &spec.action {
		DenyAction::Checked { predicate, inner } => {
			let declared = MethodDescriptor::parse(&predicate.descriptor)
				.map_err(|_| ClassFormatError::Malformed(format!("Malformed descriptor `{}`", predicate.descriptor)))?;
			if declared.parameters.len() == descriptor.parameters.len() + 1 {
				let class_index = pool.intern_class(this_class);
				code.op(OpCode::ldc_w(class_index.0));
			}
			load_params(&mut code, &descriptor.parameters, args_start);
			let reference =
				pool.intern_method_ref(&predicate.class_name, &predicate.method_name, &predicate.descriptor);
			code.op(OpCode::invokestatic(reference.0));

			let mut inner_code = CodeWriter::new(0, 0);
			emit_target_action(&mut inner_code, pool, catalog, this_class, inner, &descriptor, args_start)?;
			let inner_bytes = inner_code.into_code();
			code.op(OpCode::ifne(3 + inner_bytes.len() as i16));
			code.raw(&inner_bytes);
		},
		action => {
			emit_target_action(&mut code, pool, catalog, this_class, action, &descriptor, args_start)?;
		},
	}

	let mut entry_locals = vec![];
	if !spec.is_static {
		entry_locals.push(match spec.is_constructor {
			true => VerificationType::UninitializedThis,
			false => VerificationType::Object(pool.intern_class(this_class)),
		});
	}
	entry_locals.extend(descriptor.parameters.iter().map(|param| verification_type(pool, param)));

	Ok(PrologueCode {
		bytes: code.into_code(),
		entry_locals,
		max_stack: slots_of(&descriptor.parameters) + 3,
	})
}

/// A non-checked action at the target's entry: throw, or substitute the
/// method's result and return without running the body.
fn emit_target_action(
	code: &mut CodeWriter,
	pool: &mut ConstantPool,
	catalog: &ModuleCatalog,
	this_class: &str,
	action: &DenyAction,
	descriptor: &MethodDescriptor,
	args_start: u16,
) -> Result<(), ClassFormatError> {
	match action {
		DenyAction::Standard => {
			let block = throw_block(pool, SECURITY_EXCEPTION, None);
			code.raw(&block);
		},
		DenyAction::Exception { class_name, message } => {
			let block = throw_block(pool, class_name, message.as_deref());
			code.raw(&block);
		},
		DenyAction::Value(literal) => {
			emit_value(code, pool, literal, &descriptor.return_type);
			code.op(return_op(&descriptor.return_type));
		},
		DenyAction::Empty => {
			emit_empty(code, pool, catalog, &descriptor.return_type);
			code.op(return_op(&descriptor.return_type));
		},
		DenyAction::Custom(custom) => {
			emit_target_custom(code, pool, this_class, custom, descriptor, args_start)?;
		},
		DenyAction::Checked { .. } => {
			// Nesting was rejected at validation.
			return Err(ClassFormatError::Malformed("Nested checked action".into()));
		},
	}
	Ok(())
}

/// Forwards the method's own arguments (and `this` where asked for) to the
/// user replacement, then returns its result in place of the body's.
fn emit_target_custom(
	code: &mut CodeWriter,
	pool: &mut ConstantPool,
	this_class: &str,
	custom: &CustomInfo,
	descriptor: &MethodDescriptor,
	args_start: u16,
) -> Result<(), ClassFormatError> {
	let declared = MethodDescriptor::parse(&custom.descriptor)
		.map_err(|_| ClassFormatError::Malformed(format!("Malformed descriptor `{}`", custom.descriptor)))?;

	let extra = declared.parameters.len() as isize - descriptor.parameters.len() as isize;
	let first_is_sentinel = matches!(
		declared.parameters.first(),
		Some(JavaType::Object(first)) if first.as_ref() == "java/lang/Class"
	);
	let has_receiver = args_start == 1;
	let (takes_caller, takes_receiver) = match extra {
		2 => (true, true),
		1 if !has_receiver => (true, false),
		1 if first_is_sentinel && this_class != "java/lang/Class" => (true, false),
		1 => (false, true),
		_ => (false, false),
	};

	if takes_caller {
		let class_index = pool.intern_class(this_class);
		code.op(OpCode::ldc_w(class_index.0));
	}
	if takes_receiver {
		code.op(load_op(&JavaType::Object(this_class.into()), 0));
	}
	load_params(code, &descriptor.parameters, args_start);

	let reference = pool.intern_method_ref(&custom.class_name, &custom.method_name, &custom.descriptor);
	code.op(OpCode::invokestatic(reference.0));
	code.op(return_op(&descriptor.return_type));
	Ok(())
}

/// Re-expresses stack-map frames over the rewritten code: offsets move with
/// the splices, uninitialized entries follow their `new` instruction, and
/// elided allocations disappear from the frames that carried them.
fn rewrite_frames(
	original: &[StackMapFrame],
	encoded: &EncodedCode,
	elided: &[ElidedAllocation],
	prologue: Option<&PrologueCode>,
) -> Result<Vec<StackMapFrame>, ClassFormatError> {
	let mut frames = Vec::with_capacity(original.len() + 1);

	for frame in original {
		let offset = encoded.map_offset(frame.offset)?;
		let in_elided = |candidate: u32| {
			elided
				.iter()
				.find(|e| frame.offset > e.new_offset && frame.offset <= e.init_offset && candidate == e.new_offset)
		};

		let map_type = |entry: &VerificationType| -> Result<VerificationType, ClassFormatError> {
			Ok(match entry {
				VerificationType::Uninitialized(at) => {
					VerificationType::Uninitialized(encoded.map_offset(*at as u32)? as u16)
				},
				other => *other,
			})
		};

		let kind = match &frame.kind {
			FrameKind::Same => FrameKind::Same,
			FrameKind::SameLocals1Stack(entry) => match entry {
				VerificationType::Uninitialized(at) if in_elided(*at as u32).is_some() => FrameKind::Same,
				entry => FrameKind::SameLocals1Stack(map_type(entry)?),
			},
			FrameKind::Chop(count) => FrameKind::Chop(*count),
			FrameKind::Append(locals) => {
				let locals = locals.iter().map(map_type).collect::<Result<_, _>>()?;
				FrameKind::Append(locals)
			},
			FrameKind::Full { locals, stack } => {
				let locals = locals.iter().map(map_type).collect::<Result<Vec<_>, _>>()?;
				let stack = stack
					.iter()
					.filter(|entry| {
						!matches!(entry, VerificationType::Uninitialized(at) if in_elided(*at as u32).is_some())
					})
					.map(map_type)
					.collect::<Result<Vec<_>, _>>()?;
				FrameKind::Full { locals, stack }
			},
		};

		frames.push(StackMapFrame { offset, kind });
	}

	if let Some(prologue) = prologue {
		let entry_offset = encoded.map_offset(0)?;
		let entry = StackMapFrame {
			offset: entry_offset,
			kind: FrameKind::Full {
				locals: prologue.entry_locals.clone(),
				stack: vec![],
			},
		};
		match frames.first() {
			Some(first) if first.offset == entry_offset => frames[0] = entry,
			_ => frames.insert(0, entry),
		}
	}

	Ok(frames)
}
