use crate::raw::attributes::{write_attribute, ExceptionHandler, StackMapFrame, StackMapTable};
use crate::raw::bytecode::OpCode;
use crate::raw::class_file::{ClassAccessFlags, MethodAccessFlags, MAGIC};
use crate::raw::constant_pool::{ClassIndex, ConstantPool, Utf8Index};
use crate::utilities::ToByteBuffer;

/// Assembles a method body instruction by instruction. The instruction
/// stream is encoded as it is appended, so `here()` is always the offset of
/// the next instruction.
pub struct CodeWriter {
	pub max_stack: u16,
	pub max_locals: u16,
	code: Vec<u8>,
	handlers: Vec<ExceptionHandler>,
	frames: Vec<StackMapFrame>,
}

impl CodeWriter {
	pub fn new(max_stack: u16, max_locals: u16) -> Self {
		Self {
			max_stack,
			max_locals,
			code: vec![],
			handlers: vec![],
			frames: vec![],
		}
	}

	#[inline]
	pub fn here(&self) -> u16 {
		self.code.len() as u16
	}

	pub fn op(&mut self, op: OpCode) -> &mut Self {
		op.write(&mut self.code);
		self
	}

	pub fn ops(&mut self, ops: impl IntoIterator<Item = OpCode>) -> &mut Self {
		for op in ops {
			self.op(op);
		}
		self
	}

	/// Appends pre-encoded instructions; the caller is responsible for any
	/// relative offsets they contain.
	pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
		self.code.extend_from_slice(bytes);
		self
	}

	pub fn handler(&mut self, handler: ExceptionHandler) -> &mut Self {
		self.handlers.push(handler);
		self
	}

	pub fn frame(&mut self, frame: StackMapFrame) -> &mut Self {
		self.frames.push(frame);
		self
	}

	pub fn code_len(&self) -> usize {
		self.code.len()
	}

	/// Consumes the writer, keeping only the raw instruction bytes. Used for
	/// out-of-line blocks whose length sizes a branch.
	pub fn into_code(self) -> Vec<u8> {
		self.code
	}

	/// Writes the complete `Code` attribute body.
	pub(crate) fn write_body(&self, pool: &mut ConstantPool, buffer: &mut Vec<u8>) {
		self.max_stack.write(buffer);
		self.max_locals.write(buffer);
		(self.code.len() as u32).write(buffer);
		buffer.extend_from_slice(&self.code);

		(self.handlers.len() as u16).write(buffer);
		for handler in &self.handlers {
			handler.write(buffer);
		}

		match self.frames.is_empty() {
			true => 0u16.write(buffer),
			false => {
				1u16.write(buffer);
				let name = pool.intern_utf8("StackMapTable");
				let mut body = vec![];
				StackMapTable { frames: self.frames.clone() }.write(&mut body);
				write_attribute(name, &body, buffer);
			},
		}
	}
}

struct MethodEntry {
	access: MethodAccessFlags,
	name: Utf8Index,
	descriptor: Utf8Index,
	code: Option<CodeWriter>,
}

/// Assembles a class file from scratch. Used for generated action classes,
/// the empty-class substitution form, and test fixtures.
pub struct ClassWriter {
	pub pool: ConstantPool,
	minor_version: u16,
	major_version: u16,
	access: ClassAccessFlags,
	this_class: ClassIndex,
	super_class: ClassIndex,
	interfaces: Vec<ClassIndex>,
	methods: Vec<MethodEntry>,
	attributes: Vec<(Utf8Index, Vec<u8>)>,
}

impl ClassWriter {
	pub fn new(major_version: u16, access: ClassAccessFlags, this_class: &str, super_class: &str) -> Self {
		let mut pool = ConstantPool::new();
		let this_class = pool.intern_class(this_class);
		let super_class = pool.intern_class(super_class);
		Self {
			pool,
			minor_version: 0,
			major_version,
			access,
			this_class,
			super_class,
			interfaces: vec![],
			methods: vec![],
			attributes: vec![],
		}
	}

	/// Attaches a class-level attribute with a pre-built body.
	pub fn attribute(&mut self, name: &str, body: Vec<u8>) -> &mut Self {
		let name = self.pool.intern_utf8(name);
		self.attributes.push((name, body));
		self
	}

	pub fn interface(&mut self, internal_name: &str) -> &mut Self {
		let interface = self.pool.intern_class(internal_name);
		self.interfaces.push(interface);
		self
	}

	pub fn method(
		&mut self,
		access: MethodAccessFlags,
		name: &str,
		descriptor: &str,
		code: Option<CodeWriter>,
	) -> &mut Self {
		let name = self.pool.intern_utf8(name);
		let descriptor = self.pool.intern_utf8(descriptor);
		self.methods.push(MethodEntry { access, name, descriptor, code });
		self
	}

	pub fn finish(mut self) -> Vec<u8> {
		// Attribute names must land in the pool before it is written.
		let code_name = match self.methods.iter().any(|m| m.code.is_some()) {
			true => Some(self.pool.intern_utf8("Code")),
			false => None,
		};
		let mut code_bodies = Vec::with_capacity(self.methods.len());
		for method in &self.methods {
			code_bodies.push(method.code.as_ref().map(|code| {
				let mut body = vec![];
				code.write_body(&mut self.pool, &mut body);
				body
			}));
		}

		let mut buffer = Vec::with_capacity(256);
		MAGIC.write(&mut buffer);
		self.minor_version.write(&mut buffer);
		self.major_version.write(&mut buffer);
		self.pool.write(&mut buffer);

		self.access.bits().write(&mut buffer);
		self.this_class.0.write(&mut buffer);
		self.super_class.0.write(&mut buffer);

		(self.interfaces.len() as u16).write(&mut buffer);
		for interface in &self.interfaces {
			interface.0.write(&mut buffer);
		}

		// No fields.
		0u16.write(&mut buffer);

		(self.methods.len() as u16).write(&mut buffer);
		for (method, body) in self.methods.iter().zip(&code_bodies) {
			method.access.bits().write(&mut buffer);
			method.name.0.write(&mut buffer);
			method.descriptor.0.write(&mut buffer);
			match body {
				Some(body) => {
					1u16.write(&mut buffer);
					write_attribute(code_name.unwrap(), body, &mut buffer);
				},
				None => 0u16.write(&mut buffer),
			}
		}

		(self.attributes.len() as u16).write(&mut buffer);
		for (name, body) in &self.attributes {
			write_attribute(*name, body, &mut buffer);
		}

		buffer
	}
}

/// The empty-class form: a minimal `public class <name>` with no fields, no
/// methods, and no static initializer. Substituted when a class cannot be
/// rewritten safely.
pub fn empty_class(internal_name: &str, major_version: u16) -> Vec<u8> {
	ClassWriter::new(
		major_version,
		ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
		internal_name,
		"java/lang/Object",
	)
	.finish()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::raw::class_file::ClassFile;

	#[test]
	fn empty_class_parses_back() {
		let bytes = empty_class("com/example/Broken", 52);
		let class = ClassFile::parse(&bytes).unwrap();
		assert_eq!(class.this_class_name(), Some("com/example/Broken"));
		assert_eq!(class.super_class_name(), Some("java/lang/Object"));
		assert!(class.methods.is_empty());
		assert!(class.fields.is_empty());
		assert!(class.access.contains(ClassAccessFlags::PUBLIC));
	}

	#[test]
	fn assembled_method_round_trips() {
		let mut writer = ClassWriter::new(
			52,
			ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
			"com/example/Sample",
			"java/lang/Object",
		);
		let mut code = CodeWriter::new(1, 1);
		code.op(OpCode::iconst_1).op(OpCode::ireturn);
		writer.method(
			MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
			"one",
			"()I",
			Some(code),
		);
		let bytes = writer.finish();

		let class = ClassFile::parse(&bytes).unwrap();
		assert_eq!(class.methods.len(), 1);
		let method = &class.methods[0];
		assert_eq!(class.pool.utf8(method.name), Some("one"));
		assert_eq!(class.pool.utf8(method.descriptor), Some("()I"));
		let code = method.code(&class.pool).unwrap();
		assert_eq!(code.code, [0x04, 0xac]);
		assert_eq!(code.max_stack, 1);
	}

	#[test]
	fn emit_round_trips_unchanged_classes() {
		let bytes = empty_class("com/example/RoundTrip", 55);
		let class = ClassFile::parse(&bytes).unwrap();
		let emitted = class.emit(&Default::default(), None);
		assert_eq!(bytes, emitted);
	}
}
