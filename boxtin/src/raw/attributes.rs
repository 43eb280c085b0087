use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Error, ErrorKind};

use derivative::Derivative;

use crate::raw::constant_pool::{ClassIndex, ConstantPool, Utf8Index};
use crate::utilities::{read_bytes_slice_from_stream, FromByteStream, ToByteBuffer};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExceptionHandler {
	pub start_pc: u16,
	pub end_pc: u16,
	pub handler_pc: u16,
	pub catch_type: u16,
}

impl FromByteStream for ExceptionHandler {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(Self {
			start_pc: u16::read(stream, &())?,
			end_pc: u16::read(stream, &())?,
			handler_pc: u16::read(stream, &())?,
			catch_type: u16::read(stream, &())?,
		})
	}
}

impl ToByteBuffer for ExceptionHandler {
	fn write(&self, buffer: &mut Vec<u8>) {
		self.start_pc.write(buffer);
		self.end_pc.write(buffer);
		self.handler_pc.write(buffer);
		self.catch_type.write(buffer);
	}
}

/// A verifier type as it appears in stack-map frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VerificationType {
	Top,
	Integer,
	Float,
	Double,
	Long,
	Null,
	UninitializedThis,
	Object(ClassIndex),
	/// Carries the bytecode offset of the `new` that produced the value.
	Uninitialized(u16),
}

impl FromByteStream for VerificationType {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(match u8::read(stream, &())? {
			0 => VerificationType::Top,
			1 => VerificationType::Integer,
			2 => VerificationType::Float,
			3 => VerificationType::Double,
			4 => VerificationType::Long,
			5 => VerificationType::Null,
			6 => VerificationType::UninitializedThis,
			7 => VerificationType::Object(ClassIndex::read(stream, &())?),
			8 => VerificationType::Uninitialized(u16::read(stream, &())?),
			tag => return Err(Error::new(
				ErrorKind::InvalidData,
				format!("Unknown verification type tag {tag}"),
			)),
		})
	}
}

impl ToByteBuffer for VerificationType {
	fn write(&self, buffer: &mut Vec<u8>) {
		match self {
			VerificationType::Top => buffer.push(0),
			VerificationType::Integer => buffer.push(1),
			VerificationType::Float => buffer.push(2),
			VerificationType::Double => buffer.push(3),
			VerificationType::Long => buffer.push(4),
			VerificationType::Null => buffer.push(5),
			VerificationType::UninitializedThis => buffer.push(6),
			VerificationType::Object(class) => {
				buffer.push(7);
				class.0.write(buffer);
			},
			VerificationType::Uninitialized(offset) => {
				buffer.push(8);
				offset.write(buffer);
			},
		}
	}
}

/// A stack-map frame decoded to an absolute bytecode offset. The compressed
/// delta form is reconstructed on emission.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StackMapFrame {
	pub offset: u32,
	pub kind: FrameKind,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameKind {
	/// Locals as before, empty stack.
	Same,
	/// Locals as before, exactly one stack entry.
	SameLocals1Stack(VerificationType),
	/// The last `1..=3` locals are absent, empty stack.
	Chop(u8),
	/// `1..=3` locals appended, empty stack.
	Append(Vec<VerificationType>),
	Full {
		locals: Vec<VerificationType>,
		stack: Vec<VerificationType>,
	},
}

/// Decoded `StackMapTable` contents.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct StackMapTable {
	pub frames: Vec<StackMapFrame>,
}

impl FromByteStream for StackMapTable {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let count = u16::read(stream, &())? as usize;
		let mut frames = Vec::with_capacity(count);
		let mut offset: i64 = -1;

		for _ in 0..count {
			let frame_type = u8::read(stream, &())?;
			let (delta, kind) = match frame_type {
				0..=63 => (frame_type as u16, FrameKind::Same),
				64..=127 => (
					(frame_type - 64) as u16,
					FrameKind::SameLocals1Stack(VerificationType::read(stream, &())?),
				),
				247 => {
					let delta = u16::read(stream, &())?;
					(delta, FrameKind::SameLocals1Stack(VerificationType::read(stream, &())?))
				},
				248..=250 => (u16::read(stream, &())?, FrameKind::Chop(251 - frame_type)),
				251 => (u16::read(stream, &())?, FrameKind::Same),
				252..=254 => {
					let delta = u16::read(stream, &())?;
					let mut locals = Vec::with_capacity((frame_type - 251) as usize);
					for _ in 0..frame_type - 251 {
						locals.push(VerificationType::read(stream, &())?);
					}
					(delta, FrameKind::Append(locals))
				},
				255 => {
					let delta = u16::read(stream, &())?;
					let locals_count = u16::read(stream, &())? as usize;
					let mut locals = Vec::with_capacity(locals_count);
					for _ in 0..locals_count {
						locals.push(VerificationType::read(stream, &())?);
					}
					let stack_count = u16::read(stream, &())? as usize;
					let mut stack = Vec::with_capacity(stack_count);
					for _ in 0..stack_count {
						stack.push(VerificationType::read(stream, &())?);
					}
					(delta, FrameKind::Full { locals, stack })
				},
				_ => return Err(Error::new(
					ErrorKind::InvalidData,
					format!("Reserved stack-map frame type {frame_type}"),
				)),
			};

			offset += delta as i64 + 1;
			frames.push(StackMapFrame { offset: offset as u32, kind });
		}

		Ok(Self { frames })
	}
}

impl StackMapTable {
	/// Re-encodes frames, compressing `Same`/`SameLocals1Stack` deltas where
	/// they fit the short forms.
	pub fn write(&self, buffer: &mut Vec<u8>) {
		(self.frames.len() as u16).write(buffer);
		let mut previous: i64 = -1;
		for frame in &self.frames {
			let delta = (frame.offset as i64 - previous - 1) as u16;
			previous = frame.offset as i64;
			match &frame.kind {
				FrameKind::Same if delta <= 63 => buffer.push(delta as u8),
				FrameKind::Same => {
					buffer.push(251);
					delta.write(buffer);
				},
				FrameKind::SameLocals1Stack(entry) if delta <= 63 => {
					buffer.push(64 + delta as u8);
					entry.write(buffer);
				},
				FrameKind::SameLocals1Stack(entry) => {
					buffer.push(247);
					delta.write(buffer);
					entry.write(buffer);
				},
				FrameKind::Chop(count) => {
					buffer.push(251 - count);
					delta.write(buffer);
				},
				FrameKind::Append(locals) => {
					buffer.push(251 + locals.len() as u8);
					delta.write(buffer);
					for local in locals {
						local.write(buffer);
					}
				},
				FrameKind::Full { locals, stack } => {
					buffer.push(255);
					delta.write(buffer);
					(locals.len() as u16).write(buffer);
					for local in locals {
						local.write(buffer);
					}
					(stack.len() as u16).write(buffer);
					for entry in stack {
						entry.write(buffer);
					}
				},
			}
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BootstrapMethod {
	/// `MethodHandle` constant-pool index.
	pub method_ref: u16,
	/// Loadable constant-pool indices.
	pub arguments: Vec<u16>,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct BootstrapMethods {
	pub methods: Vec<BootstrapMethod>,
}

impl FromByteStream for BootstrapMethods {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let count = u16::read(stream, &())? as usize;
		let mut methods = Vec::with_capacity(count);
		for _ in 0..count {
			let method_ref = u16::read(stream, &())?;
			let argument_count = u16::read(stream, &())? as usize;
			let mut arguments = Vec::with_capacity(argument_count);
			for _ in 0..argument_count {
				arguments.push(u16::read(stream, &())?);
			}
			methods.push(BootstrapMethod { method_ref, arguments });
		}
		Ok(Self { methods })
	}
}

impl BootstrapMethods {
	pub fn write(&self, buffer: &mut Vec<u8>) {
		(self.methods.len() as u16).write(buffer);
		for method in &self.methods {
			method.method_ref.write(buffer);
			(method.arguments.len() as u16).write(buffer);
			for argument in &method.arguments {
				argument.write(buffer);
			}
		}
	}
}

/// The `Code` attribute of a method, with its raw code array borrowed from
/// the class bytes and nested attributes parsed recursively.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct CodeAttribute<'l> {
	pub max_stack: u16,
	pub max_locals: u16,
	#[derivative(Debug(format_with = "crate::raw::bytecode::debug_code"))]
	pub code: &'l [u8],
	pub handlers: Vec<ExceptionHandler>,
	pub attributes: Vec<Attribute<'l>>,
}

impl<'l> CodeAttribute<'l> {
	fn read(stream: &mut Cursor<&'l [u8]>, pool: &ConstantPool) -> std::io::Result<Self> {
		let max_stack = u16::read(stream, &())?;
		let max_locals = u16::read(stream, &())?;
		let code_length = u32::read(stream, &())? as usize;
		let code = read_bytes_slice_from_stream(stream, code_length)?;

		let handler_count = u16::read(stream, &())? as usize;
		let mut handlers = Vec::with_capacity(handler_count);
		for _ in 0..handler_count {
			handlers.push(ExceptionHandler::read(stream, &())?);
		}

		let attribute_count = u16::read(stream, &())? as usize;
		let mut attributes = Vec::with_capacity(attribute_count);
		for _ in 0..attribute_count {
			attributes.push(Attribute::read(stream, pool)?);
		}

		Ok(Self { max_stack, max_locals, code, handlers, attributes })
	}

	pub fn stack_map<'a>(&'a self, pool: &ConstantPool) -> Option<&'a StackMapTable> {
		self.attributes.iter().find_map(|attribute| match &attribute.info {
			AttributeInfo::StackMapTable(table) if pool.utf8(attribute.name) == Some("StackMapTable") => Some(table),
			_ => None,
		})
	}
}

#[derive(Clone)]
pub enum AttributeInfo<'l> {
	Code(CodeAttribute<'l>),
	StackMapTable(StackMapTable),
	BootstrapMethods(BootstrapMethods),
	/// Anything this rewriter has no need to interpret; re-emitted verbatim.
	Other(&'l [u8]),
}

impl Debug for AttributeInfo<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			AttributeInfo::Code(code) => Debug::fmt(code, f),
			AttributeInfo::StackMapTable(table) => Debug::fmt(table, f),
			AttributeInfo::BootstrapMethods(methods) => Debug::fmt(methods, f),
			AttributeInfo::Other(bytes) => write!(f, "[u8; {}]", bytes.len()),
		}
	}
}

/// A parsed attribute. `raw` spans the entire attribute including its header
/// so untouched attributes re-emit byte-for-byte.
#[derive(Debug, Clone)]
pub struct Attribute<'l> {
	pub name: Utf8Index,
	pub info: AttributeInfo<'l>,
	pub raw: &'l [u8],
}

impl<'l> Attribute<'l> {
	pub fn read(stream: &mut Cursor<&'l [u8]>, pool: &ConstantPool) -> std::io::Result<Self> {
		let start = stream.position() as usize;
		let name = Utf8Index::read(stream, &())?;
		let length = u32::read(stream, &())? as usize;
		let body = read_bytes_slice_from_stream(stream, length)?;
		let raw = &stream.get_ref()[start..stream.position() as usize];

		let info = match pool.utf8(name) {
			Some("Code") => {
				let mut body_stream = Cursor::new(body);
				AttributeInfo::Code(CodeAttribute::read(&mut body_stream, pool)?)
			},
			Some("StackMapTable") => {
				let mut body_stream = Cursor::new(body);
				AttributeInfo::StackMapTable(StackMapTable::read(&mut body_stream, &())?)
			},
			Some("BootstrapMethods") => {
				let mut body_stream = Cursor::new(body);
				AttributeInfo::BootstrapMethods(BootstrapMethods::read(&mut body_stream, &())?)
			},
			_ => AttributeInfo::Other(body),
		};

		Ok(Self { name, info, raw })
	}

	pub fn write_raw(&self, buffer: &mut Vec<u8>) {
		buffer.extend_from_slice(self.raw);
	}
}

/// Writes an attribute header followed by an already-built body.
pub fn write_attribute(name: Utf8Index, body: &[u8], buffer: &mut Vec<u8>) {
	name.0.write(buffer);
	(body.len() as u32).write(buffer);
	buffer.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stack_map_frames_round_trip() {
		let table = StackMapTable {
			frames: vec![
				StackMapFrame { offset: 5, kind: FrameKind::Same },
				StackMapFrame {
					offset: 9,
					kind: FrameKind::SameLocals1Stack(VerificationType::Integer),
				},
				StackMapFrame { offset: 100, kind: FrameKind::Chop(2) },
				StackMapFrame {
					offset: 200,
					kind: FrameKind::Append(vec![VerificationType::Long, VerificationType::Top]),
				},
				StackMapFrame {
					offset: 400,
					kind: FrameKind::Full {
						locals: vec![VerificationType::Object(ClassIndex(3))],
						stack: vec![VerificationType::Uninitialized(42), VerificationType::Null],
					},
				},
			],
		};

		let mut bytes = vec![];
		table.write(&mut bytes);
		let mut stream = Cursor::new(bytes.as_slice());
		assert_eq!(StackMapTable::read(&mut stream, &()).unwrap(), table);
	}

	#[test]
	fn long_deltas_use_extended_forms() {
		let table = StackMapTable {
			frames: vec![StackMapFrame { offset: 1000, kind: FrameKind::Same }],
		};
		let mut bytes = vec![];
		table.write(&mut bytes);
		assert_eq!(bytes[2], 251);
		let mut stream = Cursor::new(bytes.as_slice());
		assert_eq!(StackMapTable::read(&mut stream, &()).unwrap(), table);
	}

	#[test]
	fn bootstrap_methods_round_trip() {
		let methods = BootstrapMethods {
			methods: vec![
				BootstrapMethod { method_ref: 17, arguments: vec![2, 3, 4] },
				BootstrapMethod { method_ref: 21, arguments: vec![] },
			],
		};
		let mut bytes = vec![];
		methods.write(&mut bytes);
		let mut stream = Cursor::new(bytes.as_slice());
		assert_eq!(BootstrapMethods::read(&mut stream, &()).unwrap(), methods);
	}
}
