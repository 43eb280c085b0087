use std::io::Cursor;

use bitflags::bitflags;
use fxhash::FxHashMap;

use crate::raw::attributes::{Attribute, AttributeInfo, BootstrapMethods, CodeAttribute};
use crate::raw::constant_pool::{ClassIndex, ConstantPool, Utf8Index};
use crate::raw::ClassFormatError;
use crate::utilities::{FromByteStream, ToByteBuffer};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Major versions this codec understands: 45 (1.1) through 69 (25).
pub const SUPPORTED_MAJOR_VERSIONS: std::ops::RangeInclusive<u16> = 45..=69;

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ClassAccessFlags: u16 {
		const PUBLIC = 0x0001;
		const FINAL = 0x0010;
		const SUPER = 0x0020;
		const INTERFACE = 0x0200;
		const ABSTRACT = 0x0400;
		const SYNTHETIC = 0x1000;
		const ANNOTATION = 0x2000;
		const ENUM = 0x4000;
		const MODULE = 0x8000;
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodAccessFlags: u16 {
		const PUBLIC = 0x0001;
		const PRIVATE = 0x0002;
		const PROTECTED = 0x0004;
		const STATIC = 0x0008;
		const FINAL = 0x0010;
		const SYNCHRONIZED = 0x0020;
		const BRIDGE = 0x0040;
		const VARARGS = 0x0080;
		const NATIVE = 0x0100;
		const ABSTRACT = 0x0400;
		const STRICT = 0x0800;
		const SYNTHETIC = 0x1000;
	}
}

/// A field or method. `raw` spans the whole member record so untouched
/// members re-emit byte-for-byte.
#[derive(Debug, Clone)]
pub struct Member<'l> {
	pub access: u16,
	pub name: Utf8Index,
	pub descriptor: Utf8Index,
	pub attributes: Vec<Attribute<'l>>,
	pub raw: &'l [u8],
}

impl<'l> Member<'l> {
	fn read(stream: &mut Cursor<&'l [u8]>, pool: &ConstantPool) -> std::io::Result<Self> {
		let start = stream.position() as usize;
		let access = u16::read(stream, &())?;
		let name = Utf8Index::read(stream, &())?;
		let descriptor = Utf8Index::read(stream, &())?;

		let attribute_count = u16::read(stream, &())? as usize;
		let mut attributes = Vec::with_capacity(attribute_count);
		for _ in 0..attribute_count {
			attributes.push(Attribute::read(stream, pool)?);
		}

		let raw = &stream.get_ref()[start..stream.position() as usize];
		Ok(Self { access, name, descriptor, attributes, raw })
	}

	pub fn code<'a>(&'a self, pool: &ConstantPool) -> Option<&'a CodeAttribute<'l>> {
		self.attributes.iter().find_map(|attribute| match &attribute.info {
			AttributeInfo::Code(code) if pool.utf8(attribute.name) == Some("Code") => Some(code),
			_ => None,
		})
	}
}

/// A parsed class file. Transient: scoped to a single transform call and
/// borrowing from the input buffer.
#[derive(Debug)]
pub struct ClassFile<'l> {
	pub minor_version: u16,
	pub major_version: u16,
	pub pool: ConstantPool,
	pub access: ClassAccessFlags,
	pub this_class: ClassIndex,
	pub super_class: u16,
	pub interfaces: Vec<ClassIndex>,
	pub fields: Vec<Member<'l>>,
	pub methods: Vec<Member<'l>>,
	pub attributes: Vec<Attribute<'l>>,
}

impl<'l> ClassFile<'l> {
	#[tracing::instrument(skip_all)]
	pub fn parse(data: &'l [u8]) -> Result<Self, ClassFormatError> {
		let mut stream = Cursor::new(data);

		if u32::read(&mut stream, &())? != MAGIC {
			return Err(ClassFormatError::BadMagic);
		}

		let minor_version = u16::read(&mut stream, &())?;
		let major_version = u16::read(&mut stream, &())?;
		if !SUPPORTED_MAJOR_VERSIONS.contains(&major_version) {
			return Err(ClassFormatError::UnsupportedVersion(major_version));
		}

		let pool = ConstantPool::read(&mut stream, &())?;

		let access = ClassAccessFlags::from_bits_retain(u16::read(&mut stream, &())?);
		let this_class = ClassIndex::read(&mut stream, &())?;
		let super_class = u16::read(&mut stream, &())?;

		let interface_count = u16::read(&mut stream, &())? as usize;
		let mut interfaces = Vec::with_capacity(interface_count);
		for _ in 0..interface_count {
			interfaces.push(ClassIndex::read(&mut stream, &())?);
		}

		let field_count = u16::read(&mut stream, &())? as usize;
		let mut fields = Vec::with_capacity(field_count);
		for _ in 0..field_count {
			fields.push(Member::read(&mut stream, &pool)?);
		}

		let method_count = u16::read(&mut stream, &())? as usize;
		let mut methods = Vec::with_capacity(method_count);
		for _ in 0..method_count {
			methods.push(Member::read(&mut stream, &pool)?);
		}

		let attribute_count = u16::read(&mut stream, &())? as usize;
		let mut attributes = Vec::with_capacity(attribute_count);
		for _ in 0..attribute_count {
			attributes.push(Attribute::read(&mut stream, &pool)?);
		}

		if stream.position() as usize != data.len() {
			let trailing = data.len() - stream.position() as usize;
			return Err(ClassFormatError::Malformed(format!("{trailing} trailing bytes")));
		}

		Ok(Self {
			minor_version,
			major_version,
			pool,
			access,
			this_class,
			super_class,
			interfaces,
			fields,
			methods,
			attributes,
		})
	}

	pub fn this_class_name(&self) -> Option<&str> {
		self.pool.class_name(self.this_class)
	}

	pub fn super_class_name(&self) -> Option<&str> {
		match self.super_class {
			0 => None,
			index => self.pool.class_name(ClassIndex(index)),
		}
	}

	pub fn bootstrap_methods(&self) -> Option<&BootstrapMethods> {
		self.attributes.iter().find_map(|attribute| match &attribute.info {
			AttributeInfo::BootstrapMethods(methods)
				if self.pool.utf8(attribute.name) == Some("BootstrapMethods") => Some(methods),
			_ => None,
		})
	}

	/// Re-emits the class. `method_replacements` maps a method index to the
	/// full replacement `method_info` record; `bootstrap_replacement`
	/// substitutes the `BootstrapMethods` attribute body. The constant pool
	/// is emitted as it currently stands, so appended entries are included
	/// and a class with no replacements round-trips byte-for-byte.
	#[tracing::instrument(skip_all)]
	pub fn emit(
		&self,
		method_replacements: &FxHashMap<usize, Vec<u8>>,
		bootstrap_replacement: Option<&BootstrapMethods>,
	) -> Vec<u8> {
		let mut buffer = Vec::with_capacity(1024);

		MAGIC.write(&mut buffer);
		self.minor_version.write(&mut buffer);
		self.major_version.write(&mut buffer);
		self.pool.write(&mut buffer);

		self.access.bits().write(&mut buffer);
		self.this_class.0.write(&mut buffer);
		self.super_class.write(&mut buffer);

		(self.interfaces.len() as u16).write(&mut buffer);
		for interface in &self.interfaces {
			interface.0.write(&mut buffer);
		}

		(self.fields.len() as u16).write(&mut buffer);
		for field in &self.fields {
			buffer.extend_from_slice(field.raw);
		}

		(self.methods.len() as u16).write(&mut buffer);
		for (index, method) in self.methods.iter().enumerate() {
			match method_replacements.get(&index) {
				Some(replacement) => buffer.extend_from_slice(replacement),
				None => buffer.extend_from_slice(method.raw),
			}
		}

		(self.attributes.len() as u16).write(&mut buffer);
		for attribute in &self.attributes {
			let replaced = matches!(
				(&attribute.info, bootstrap_replacement),
				(AttributeInfo::BootstrapMethods(_), Some(_))
			);
			match (replaced, bootstrap_replacement) {
				(true, Some(methods)) => {
					let mut body = vec![];
					methods.write(&mut body);
					crate::raw::attributes::write_attribute(attribute.name, &body, &mut buffer);
				},
				_ => attribute.write_raw(&mut buffer),
			}
		}

		buffer
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_bad_magic_as_ignorable() {
		let error = ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]).unwrap_err();
		assert!(matches!(error, ClassFormatError::BadMagic));
		assert!(error.ignorable());
	}

	#[test]
	fn rejects_truncation_as_ignorable() {
		let error = ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00]).unwrap_err();
		assert!(matches!(error, ClassFormatError::Truncated));
		assert!(error.ignorable());
	}

	#[test]
	fn rejects_future_versions_as_hard_errors() {
		let error = ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0xFF]).unwrap_err();
		assert!(matches!(error, ClassFormatError::UnsupportedVersion(255)));
		assert!(!error.ignorable());
	}
}
