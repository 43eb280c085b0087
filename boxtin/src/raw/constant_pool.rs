use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Error, ErrorKind};

use fxhash::FxHashMap;
use paste::paste;
use boxtin_derive::FromRepr;

use crate::utilities::{read_bytes_slice_from_stream, FromByteStream, ToByteBuffer};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum ConstantTag {
	Utf8 = 1,
	Integer = 3,
	Float = 4,
	Long = 5,
	Double = 6,
	Class = 7,
	String = 8,
	Fieldref = 9,
	Methodref = 10,
	InterfaceMethodref = 11,
	NameAndType = 12,
	MethodHandle = 15,
	MethodType = 16,
	Dynamic = 17,
	InvokeDynamic = 18,
	Module = 19,
	Package = 20,
}

/// Reference kinds used by `MethodHandle` entries.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum MethodHandleKind {
	GetField = 1,
	GetStatic = 2,
	PutField = 3,
	PutStatic = 4,
	InvokeVirtual = 5,
	NewInvokeSpecial = 8,
	InvokeStatic = 6,
	InvokeSpecial = 7,
	InvokeInterface = 9,
}

macro_rules! define_pool_indices {
	($($id: ident),*) => {
		paste! {
			$(
				#[repr(transparent)]
				#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
				pub struct [<$id Index>](pub u16);

				impl FromByteStream for [<$id Index>] {
					type Deps = ();
					#[inline]
					fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
						Ok(Self(u16::read(stream, &())?))
					}
				}

				impl From<[<$id Index>]> for u16 {
					#[inline]
					fn from(value: [<$id Index>]) -> u16 {
						value.0
					}
				}
			)*
		}
	};
}

define_pool_indices!(Utf8, Class, NameAndType, Member);

/// A single constant-pool entry.
///
/// `Utf8` keeps the raw modified-UTF-8 bytes so untouched classes re-emit
/// byte-for-byte; `Float`/`Double` keep raw bit patterns for the same reason.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Constant {
	Utf8(Box<[u8]>),
	Integer(i32),
	Float(u32),
	Long(i64),
	Double(u64),
	Class { name: Utf8Index },
	String { value: Utf8Index },
	Fieldref { class: ClassIndex, name_and_type: NameAndTypeIndex },
	Methodref { class: ClassIndex, name_and_type: NameAndTypeIndex },
	InterfaceMethodref { class: ClassIndex, name_and_type: NameAndTypeIndex },
	NameAndType { name: Utf8Index, descriptor: Utf8Index },
	MethodHandle { kind: MethodHandleKind, reference: u16 },
	MethodType { descriptor: Utf8Index },
	Dynamic { bootstrap_method: u16, name_and_type: NameAndTypeIndex },
	InvokeDynamic { bootstrap_method: u16, name_and_type: NameAndTypeIndex },
	Module { name: Utf8Index },
	Package { name: Utf8Index },
}

impl Constant {
	pub fn tag(&self) -> ConstantTag {
		match self {
			Constant::Utf8(_) => ConstantTag::Utf8,
			Constant::Integer(_) => ConstantTag::Integer,
			Constant::Float(_) => ConstantTag::Float,
			Constant::Long(_) => ConstantTag::Long,
			Constant::Double(_) => ConstantTag::Double,
			Constant::Class { .. } => ConstantTag::Class,
			Constant::String { .. } => ConstantTag::String,
			Constant::Fieldref { .. } => ConstantTag::Fieldref,
			Constant::Methodref { .. } => ConstantTag::Methodref,
			Constant::InterfaceMethodref { .. } => ConstantTag::InterfaceMethodref,
			Constant::NameAndType { .. } => ConstantTag::NameAndType,
			Constant::MethodHandle { .. } => ConstantTag::MethodHandle,
			Constant::MethodType { .. } => ConstantTag::MethodType,
			Constant::Dynamic { .. } => ConstantTag::Dynamic,
			Constant::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
			Constant::Module { .. } => ConstantTag::Module,
			Constant::Package { .. } => ConstantTag::Package,
		}
	}

	/// Long and double entries take up two pool slots.
	#[inline]
	pub fn is_wide(&self) -> bool {
		matches!(self, Constant::Long(_) | Constant::Double(_))
	}

	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
		let tag = u8::read(stream, &())?;
		let Some(tag) = ConstantTag::from_repr(tag) else {
			return Err(Error::new(ErrorKind::InvalidData, format!("Unknown constant tag {tag}")));
		};

		Ok(match tag {
			ConstantTag::Utf8 => {
				let length = u16::read(stream, &())? as usize;
				let bytes = read_bytes_slice_from_stream(stream, length)?;
				Constant::Utf8(Box::from(bytes))
			},
			ConstantTag::Integer => Constant::Integer(i32::read(stream, &())?),
			ConstantTag::Float => Constant::Float(u32::read(stream, &())?),
			ConstantTag::Long => Constant::Long(i64::read(stream, &())?),
			ConstantTag::Double => Constant::Double(u64::read(stream, &())?),
			ConstantTag::Class => Constant::Class { name: Utf8Index::read(stream, &())? },
			ConstantTag::String => Constant::String { value: Utf8Index::read(stream, &())? },
			ConstantTag::Fieldref => Constant::Fieldref {
				class: ClassIndex::read(stream, &())?,
				name_and_type: NameAndTypeIndex::read(stream, &())?,
			},
			ConstantTag::Methodref => Constant::Methodref {
				class: ClassIndex::read(stream, &())?,
				name_and_type: NameAndTypeIndex::read(stream, &())?,
			},
			ConstantTag::InterfaceMethodref => Constant::InterfaceMethodref {
				class: ClassIndex::read(stream, &())?,
				name_and_type: NameAndTypeIndex::read(stream, &())?,
			},
			ConstantTag::NameAndType => Constant::NameAndType {
				name: Utf8Index::read(stream, &())?,
				descriptor: Utf8Index::read(stream, &())?,
			},
			ConstantTag::MethodHandle => {
				let kind = u8::read(stream, &())?;
				let Some(kind) = MethodHandleKind::from_repr(kind) else {
					return Err(Error::new(ErrorKind::InvalidData, format!("Unknown method handle kind {kind}")));
				};
				Constant::MethodHandle { kind, reference: u16::read(stream, &())? }
			},
			ConstantTag::MethodType => Constant::MethodType { descriptor: Utf8Index::read(stream, &())? },
			ConstantTag::Dynamic => Constant::Dynamic {
				bootstrap_method: u16::read(stream, &())?,
				name_and_type: NameAndTypeIndex::read(stream, &())?,
			},
			ConstantTag::InvokeDynamic => Constant::InvokeDynamic {
				bootstrap_method: u16::read(stream, &())?,
				name_and_type: NameAndTypeIndex::read(stream, &())?,
			},
			ConstantTag::Module => Constant::Module { name: Utf8Index::read(stream, &())? },
			ConstantTag::Package => Constant::Package { name: Utf8Index::read(stream, &())? },
		})
	}

	fn write(&self, buffer: &mut Vec<u8>) {
		(self.tag() as u8).write(buffer);
		match self {
			Constant::Utf8(bytes) => {
				(bytes.len() as u16).write(buffer);
				buffer.extend_from_slice(bytes);
			},
			Constant::Integer(value) => value.write(buffer),
			Constant::Float(bits) => bits.write(buffer),
			Constant::Long(value) => value.write(buffer),
			Constant::Double(bits) => bits.write(buffer),
			Constant::Class { name } => name.0.write(buffer),
			Constant::String { value } => value.0.write(buffer),
			Constant::Fieldref { class, name_and_type }
			| Constant::Methodref { class, name_and_type }
			| Constant::InterfaceMethodref { class, name_and_type } => {
				class.0.write(buffer);
				name_and_type.0.write(buffer);
			},
			Constant::NameAndType { name, descriptor } => {
				name.0.write(buffer);
				descriptor.0.write(buffer);
			},
			Constant::MethodHandle { kind, reference } => {
				(*kind as u8).write(buffer);
				reference.write(buffer);
			},
			Constant::MethodType { descriptor } => descriptor.0.write(buffer),
			Constant::Dynamic { bootstrap_method, name_and_type }
			| Constant::InvokeDynamic { bootstrap_method, name_and_type } => {
				bootstrap_method.write(buffer);
				name_and_type.0.write(buffer);
			},
			Constant::Module { name } => name.0.write(buffer),
			Constant::Package { name } => name.0.write(buffer),
		}
	}
}

/// A method, field, or interface-method reference resolved out of the pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemberRef<'l> {
	pub class_name: &'l str,
	pub name: &'l str,
	pub descriptor: &'l str,
	pub interface: bool,
}

/// The constant pool: an index-stable vector of entries plus an append-only,
/// deduplicating builder. Slot 0 is unused; `Long`/`Double` entries occupy
/// two slots, the second of which is `None`.
#[derive(Clone, Eq, PartialEq)]
pub struct ConstantPool {
	entries: Vec<Option<Constant>>,
	dedup: FxHashMap<Constant, u16>,
}

impl Debug for ConstantPool {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_map();
		for (i, entry) in self.entries.iter().enumerate() {
			if let Some(entry) = entry {
				dbg.entry(&i, entry);
			}
		}
		dbg.finish()
	}
}

impl FromByteStream for ConstantPool {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let count = u16::read(stream, &())? as usize;
		if count == 0 {
			return Err(Error::new(ErrorKind::InvalidData, "Empty constant pool"));
		}

		let mut entries = Vec::with_capacity(count);
		let mut dedup = FxHashMap::default();
		entries.push(None);

		while entries.len() < count {
			let entry = Constant::read(stream)?;
			let wide = entry.is_wide();
			dedup.entry(entry.clone()).or_insert(entries.len() as u16);
			entries.push(Some(entry));
			if wide {
				entries.push(None);
			}
		}

		if entries.len() != count {
			return Err(Error::new(ErrorKind::InvalidData, "Constant pool overruns its declared count"));
		}

		Ok(Self { entries, dedup })
	}
}

impl ConstantPool {
	/// An empty pool containing only the reserved slot 0.
	pub fn new() -> Self {
		Self {
			entries: vec![None],
			dedup: FxHashMap::default(),
		}
	}

	/// Total slot count, including the reserved slot 0.
	#[inline]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.entries.len() <= 1
	}

	pub fn get(&self, index: u16) -> Option<&Constant> {
		self.entries.get(index as usize)?.as_ref()
	}

	pub fn utf8(&self, index: Utf8Index) -> Option<&str> {
		match self.get(index.0)? {
			Constant::Utf8(bytes) => std::str::from_utf8(bytes).ok(),
			_ => None,
		}
	}

	pub fn class_name(&self, index: ClassIndex) -> Option<&str> {
		match self.get(index.0)? {
			Constant::Class { name } => self.utf8(*name),
			_ => None,
		}
	}

	pub fn name_and_type(&self, index: NameAndTypeIndex) -> Option<(&str, &str)> {
		match self.get(index.0)? {
			Constant::NameAndType { name, descriptor } => Some((self.utf8(*name)?, self.utf8(*descriptor)?)),
			_ => None,
		}
	}

	/// Resolves a `Fieldref`/`Methodref`/`InterfaceMethodref` entry.
	pub fn member_ref(&self, index: u16) -> Option<MemberRef> {
		let (class, name_and_type, interface) = match self.get(index)? {
			Constant::Methodref { class, name_and_type } => (class, name_and_type, false),
			Constant::Fieldref { class, name_and_type } => (class, name_and_type, false),
			Constant::InterfaceMethodref { class, name_and_type } => (class, name_and_type, true),
			_ => return None,
		};
		let (name, descriptor) = self.name_and_type(*name_and_type)?;
		Some(MemberRef {
			class_name: self.class_name(*class)?,
			name,
			descriptor,
			interface,
		})
	}

	/// Resolves the `NameAndType` behind a `Dynamic`/`InvokeDynamic` entry,
	/// along with its bootstrap-method index.
	pub fn invoke_dynamic(&self, index: u16) -> Option<(u16, &str, &str)> {
		match self.get(index)? {
			Constant::InvokeDynamic { bootstrap_method, name_and_type }
			| Constant::Dynamic { bootstrap_method, name_and_type } => {
				let (name, descriptor) = self.name_and_type(*name_and_type)?;
				Some((*bootstrap_method, name, descriptor))
			},
			_ => None,
		}
	}

	fn append(&mut self, entry: Constant) -> u16 {
		if let Some(index) = self.dedup.get(&entry) {
			return *index;
		}
		let index = self.entries.len() as u16;
		let wide = entry.is_wide();
		self.dedup.insert(entry.clone(), index);
		self.entries.push(Some(entry));
		if wide {
			self.entries.push(None);
		}
		index
	}

	pub fn intern_utf8(&mut self, value: &str) -> Utf8Index {
		Utf8Index(self.append(Constant::Utf8(Box::from(value.as_bytes()))))
	}

	pub fn intern_class(&mut self, internal_name: &str) -> ClassIndex {
		let name = self.intern_utf8(internal_name);
		ClassIndex(self.append(Constant::Class { name }))
	}

	pub fn intern_string(&mut self, value: &str) -> u16 {
		let value = self.intern_utf8(value);
		self.append(Constant::String { value })
	}

	pub fn intern_integer(&mut self, value: i32) -> u16 {
		self.append(Constant::Integer(value))
	}

	pub fn intern_float(&mut self, value: f32) -> u16 {
		self.append(Constant::Float(value.to_bits()))
	}

	pub fn intern_long(&mut self, value: i64) -> u16 {
		self.append(Constant::Long(value))
	}

	pub fn intern_double(&mut self, value: f64) -> u16 {
		self.append(Constant::Double(value.to_bits()))
	}

	pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> NameAndTypeIndex {
		let name = self.intern_utf8(name);
		let descriptor = self.intern_utf8(descriptor);
		NameAndTypeIndex(self.append(Constant::NameAndType { name, descriptor }))
	}

	pub fn intern_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> MemberIndex {
		let class = self.intern_class(class);
		let name_and_type = self.intern_name_and_type(name, descriptor);
		MemberIndex(self.append(Constant::Methodref { class, name_and_type }))
	}

	pub fn intern_interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> MemberIndex {
		let class = self.intern_class(class);
		let name_and_type = self.intern_name_and_type(name, descriptor);
		MemberIndex(self.append(Constant::InterfaceMethodref { class, name_and_type }))
	}

	pub fn intern_method_handle(&mut self, kind: MethodHandleKind, reference: u16) -> u16 {
		self.append(Constant::MethodHandle { kind, reference })
	}

	pub fn intern_invoke_dynamic(&mut self, bootstrap_method: u16, name: &str, descriptor: &str) -> u16 {
		let name_and_type = self.intern_name_and_type(name, descriptor);
		self.append(Constant::InvokeDynamic { bootstrap_method, name_and_type })
	}

	pub fn write(&self, buffer: &mut Vec<u8>) {
		(self.entries.len() as u16).write(buffer);
		for entry in self.entries.iter().flatten() {
			entry.write(buffer);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_pool() -> ConstantPool {
		let mut pool = ConstantPool::new();
		pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		pool
	}

	#[test]
	fn intern_deduplicates() {
		let mut pool = sample_pool();
		let before = pool.len();
		let a = pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		assert_eq!(before, pool.len());
		let b = pool.intern_method_ref("java/lang/System", "exit", "(I)V");
		assert_eq!(a, b);
	}

	#[test]
	fn wide_entries_occupy_two_slots() {
		let mut pool = sample_pool();
		let before = pool.len();
		let index = pool.intern_long(42);
		assert_eq!(index as usize, before);
		assert_eq!(pool.len(), before + 2);
		assert_eq!(pool.intern_long(42) as usize, before);
	}

	#[test]
	fn round_trips_through_bytes() {
		let pool = sample_pool();
		let mut bytes = vec![];
		pool.write(&mut bytes);

		let mut stream = Cursor::new(bytes.as_slice());
		let reread = ConstantPool::read(&mut stream, &()).unwrap();
		assert_eq!(pool, reread);
	}

	#[test]
	fn member_ref_resolves() {
		let mut pool = sample_pool();
		let index = pool.intern_method_ref("java/io/File", "delete", "()Z");
		let member = pool.member_ref(index.0).unwrap();
		assert_eq!(member.class_name, "java/io/File");
		assert_eq!(member.name, "delete");
		assert_eq!(member.descriptor, "()Z");
		assert!(!member.interface);
	}
}
