use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Error, ErrorKind};

use nohash_hasher::IntMap;

use crate::utilities::{switch_padding, FromByteStream, ToByteBuffer};

macro_rules! debug_opcode {
	($name: ident, $f: expr, $self: expr, $ident: ident) => {
		if $name::$ident == *$self {
			return write!($f, "OpCode::{}", stringify!($ident));
		}
	};
	($name: ident, $f: expr, $self: expr, $ident: ident ($ty: ty)) => {
		if let $name::$ident(v) = $self {
			return write!($f, "OpCode::{}({:?})", stringify!($ident), v);
		}
	};
}

macro_rules! write_opcode {
	($name: ident, $buffer: expr, $self: expr, $ident: ident, $discriminant: literal) => {
		if $name::$ident == *$self {
			$buffer.push($discriminant);
			return;
		}
	};
	($name: ident, $buffer: expr, $self: expr, $ident: ident ($ty: ty), $discriminant: literal) => {
		if let $name::$ident(v) = $self {
			$buffer.push($discriminant);
			v.write($buffer);
			return;
		}
	};
}

macro_rules! define_opcodes {
	(
		enum $name: ident {
			$(
				$(#[$attr:meta])*
				$ident: ident $(($ty: ty))? = $discriminant: literal
			),* $(,)?
		}
	) => {
		#[allow(non_camel_case_types)]
		#[derive(Clone, PartialEq)]
		pub enum $name {
			$(
				$(#[$attr])*
				$ident $(($ty))?
			),*
		}

		impl $name {
			/// Decode one instruction. The cursor position is the bytecode
			/// offset, which switch payloads use for alignment padding.
			pub fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
				let discriminant = u8::read(stream, &())?;
				match discriminant {
					$($discriminant => Ok($name::$ident $((<$ty>::read(stream, &())?))?),)*
					_ => Err(Error::new(
						ErrorKind::InvalidData,
						format!("Undefined opcode {discriminant:#04x}"),
					)),
				}
			}

			/// Encode into `buffer`; `buffer.len()` must equal the
			/// instruction's bytecode offset so switches can re-pad.
			pub fn write(&self, buffer: &mut Vec<u8>) {
				$(write_opcode! { $name, buffer, self, $ident $(($ty))?, $discriminant })*
				unreachable!()
			}

			pub fn opcode(&self) -> u8 {
				match self {
					$($name::$ident { .. } => $discriminant),*
				}
			}
		}

		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
				$(debug_opcode! { $name, f, self, $ident $(($ty))? })*
				Ok(())
			}
		}
	};
}

define_opcodes! {
	enum OpCode {
		/// Do nothing.
		nop = 0x00,
		/// Push a null reference.
		aconst_null = 0x01,
		/// Push int -1.
		iconst_m1 = 0x02,
		/// Push int 0.
		iconst_0 = 0x03,
		/// Push int 1.
		iconst_1 = 0x04,
		/// Push int 2.
		iconst_2 = 0x05,
		/// Push int 3.
		iconst_3 = 0x06,
		/// Push int 4.
		iconst_4 = 0x07,
		/// Push int 5.
		iconst_5 = 0x08,
		/// Push long 0.
		lconst_0 = 0x09,
		/// Push long 1.
		lconst_1 = 0x0a,
		/// Push float 0.
		fconst_0 = 0x0b,
		/// Push float 1.
		fconst_1 = 0x0c,
		/// Push float 2.
		fconst_2 = 0x0d,
		/// Push double 0.
		dconst_0 = 0x0e,
		/// Push double 1.
		dconst_1 = 0x0f,
		/// Push a sign-extended byte.
		bipush(i8) = 0x10,
		/// Push a sign-extended short.
		sipush(i16) = 0x11,
		/// Push a loadable constant-pool entry, one-byte index.
		ldc(u8) = 0x12,
		/// Push a loadable constant-pool entry, two-byte index.
		ldc_w(u16) = 0x13,
		/// Push a long or double constant-pool entry.
		ldc2_w(u16) = 0x14,
		/// Load int from local variable.
		iload(u8) = 0x15,
		/// Load long from local variable.
		lload(u8) = 0x16,
		/// Load float from local variable.
		fload(u8) = 0x17,
		/// Load double from local variable.
		dload(u8) = 0x18,
		/// Load reference from local variable.
		aload(u8) = 0x19,
		iload_0 = 0x1a,
		iload_1 = 0x1b,
		iload_2 = 0x1c,
		iload_3 = 0x1d,
		lload_0 = 0x1e,
		lload_1 = 0x1f,
		lload_2 = 0x20,
		lload_3 = 0x21,
		fload_0 = 0x22,
		fload_1 = 0x23,
		fload_2 = 0x24,
		fload_3 = 0x25,
		dload_0 = 0x26,
		dload_1 = 0x27,
		dload_2 = 0x28,
		dload_3 = 0x29,
		aload_0 = 0x2a,
		aload_1 = 0x2b,
		aload_2 = 0x2c,
		aload_3 = 0x2d,
		/// Load int from array.
		iaload = 0x2e,
		laload = 0x2f,
		faload = 0x30,
		daload = 0x31,
		aaload = 0x32,
		baload = 0x33,
		caload = 0x34,
		saload = 0x35,
		/// Store int into local variable.
		istore(u8) = 0x36,
		lstore(u8) = 0x37,
		fstore(u8) = 0x38,
		dstore(u8) = 0x39,
		astore(u8) = 0x3a,
		istore_0 = 0x3b,
		istore_1 = 0x3c,
		istore_2 = 0x3d,
		istore_3 = 0x3e,
		lstore_0 = 0x3f,
		lstore_1 = 0x40,
		lstore_2 = 0x41,
		lstore_3 = 0x42,
		fstore_0 = 0x43,
		fstore_1 = 0x44,
		fstore_2 = 0x45,
		fstore_3 = 0x46,
		dstore_0 = 0x47,
		dstore_1 = 0x48,
		dstore_2 = 0x49,
		dstore_3 = 0x4a,
		astore_0 = 0x4b,
		astore_1 = 0x4c,
		astore_2 = 0x4d,
		astore_3 = 0x4e,
		/// Store int into array.
		iastore = 0x4f,
		lastore = 0x50,
		fastore = 0x51,
		dastore = 0x52,
		aastore = 0x53,
		bastore = 0x54,
		castore = 0x55,
		sastore = 0x56,
		pop = 0x57,
		pop2 = 0x58,
		dup = 0x59,
		dup_x1 = 0x5a,
		dup_x2 = 0x5b,
		dup2 = 0x5c,
		dup2_x1 = 0x5d,
		dup2_x2 = 0x5e,
		swap = 0x5f,
		iadd = 0x60,
		ladd = 0x61,
		fadd = 0x62,
		dadd = 0x63,
		isub = 0x64,
		lsub = 0x65,
		fsub = 0x66,
		dsub = 0x67,
		imul = 0x68,
		lmul = 0x69,
		fmul = 0x6a,
		dmul = 0x6b,
		idiv = 0x6c,
		ldiv = 0x6d,
		fdiv = 0x6e,
		ddiv = 0x6f,
		irem = 0x70,
		lrem = 0x71,
		frem = 0x72,
		drem = 0x73,
		ineg = 0x74,
		lneg = 0x75,
		fneg = 0x76,
		dneg = 0x77,
		ishl = 0x78,
		lshl = 0x79,
		ishr = 0x7a,
		lshr = 0x7b,
		iushr = 0x7c,
		lushr = 0x7d,
		iand = 0x7e,
		land = 0x7f,
		ior = 0x80,
		lor = 0x81,
		ixor = 0x82,
		lxor = 0x83,
		/// Increment local variable by a signed byte.
		iinc(Increment) = 0x84,
		i2l = 0x85,
		i2f = 0x86,
		i2d = 0x87,
		l2i = 0x88,
		l2f = 0x89,
		l2d = 0x8a,
		f2i = 0x8b,
		f2l = 0x8c,
		f2d = 0x8d,
		d2i = 0x8e,
		d2l = 0x8f,
		d2f = 0x90,
		i2b = 0x91,
		i2c = 0x92,
		i2s = 0x93,
		lcmp = 0x94,
		fcmpl = 0x95,
		fcmpg = 0x96,
		dcmpl = 0x97,
		dcmpg = 0x98,
		/// Branch if int is zero.
		ifeq(i16) = 0x99,
		ifne(i16) = 0x9a,
		iflt(i16) = 0x9b,
		ifge(i16) = 0x9c,
		ifgt(i16) = 0x9d,
		ifle(i16) = 0x9e,
		if_icmpeq(i16) = 0x9f,
		if_icmpne(i16) = 0xa0,
		if_icmplt(i16) = 0xa1,
		if_icmpge(i16) = 0xa2,
		if_icmpgt(i16) = 0xa3,
		if_icmple(i16) = 0xa4,
		if_acmpeq(i16) = 0xa5,
		if_acmpne(i16) = 0xa6,
		/// Unconditional branch.
		goto(i16) = 0xa7,
		/// Jump subroutine (pre-6 class files).
		jsr(i16) = 0xa8,
		/// Return from subroutine (pre-6 class files).
		ret(u8) = 0xa9,
		/// Dense jump table.
		tableswitch(TableSwitch) = 0xaa,
		/// Sparse jump table.
		lookupswitch(LookupSwitch) = 0xab,
		ireturn = 0xac,
		lreturn = 0xad,
		freturn = 0xae,
		dreturn = 0xaf,
		areturn = 0xb0,
		return_ = 0xb1,
		/// Read a static field.
		getstatic(u16) = 0xb2,
		putstatic(u16) = 0xb3,
		getfield(u16) = 0xb4,
		putfield(u16) = 0xb5,
		/// Invoke an instance method with virtual dispatch.
		invokevirtual(u16) = 0xb6,
		/// Invoke a constructor, private method, or super method.
		invokespecial(u16) = 0xb7,
		/// Invoke a static method.
		invokestatic(u16) = 0xb8,
		/// Invoke an interface method.
		invokeinterface(InterfaceInvocation) = 0xb9,
		/// Invoke a dynamically-computed call site.
		invokedynamic(DynamicInvocation) = 0xba,
		/// Allocate an uninitialized instance.
		new_(u16) = 0xbb,
		/// Allocate a primitive array; payload is the array type code.
		newarray(u8) = 0xbc,
		/// Allocate a reference array.
		anewarray(u16) = 0xbd,
		arraylength = 0xbe,
		athrow = 0xbf,
		checkcast(u16) = 0xc0,
		instanceof(u16) = 0xc1,
		monitorenter = 0xc2,
		monitorexit = 0xc3,
		/// Widened form of a load/store/ret/iinc instruction.
		wide(WideForm) = 0xc4,
		/// Allocate a multi-dimensional array.
		multianewarray(MultiArray) = 0xc5,
		ifnull(i16) = 0xc6,
		ifnonnull(i16) = 0xc7,
		/// Unconditional branch, four-byte offset.
		goto_w(i32) = 0xc8,
		jsr_w(i32) = 0xc9,
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Increment {
	pub index: u8,
	pub delta: i8,
}

impl FromByteStream for Increment {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(Self {
			index: u8::read(stream, &())?,
			delta: i8::read(stream, &())?,
		})
	}
}

impl ToByteBuffer for Increment {
	fn write(&self, buffer: &mut Vec<u8>) {
		self.index.write(buffer);
		self.delta.write(buffer);
	}
}

/// `invokeinterface` carries a redundant argument-slot count and a zero pad.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InterfaceInvocation {
	pub method: u16,
	pub count: u8,
}

impl FromByteStream for InterfaceInvocation {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let method = u16::read(stream, &())?;
		let count = u8::read(stream, &())?;
		let _zero = u8::read(stream, &())?;
		Ok(Self { method, count })
	}
}

impl ToByteBuffer for InterfaceInvocation {
	fn write(&self, buffer: &mut Vec<u8>) {
		self.method.write(buffer);
		self.count.write(buffer);
		0u8.write(buffer);
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DynamicInvocation {
	pub call_site: u16,
}

impl FromByteStream for DynamicInvocation {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let call_site = u16::read(stream, &())?;
		let _zero = u16::read(stream, &())?;
		Ok(Self { call_site })
	}
}

impl ToByteBuffer for DynamicInvocation {
	fn write(&self, buffer: &mut Vec<u8>) {
		self.call_site.write(buffer);
		0u16.write(buffer);
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MultiArray {
	pub class: u16,
	pub dimensions: u8,
}

impl FromByteStream for MultiArray {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(Self {
			class: u16::read(stream, &())?,
			dimensions: u8::read(stream, &())?,
		})
	}
}

impl ToByteBuffer for MultiArray {
	fn write(&self, buffer: &mut Vec<u8>) {
		self.class.write(buffer);
		self.dimensions.write(buffer);
	}
}

/// The instruction forms reachable through the `wide` prefix.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WideForm {
	iload(u16),
	lload(u16),
	fload(u16),
	dload(u16),
	aload(u16),
	istore(u16),
	lstore(u16),
	fstore(u16),
	dstore(u16),
	astore(u16),
	ret(u16),
	iinc { index: u16, delta: i16 },
}

impl FromByteStream for WideForm {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let opcode = u8::read(stream, &())?;
		let index = u16::read(stream, &())?;
		Ok(match opcode {
			0x15 => WideForm::iload(index),
			0x16 => WideForm::lload(index),
			0x17 => WideForm::fload(index),
			0x18 => WideForm::dload(index),
			0x19 => WideForm::aload(index),
			0x36 => WideForm::istore(index),
			0x37 => WideForm::lstore(index),
			0x38 => WideForm::fstore(index),
			0x39 => WideForm::dstore(index),
			0x3a => WideForm::astore(index),
			0xa9 => WideForm::ret(index),
			0x84 => WideForm::iinc { index, delta: i16::read(stream, &())? },
			_ => return Err(Error::new(
				ErrorKind::InvalidData,
				format!("Opcode {opcode:#04x} has no wide form"),
			)),
		})
	}
}

impl ToByteBuffer for WideForm {
	fn write(&self, buffer: &mut Vec<u8>) {
		let (opcode, index) = match self {
			WideForm::iload(i) => (0x15, *i),
			WideForm::lload(i) => (0x16, *i),
			WideForm::fload(i) => (0x17, *i),
			WideForm::dload(i) => (0x18, *i),
			WideForm::aload(i) => (0x19, *i),
			WideForm::istore(i) => (0x36, *i),
			WideForm::lstore(i) => (0x37, *i),
			WideForm::fstore(i) => (0x38, *i),
			WideForm::dstore(i) => (0x39, *i),
			WideForm::astore(i) => (0x3a, *i),
			WideForm::ret(i) => (0xa9, *i),
			WideForm::iinc { index, delta } => {
				0x84u8.write(buffer);
				index.write(buffer);
				delta.write(buffer);
				return;
			},
		};
		(opcode as u8).write(buffer);
		index.write(buffer);
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableSwitch {
	pub default: i32,
	pub low: i32,
	pub high: i32,
	pub offsets: Vec<i32>,
}

impl FromByteStream for TableSwitch {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		for _ in 0..switch_padding(stream.position() as usize) {
			let _pad = u8::read(stream, &())?;
		}
		let default = i32::read(stream, &())?;
		let low = i32::read(stream, &())?;
		let high = i32::read(stream, &())?;
		if low > high {
			return Err(Error::new(ErrorKind::InvalidData, "tableswitch bounds out of order"));
		}
		let count = (high as i64 - low as i64 + 1) as usize;
		let mut offsets = Vec::with_capacity(count);
		for _ in 0..count {
			offsets.push(i32::read(stream, &())?);
		}
		Ok(Self { default, low, high, offsets })
	}
}

impl ToByteBuffer for TableSwitch {
	fn write(&self, buffer: &mut Vec<u8>) {
		for _ in 0..switch_padding(buffer.len()) {
			buffer.push(0);
		}
		self.default.write(buffer);
		self.low.write(buffer);
		self.high.write(buffer);
		for offset in &self.offsets {
			offset.write(buffer);
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LookupSwitch {
	pub default: i32,
	pub pairs: Vec<(i32, i32)>,
}

impl FromByteStream for LookupSwitch {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		for _ in 0..switch_padding(stream.position() as usize) {
			let _pad = u8::read(stream, &())?;
		}
		let default = i32::read(stream, &())?;
		let count = i32::read(stream, &())?;
		if count < 0 {
			return Err(Error::new(ErrorKind::InvalidData, "Negative lookupswitch pair count"));
		}
		let mut pairs = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let key = i32::read(stream, &())?;
			let offset = i32::read(stream, &())?;
			pairs.push((key, offset));
		}
		Ok(Self { default, pairs })
	}
}

impl ToByteBuffer for LookupSwitch {
	fn write(&self, buffer: &mut Vec<u8>) {
		for _ in 0..switch_padding(buffer.len()) {
			buffer.push(0);
		}
		self.default.write(buffer);
		(self.pairs.len() as i32).write(buffer);
		for (key, offset) in &self.pairs {
			key.write(buffer);
			offset.write(buffer);
		}
	}
}

impl OpCode {
	/// Constant-pool index of the member an invocation instruction targets.
	pub fn invocation_pool_index(&self) -> Option<u16> {
		match self {
			OpCode::invokevirtual(index)
			| OpCode::invokespecial(index)
			| OpCode::invokestatic(index) => Some(*index),
			OpCode::invokeinterface(invocation) => Some(invocation.method),
			_ => None,
		}
	}

	/// Relative offset of a plain (non-switch) branch.
	pub fn branch_offset(&self) -> Option<i32> {
		match self {
			OpCode::ifeq(o) | OpCode::ifne(o) | OpCode::iflt(o) | OpCode::ifge(o)
			| OpCode::ifgt(o) | OpCode::ifle(o) | OpCode::if_icmpeq(o) | OpCode::if_icmpne(o)
			| OpCode::if_icmplt(o) | OpCode::if_icmpge(o) | OpCode::if_icmpgt(o)
			| OpCode::if_icmple(o) | OpCode::if_acmpeq(o) | OpCode::if_acmpne(o)
			| OpCode::goto(o) | OpCode::jsr(o) | OpCode::ifnull(o) | OpCode::ifnonnull(o) => {
				Some(*o as i32)
			},
			OpCode::goto_w(o) | OpCode::jsr_w(o) => Some(*o),
			_ => None,
		}
	}

	pub fn is_conditional_branch(&self) -> bool {
		matches!(self.opcode(), 0x99..=0xa6 | 0xc6 | 0xc7)
	}

	/// The conditional branch testing the opposite condition.
	pub fn inverted_condition(opcode: u8) -> u8 {
		match opcode {
			// ifeq..if_acmpne pair up as (odd, odd + 1).
			0x99..=0xa6 => match opcode & 1 {
				1 => opcode + 1,
				_ => opcode - 1,
			},
			0xc6 => 0xc7,
			0xc7 => 0xc6,
			_ => unreachable!(),
		}
	}

	/// Encoded size at `offset`, switch padding included.
	pub fn encoded_len(&self, offset: usize) -> usize {
		match self {
			OpCode::tableswitch(table) => {
				1 + switch_padding(offset + 1) + 12 + 4 * table.offsets.len()
			},
			OpCode::lookupswitch(lookup) => {
				1 + switch_padding(offset + 1) + 8 + 8 * lookup.pairs.len()
			},
			OpCode::wide(WideForm::iinc { .. }) => 6,
			OpCode::wide(_) => 4,
			_ => 1 + operand_width(self.opcode()),
		}
	}
}

/// Fixed operand byte counts, switches and `wide` excluded.
const fn operand_width(opcode: u8) -> usize {
	match opcode {
		0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 1,
		0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa8 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
		| 0xc6 | 0xc7 => 2,
		0xc5 => 3,
		0xb9 | 0xba | 0xc8 | 0xc9 => 4,
		_ => 0,
	}
}

/// Iterates `(offset, instruction)` pairs over a code array.
pub struct OpCodeIterator<'l> {
	cursor: Cursor<&'l [u8]>,
}

impl<'l> OpCodeIterator<'l> {
	pub fn new(bytes: &'l [u8]) -> Self {
		Self { cursor: Cursor::new(bytes) }
	}
}

impl Iterator for OpCodeIterator<'_> {
	type Item = (u32, std::io::Result<OpCode>);
	fn next(&mut self) -> Option<Self::Item> {
		let position = self.cursor.position();
		match position == self.cursor.get_ref().len() as u64 {
			true => None,
			false => Some((position as u32, OpCode::read(&mut self.cursor))),
		}
	}
}

pub(crate) fn debug_code(bytes: &[u8], fmt: &mut Formatter) -> std::fmt::Result {
	let mut dbg = fmt.debug_list();
	for (offset, opcode) in OpCodeIterator::new(bytes) {
		match opcode {
			Ok(opcode) => dbg.entry(&format_args!("{offset}\t{opcode:?}")),
			Err(_) => dbg.entry(&format_args!("{offset}\t<undefined>")),
		};
	}
	dbg.finish()
}

/// Where a spliced branch lands: an original instruction slot, kept stable
/// across edits, or the end of the code array.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Target {
	Slot(usize),
	End,
}

/// One instruction of the editable stream plus its optional branch targets.
#[derive(Debug, Clone)]
struct Emitted {
	op: OpCode,
	/// For plain branches: the single target. For switches: default first,
	/// then each case in payload order.
	targets: Vec<Target>,
}

struct Slot {
	original_offset: u32,
	insns: Vec<Emitted>,
}

/// A decoded method body with resolved branch targets, supporting
/// single-instruction splices and re-encoding with branch re-flow.
pub struct CodeStream {
	slots: Vec<Slot>,
	original_len: u32,
	prologue: Vec<Emitted>,
}

impl CodeStream {
	pub fn decode(code: &[u8]) -> std::io::Result<Self> {
		let mut slots = vec![];
		let mut index_of_offset: IntMap<u32, usize> = IntMap::default();

		for (offset, op) in OpCodeIterator::new(code) {
			index_of_offset.insert(offset, slots.len());
			slots.push(Slot {
				original_offset: offset,
				insns: vec![Emitted { op: op?, targets: vec![] }],
			});
		}

		let original_len = code.len() as u32;
		let resolve = |offset: i64| -> std::io::Result<Target> {
			if offset == original_len as i64 {
				return Ok(Target::End);
			}
			let offset = u32::try_from(offset)
				.ok()
				.filter(|o| *o < original_len)
				.ok_or_else(|| Error::new(ErrorKind::InvalidData, "Branch target out of bounds"))?;
			match index_of_offset.get(&offset) {
				Some(slot) => Ok(Target::Slot(*slot)),
				None => Err(Error::new(ErrorKind::InvalidData, "Branch into the middle of an instruction")),
			}
		};

		for slot in &mut slots {
			let base = slot.original_offset as i64;
			let emitted = &mut slot.insns[0];
			match &emitted.op {
				OpCode::tableswitch(table) => {
					emitted.targets.push(resolve(base + table.default as i64)?);
					for offset in &table.offsets {
						emitted.targets.push(resolve(base + *offset as i64)?);
					}
				},
				OpCode::lookupswitch(lookup) => {
					emitted.targets.push(resolve(base + lookup.default as i64)?);
					for (_, offset) in &lookup.pairs {
						emitted.targets.push(resolve(base + *offset as i64)?);
					}
				},
				op => {
					if let Some(offset) = op.branch_offset() {
						emitted.targets.push(resolve(base + offset as i64)?);
					}
				},
			}
		}

		Ok(Self { slots, original_len, prologue: vec![] })
	}

	#[inline]
	pub fn slot_count(&self) -> usize {
		self.slots.len()
	}

	/// The original instruction occupying `slot` (pre-edit view).
	pub fn instruction(&self, slot: usize) -> &OpCode {
		&self.slots[slot].insns[0].op
	}

	pub fn original_offset(&self, slot: usize) -> u32 {
		self.slots[slot].original_offset
	}

	/// Replaces a slot's instruction with a branch-free sequence.
	pub fn replace(&mut self, slot: usize, insns: Vec<OpCode>) {
		self.slots[slot].insns = insns
			.into_iter()
			.map(|op| Emitted { op, targets: vec![] })
			.collect();
	}

	/// Replaces a slot with a sequence that may branch to other slots.
	pub fn replace_with_targets(&mut self, slot: usize, insns: Vec<(OpCode, Vec<Target>)>) {
		self.slots[slot].insns = insns
			.into_iter()
			.map(|(op, targets)| Emitted { op, targets })
			.collect();
	}

	/// Prepends instructions ahead of the first original instruction.
	/// Existing branches to offset 0 still reach the original entry.
	pub fn prepend(&mut self, insns: Vec<(OpCode, Vec<Target>)>) {
		let mapped: Vec<Emitted> = insns
			.into_iter()
			.map(|(op, targets)| Emitted { op, targets })
			.collect();
		self.prologue.splice(0..0, mapped);
	}

	/// Decodes pre-encoded instructions and prepends them. Branches inside
	/// the block keep their stored offsets, so they must only target the
	/// block itself or its end (the original entry).
	pub fn prepend_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
		let mut ops = vec![];
		for (_, op) in OpCodeIterator::new(bytes) {
			ops.push((op?, vec![]));
		}
		self.prepend(ops);
		Ok(())
	}

	fn emit_order(&self) -> impl Iterator<Item = (Option<usize>, &Emitted)> {
		self.prologue
			.iter()
			.map(|emitted| (None, emitted))
			.chain(self.slots.iter().enumerate().flat_map(|(index, slot)| {
				slot.insns.iter().map(move |emitted| (Some(index), emitted))
			}))
	}

	/// Encodes the stream, recomputing branch offsets and promoting
	/// out-of-range short branches. Returns the code bytes and the new
	/// offset of each original slot.
	pub fn encode(&self) -> std::io::Result<EncodedCode> {
		// Emission units, with promotion state tracked per unit.
		struct Unit {
			slot: Option<usize>,
			op: OpCode,
			targets: Vec<Target>,
			promoted: bool,
		}

		let mut units: Vec<Unit> = self
			.emit_order()
			.map(|(slot, emitted)| Unit {
				slot,
				op: emitted.op.clone(),
				targets: emitted.targets.clone(),
				promoted: false,
			})
			.collect();

		// Iterate until no further branch needs widening. Offsets are
		// computed with promoted sizes; a short branch whose span no longer
		// fits i16 is promoted and the layout recomputed.
		let mut unit_offsets = vec![0u32; units.len()];
		let mut slot_offsets = vec![0u32; self.slots.len()];
		let mut code_len;

		loop {
			let mut offset = 0usize;
			for (index, unit) in units.iter().enumerate() {
				unit_offsets[index] = offset as u32;
				let mut len = unit.op.encoded_len(offset);
				if unit.promoted {
					len += match unit.op.is_conditional_branch() {
						// Inverted short branch over a goto_w.
						true => 5,
						// goto/jsr widened in place.
						false => 2,
					};
				}
				offset += len;
			}
			code_len = offset;

			// Slot offsets: the first emitted unit at-or-after each slot.
			{
				let mut next = code_len as u32;
				let mut unit_index = units.len();
				for slot in (0..self.slots.len()).rev() {
					while unit_index > 0 && units[unit_index - 1].slot == Some(slot) {
						unit_index -= 1;
						next = unit_offsets[unit_index];
					}
					slot_offsets[slot] = next;
				}
			}

			let target_offset = |target: Target| -> u32 {
				match target {
					Target::Slot(slot) => slot_offsets[slot],
					Target::End => code_len as u32,
				}
			};

			let mut widened = false;
			for (index, unit) in units.iter_mut().enumerate() {
				// Branches without resolved targets are internal to a spliced
				// sequence; their stored offsets are already correct.
				if unit.promoted || unit.op.branch_offset().is_none() || unit.targets.is_empty() {
					continue;
				}
				if matches!(unit.op, OpCode::goto_w(_) | OpCode::jsr_w(_)) {
					continue;
				}
				let relative = target_offset(unit.targets[0]) as i64 - unit_offsets[index] as i64;
				if i16::try_from(relative).is_err() {
					unit.promoted = true;
					widened = true;
				}
			}

			if !widened {
				break;
			}
		}

		if code_len > u16::MAX as usize {
			return Err(Error::new(ErrorKind::InvalidData, "Method is too large"));
		}

		let target_offset = |target: Target| -> u32 {
			match target {
				Target::Slot(slot) => slot_offsets[slot],
				Target::End => code_len as u32,
			}
		};

		let mut bytes = Vec::with_capacity(code_len);
		for (index, unit) in units.iter().enumerate() {
			let offset = unit_offsets[index] as i64;
			debug_assert_eq!(offset as usize, bytes.len());

			match &unit.op {
				OpCode::tableswitch(table) => {
					let mut table = table.clone();
					table.default = (target_offset(unit.targets[0]) as i64 - offset) as i32;
					for (case, target) in table.offsets.iter_mut().zip(&unit.targets[1..]) {
						*case = (target_offset(*target) as i64 - offset) as i32;
					}
					OpCode::tableswitch(table).write(&mut bytes);
				},
				OpCode::lookupswitch(lookup) => {
					let mut lookup = lookup.clone();
					lookup.default = (target_offset(unit.targets[0]) as i64 - offset) as i32;
					for ((_, case), target) in lookup.pairs.iter_mut().zip(&unit.targets[1..]) {
						*case = (target_offset(*target) as i64 - offset) as i32;
					}
					OpCode::lookupswitch(lookup).write(&mut bytes);
				},
				op if op.branch_offset().is_some() && !unit.targets.is_empty() => {
					let relative = target_offset(unit.targets[0]) as i64 - offset;
					let opcode = op.opcode();
					match (unit.promoted, op.is_conditional_branch()) {
						(false, _) => {
							match op {
								OpCode::goto_w(_) => OpCode::goto_w(relative as i32).write(&mut bytes),
								OpCode::jsr_w(_) => OpCode::jsr_w(relative as i32).write(&mut bytes),
								_ => {
									bytes.push(opcode);
									(relative as i16).write(&mut bytes);
								},
							}
						},
						(true, false) => {
							// goto/jsr widened in place.
							let wide_opcode = match opcode {
								0xa7 => 0xc8,
								0xa8 => 0xc9,
								_ => unreachable!(),
							};
							bytes.push(wide_opcode);
							(relative as i32).write(&mut bytes);
						},
						(true, true) => {
							// if<cond> L  =>  if<!cond> +8; goto_w L
							bytes.push(OpCode::inverted_condition(opcode));
							8i16.write(&mut bytes);
							OpCode::goto_w((relative - 3) as i32).write(&mut bytes);
						},
					}
				},
				op => op.write(&mut bytes),
			}
		}

		debug_assert_eq!(bytes.len(), code_len);

		Ok(EncodedCode {
			bytes,
			slot_offsets: slot_offsets.clone(),
			original_len: self.original_len,
			original_offsets: self.slots.iter().map(|s| s.original_offset).collect(),
		})
	}
}

/// Encoded code plus the old-offset to new-offset mapping the frame and
/// exception-table rewrites consume.
pub struct EncodedCode {
	pub bytes: Vec<u8>,
	slot_offsets: Vec<u32>,
	original_offsets: Vec<u32>,
	original_len: u32,
}

impl EncodedCode {
	/// Maps an original bytecode offset into the rewritten array. Offsets one
	/// past the end (exclusive handler bounds) map to the new length.
	pub fn map_offset(&self, old_offset: u32) -> std::io::Result<u32> {
		if old_offset == self.original_len {
			return Ok(self.bytes.len() as u32);
		}
		match self.original_offsets.binary_search(&old_offset) {
			Ok(slot) => Ok(self.slot_offsets[slot]),
			Err(_) => Err(Error::new(
				ErrorKind::InvalidData,
				format!("Offset {old_offset} is not an instruction boundary"),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn round_trip(code: &[u8]) -> Vec<u8> {
		let stream = CodeStream::decode(code).unwrap();
		stream.encode().unwrap().bytes
	}

	#[test]
	fn decodes_simple_sequences() {
		// iconst_1; istore_0; iload_0; ireturn
		let code = [0x04, 0x3b, 0x1a, 0xac];
		let stream = CodeStream::decode(&code).unwrap();
		assert_eq!(stream.slot_count(), 4);
		assert_eq!(*stream.instruction(0), OpCode::iconst_1);
		assert_eq!(*stream.instruction(3), OpCode::ireturn);
	}

	#[test]
	fn rejects_undefined_opcodes() {
		assert!(CodeStream::decode(&[0xcb]).is_err());
		assert!(CodeStream::decode(&[0xff]).is_err());
	}

	#[test]
	fn round_trips_branches() {
		// iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
		let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
		assert_eq!(round_trip(&code), code);
	}

	#[test]
	fn round_trips_tableswitch() {
		// iload_0; tableswitch{pad 2} default=+27 low=0 high=1 [+23, +25]
		let mut code = vec![0x1a, 0xaa, 0, 0];
		for value in [27i32, 0, 1, 23, 25] {
			code.extend_from_slice(&value.to_be_bytes());
		}
		// iconst_1; ireturn; iconst_0; ireturn; return at 24..28
		code.extend_from_slice(&[0x04, 0xac, 0x03, 0xac, 0xb1]);
		assert_eq!(round_trip(&code), code);
	}

	#[test]
	fn splice_grows_and_reflows_branch() {
		// goto +4; nop; return  (goto jumps over the nop to return)
		let code = [0xa7, 0x00, 0x04, 0x00, 0xb1];
		let mut stream = CodeStream::decode(&code).unwrap();
		// Replace the nop with three nops; the goto must now skip all three.
		stream.replace(1, vec![OpCode::nop, OpCode::nop, OpCode::nop]);
		let encoded = stream.encode().unwrap();
		assert_eq!(encoded.bytes, [0xa7, 0x00, 0x06, 0x00, 0x00, 0x00, 0xb1]);
		assert_eq!(encoded.map_offset(4).unwrap(), 6);
	}

	#[test]
	fn prologue_shifts_offsets_without_retargeting_entry_branches() {
		// goto 0, a self loop at the method entry
		let code = [0xa7, 0x00, 0x00];
		let mut stream = CodeStream::decode(&code).unwrap();
		stream.prepend(vec![(OpCode::nop, vec![])]);
		let encoded = stream.encode().unwrap();
		// The loop branch still targets the original entry, now at offset 1.
		assert_eq!(encoded.bytes, [0x00, 0xa7, 0x00, 0x00]);
		assert_eq!(encoded.map_offset(0).unwrap(), 1);
	}

	#[test]
	fn switch_padding_is_recomputed_after_shift() {
		// nop; tableswitch{pad 2} default=+19 low=0 high=0 [+19]; return
		let mut code = vec![0x00, 0xaa, 0, 0];
		for value in [19i32, 0, 0, 19] {
			code.extend_from_slice(&value.to_be_bytes());
		}
		code.push(0xb1);
		let mut stream = CodeStream::decode(&code).unwrap();
		// Replace the leading nop with two nops; padding shrinks by one.
		stream.replace(0, vec![OpCode::nop, OpCode::nop]);
		let encoded = stream.encode().unwrap();

		let reparsed = CodeStream::decode(&encoded.bytes).unwrap();
		let OpCode::tableswitch(table) = reparsed.instruction(1) else {
			panic!("expected tableswitch");
		};
		let switch_offset = reparsed.original_offset(1) as i32;
		let return_offset = encoded.bytes.len() as i32 - 1;
		assert_eq!(switch_offset + table.default, return_offset);
		assert_eq!(switch_offset + table.offsets[0], return_offset);
	}

	#[test]
	fn wide_forms_round_trip() {
		// wide iload 300; wide iinc 300 by -2; return
		let code = [0xc4, 0x15, 0x01, 0x2c, 0xc4, 0x84, 0x01, 0x2c, 0xff, 0xfe, 0xb1];
		assert_eq!(round_trip(&code), code);
	}
}
