use std::io::{Cursor, Error, ErrorKind, Read};
use std::mem::size_of;

/// Types that can be decoded from a class-file byte stream.
///
/// `Deps` carries whatever side information a structure needs to size itself,
/// most commonly the constant pool.
pub trait FromByteStream where Self: Sized {
	type Deps;
	fn read(stream: &mut Cursor<&[u8]>, deps: &Self::Deps) -> std::io::Result<Self>;
}

macro_rules! impl_from_be_byte_stream {
	($($ty: ty),*) => {$(
		impl crate::utilities::FromByteStream for $ty {
			type Deps = ();
			#[inline]
			fn read(stream: &mut std::io::Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
				let bytes = <[u8; size_of::<Self>()]>::read(stream, &())?;
				Ok(Self::from_be_bytes(bytes))
			}
		}
	)*};
}

impl FromByteStream for u8 {
	type Deps = ();
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let mut byte = 0u8;
		stream.read_exact(std::slice::from_mut(&mut byte))?;
		Ok(byte)
	}
}

impl FromByteStream for i8 {
	type Deps = ();
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(u8::read(stream, &())? as i8)
	}
}

impl_from_be_byte_stream!(u16, u32, u64, i16, i32, i64, f32, f64);

impl<const SIZE: usize> FromByteStream for [u8; SIZE] {
	type Deps = ();
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let mut bytes = [0u8; SIZE];
		stream.read_exact(&mut bytes)?;
		Ok(bytes)
	}
}

/// Borrows `count` bytes out of the underlying buffer without copying.
#[inline]
pub(crate) fn read_bytes_slice_from_stream<'l>(stream: &mut Cursor<&'l [u8]>, count: usize) -> std::io::Result<&'l [u8]> {
	let start = stream.position() as usize;
	let end = match start.checked_add(count) {
		Some(end) if end <= stream.get_ref().len() => end,
		_ => return Err(Error::from(ErrorKind::UnexpectedEof)),
	};
	stream.set_position(end as u64);
	Ok(&stream.get_ref()[start..end])
}

/// Big-endian writer mirroring [`FromByteStream`]; emission never fails.
pub trait ToByteBuffer {
	fn write(&self, buffer: &mut Vec<u8>);
}

macro_rules! impl_to_be_byte_buffer {
	($($ty: ty),*) => {$(
		impl crate::utilities::ToByteBuffer for $ty {
			#[inline]
			fn write(&self, buffer: &mut Vec<u8>) {
				buffer.extend_from_slice(&self.to_be_bytes());
			}
		}
	)*};
}

impl_to_be_byte_buffer!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Number of alignment padding bytes between a switch opcode and its 4-byte
/// aligned operands, given the offset just past the opcode byte.
#[inline]
pub(crate) const fn switch_padding(operand_start: usize) -> usize {
	(4 - (operand_start & 3)) & 3
}
