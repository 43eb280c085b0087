use std::io::ErrorKind;

use thiserror::Error;

pub mod attributes;
pub mod builder;
pub mod bytecode;
pub mod class_file;
pub mod constant_pool;
pub mod descriptor;

pub use crate::utilities::FromByteStream;

/// Parse and emission failures.
///
/// `ignorable` errors mean the input is not a class file this rewriter can
/// or should touch, and the host leaves the class unchanged. Everything else
/// is a hard error: the host replaces the class with the empty-class form.
#[derive(Debug, Error)]
pub enum ClassFormatError {
	#[error("Bad class file magic")]
	BadMagic,
	#[error("Truncated class file")]
	Truncated,
	#[error("Unsupported major version {0}")]
	UnsupportedVersion(u16),
	#[error("Method is too large: {name}{descriptor}")]
	MethodTooLarge { name: String, descriptor: String },
	#[error("Malformed class file: {0}")]
	Malformed(String),
}

impl ClassFormatError {
	pub fn ignorable(&self) -> bool {
		matches!(self, ClassFormatError::BadMagic | ClassFormatError::Truncated)
	}
}

impl From<std::io::Error> for ClassFormatError {
	fn from(value: std::io::Error) -> Self {
		match value.kind() {
			ErrorKind::UnexpectedEof => ClassFormatError::Truncated,
			_ => ClassFormatError::Malformed(value.to_string()),
		}
	}
}
