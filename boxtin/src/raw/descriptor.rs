use std::fmt::{Debug, Display, Formatter};
use std::io::{Error, ErrorKind};

/// A field or parameter type parsed out of a descriptor string.
///
/// Object types carry the internal (slash-separated) class name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum JavaType {
	Byte,
	Char,
	Short,
	Boolean,
	Int,
	Long,
	Float,
	Double,
	Object(Box<str>),
	Array { dimensions: u8, element: Box<JavaType> },
}

impl JavaType {
	/// Operand-stack and local-slot width: 2 for `long`/`double`, 1 otherwise.
	#[inline]
	pub fn width(&self) -> u16 {
		match self {
			JavaType::Long | JavaType::Double => 2,
			_ => 1,
		}
	}

	#[inline]
	pub fn is_primitive(&self) -> bool {
		!matches!(self, JavaType::Object(_) | JavaType::Array { .. })
	}

	/// The boxed counterpart of a primitive, if any.
	pub fn box_type(&self) -> Option<&'static str> {
		Some(match self {
			JavaType::Byte => "java/lang/Byte",
			JavaType::Char => "java/lang/Character",
			JavaType::Short => "java/lang/Short",
			JavaType::Boolean => "java/lang/Boolean",
			JavaType::Int => "java/lang/Integer",
			JavaType::Long => "java/lang/Long",
			JavaType::Float => "java/lang/Float",
			JavaType::Double => "java/lang/Double",
			_ => return None,
		})
	}

	fn parse(chars: &mut std::str::Chars) -> std::io::Result<Self> {
		let malformed = || Error::new(ErrorKind::InvalidData, "Malformed descriptor");
		Ok(match chars.next().ok_or_else(malformed)? {
			'B' => JavaType::Byte,
			'C' => JavaType::Char,
			'S' => JavaType::Short,
			'Z' => JavaType::Boolean,
			'I' => JavaType::Int,
			'J' => JavaType::Long,
			'F' => JavaType::Float,
			'D' => JavaType::Double,
			'L' => {
				let name: String = chars.take_while(|c| *c != ';').collect();
				if name.is_empty() {
					return Err(malformed());
				}
				JavaType::Object(name.into_boxed_str())
			},
			'[' => {
				let mut dimensions = 1u8;
				let mut rest = chars.clone();
				while rest.clone().next() == Some('[') {
					rest.next();
					dimensions = dimensions.checked_add(1).ok_or_else(malformed)?;
				}
				*chars = rest;
				let element = JavaType::parse(chars)?;
				if matches!(element, JavaType::Array { .. }) {
					return Err(malformed());
				}
				JavaType::Array { dimensions, element: Box::new(element) }
			},
			_ => return Err(malformed()),
		})
	}
}

impl Display for JavaType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			JavaType::Byte => f.write_str("B"),
			JavaType::Char => f.write_str("C"),
			JavaType::Short => f.write_str("S"),
			JavaType::Boolean => f.write_str("Z"),
			JavaType::Int => f.write_str("I"),
			JavaType::Long => f.write_str("J"),
			JavaType::Float => f.write_str("F"),
			JavaType::Double => f.write_str("D"),
			JavaType::Object(name) => write!(f, "L{name};"),
			JavaType::Array { dimensions, element } => {
				for _ in 0..*dimensions {
					f.write_str("[")?;
				}
				Display::fmt(element, f)
			},
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ReturnType {
	Void,
	Value(JavaType),
}

impl ReturnType {
	#[inline]
	pub fn width(&self) -> u16 {
		match self {
			ReturnType::Void => 0,
			ReturnType::Value(ty) => ty.width(),
		}
	}

	pub fn as_value(&self) -> Option<&JavaType> {
		match self {
			ReturnType::Void => None,
			ReturnType::Value(ty) => Some(ty),
		}
	}
}

impl Display for ReturnType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			ReturnType::Void => f.write_str("V"),
			ReturnType::Value(ty) => Display::fmt(ty, f),
		}
	}
}

/// A parsed `(params)return` method descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct MethodDescriptor {
	pub parameters: Vec<JavaType>,
	pub return_type: ReturnType,
}

impl MethodDescriptor {
	pub fn parse(descriptor: &str) -> std::io::Result<Self> {
		let malformed = || Error::new(ErrorKind::InvalidData, "Malformed method descriptor");

		let mut chars = descriptor.chars();
		if chars.next() != Some('(') {
			return Err(malformed());
		}

		let mut parameters = vec![];
		loop {
			let mut lookahead = chars.clone();
			match lookahead.next() {
				Some(')') => {
					chars = lookahead;
					break;
				},
				Some(_) => parameters.push(JavaType::parse(&mut chars)?),
				None => return Err(malformed()),
			}
		}

		let return_type = match chars.clone().next() {
			Some('V') => {
				chars.next();
				ReturnType::Void
			},
			Some(_) => ReturnType::Value(JavaType::parse(&mut chars)?),
			None => return Err(malformed()),
		};

		if chars.next().is_some() {
			return Err(malformed());
		}

		Ok(Self { parameters, return_type })
	}

	/// Local-variable slots consumed by the parameters alone (no receiver).
	pub fn argument_slots(&self) -> u16 {
		self.parameters.iter().map(JavaType::width).sum()
	}
}

impl Display for MethodDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("(")?;
		for parameter in &self.parameters {
			Display::fmt(parameter, f)?;
		}
		f.write_str(")")?;
		Display::fmt(&self.return_type, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_primitives_and_objects() {
		let desc = MethodDescriptor::parse("(ILjava/lang/String;J)V").unwrap();
		assert_eq!(desc.parameters.len(), 3);
		assert_eq!(desc.parameters[0], JavaType::Int);
		assert_eq!(desc.parameters[1], JavaType::Object("java/lang/String".into()));
		assert_eq!(desc.parameters[2], JavaType::Long);
		assert_eq!(desc.return_type, ReturnType::Void);
		assert_eq!(desc.argument_slots(), 4);
	}

	#[test]
	fn parses_arrays() {
		let desc = MethodDescriptor::parse("([[I[Ljava/lang/Object;)[B").unwrap();
		assert_eq!(
			desc.parameters[0],
			JavaType::Array { dimensions: 2, element: Box::new(JavaType::Int) }
		);
		assert_eq!(
			desc.parameters[1],
			JavaType::Array {
				dimensions: 1,
				element: Box::new(JavaType::Object("java/lang/Object".into())),
			}
		);
		assert_eq!(desc.to_string(), "([[I[Ljava/lang/Object;)[B");
	}

	#[test]
	fn display_round_trips() {
		for descriptor in ["()V", "(DJ)Ljava/util/List;", "(Ljava/lang/String;)I", "()[[Ljava/lang/String;"] {
			let parsed = MethodDescriptor::parse(descriptor).unwrap();
			assert_eq!(parsed.to_string(), *descriptor);
		}
	}

	#[test]
	fn rejects_malformed() {
		for descriptor in ["", "()", "(V)V", "I)V", "(I", "(Q)V", "(I)VV", "(L;)V"] {
			assert!(MethodDescriptor::parse(descriptor).is_err(), "{descriptor}");
		}
	}
}
