//! C ABI for the host instrumentation shim. The JVMTI side owns agent
//! startup and class definition; this surface only carries the lifecycle
//! calls and the transform hook across the boundary.

use std::sync::OnceLock;

use crate::agent::Agent;

pub mod containers;

use containers::{BoxSlice, Slice};

fn agent() -> &'static Agent {
	static AGENT: OnceLock<Agent> = OnceLock::new();
	AGENT.get_or_init(Agent::new)
}

pub const BOXTIN_OK: i32 = 0;
pub const BOXTIN_ERR_STATE: i32 = -1;
pub const BOXTIN_ERR_ARGUMENT: i32 = -2;
pub const BOXTIN_ERR_ENCODING: i32 = -3;

/// One transform outcome. `class_bytes` is empty when the class loads
/// unchanged; `helper_bytes` is empty when no helper class is needed.
#[repr(C)]
pub struct TransformResult {
	pub class_bytes: BoxSlice<u8>,
	pub helper_name: BoxSlice<u8>,
	pub helper_bytes: BoxSlice<u8>,
}

fn utf8(slice: Slice<u8>) -> Result<&str, i32> {
	std::str::from_utf8(slice.as_ref()).map_err(|_| BOXTIN_ERR_ENCODING)
}

/// `premain(args)`: arms the agent with the named controller.
#[no_mangle]
pub extern "C" fn boxtin_premain(args: Slice<u8>) -> i32 {
	let Ok(args) = utf8(args) else {
		return BOXTIN_ERR_ENCODING;
	};
	match agent().premain(args) {
		Ok(()) => BOXTIN_OK,
		Err(crate::agent::AgentError::IllegalArgument(_)) => BOXTIN_ERR_ARGUMENT,
		Err(_) => BOXTIN_ERR_STATE,
	}
}

/// First activation registers the transform hook; later calls fail.
#[no_mangle]
pub extern "C" fn boxtin_activate() -> i32 {
	match agent().activate() {
		Ok(()) => BOXTIN_OK,
		Err(_) => BOXTIN_ERR_STATE,
	}
}

/// Test hook: tears the agent down.
#[no_mangle]
pub extern "C" fn boxtin_retire() {
	agent().retire_for_tests();
}

/// The transform hook. Returns null when the class loads unchanged;
/// otherwise the result must be released with
/// [`boxtin_transform_result_free`].
#[no_mangle]
pub extern "C" fn boxtin_transform(
	module: Slice<u8>,
	internal_name: Slice<u8>,
	class_bytes: Slice<u8>,
) -> *mut TransformResult {
	let (Ok(module), Ok(internal_name)) = (utf8(module), utf8(internal_name)) else {
		return std::ptr::null_mut();
	};
	let Some(output) = agent().transform(module, internal_name, class_bytes.as_ref()) else {
		return std::ptr::null_mut();
	};

	let mut helper_name = BoxSlice::empty();
	let mut helper_bytes = BoxSlice::empty();
	if let Some(helper) = output.helpers.into_iter().next() {
		helper_name = BoxSlice::from(helper.internal_name.as_bytes().to_vec());
		helper_bytes = BoxSlice::from(helper.bytes);
	}

	Box::into_raw(Box::new(TransformResult {
		class_bytes: BoxSlice::from(output.class_bytes),
		helper_name,
		helper_bytes,
	}))
}

#[no_mangle]
pub extern "C" fn boxtin_transform_result_free(result: *mut TransformResult) {
	if !result.is_null() {
		unsafe { drop(Box::from_raw(result)) }
	}
}
