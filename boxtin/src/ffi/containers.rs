use std::marker::PhantomData;
use std::ops::Deref;

/// Borrowed byte view handed in from the host. The host keeps the memory
/// alive for the duration of the call.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Slice<'l, T> {
	data: *const T,
	len: usize,
	ph: PhantomData<&'l T>,
}

impl<'l, T> Slice<'l, T> {
	pub fn as_ref(&self) -> &'l [T] {
		match self.len {
			0 => &[],
			_ => unsafe { std::slice::from_raw_parts(self.data, self.len) },
		}
	}
}

impl<'l, T> From<&'l [T]> for Slice<'l, T> {
	fn from(value: &'l [T]) -> Self {
		Self {
			data: value.as_ptr(),
			len: value.len(),
			ph: PhantomData,
		}
	}
}

/// Owned buffer crossing the boundary outward; dropped with its container.
#[repr(C)]
pub struct BoxSlice<T> {
	data: *mut T,
	len: usize,
}

impl<T> BoxSlice<T> {
	pub fn empty() -> Self {
		Self { data: std::ptr::NonNull::dangling().as_ptr(), len: 0 }
	}
}

impl<T> Deref for BoxSlice<T> {
	type Target = [T];
	fn deref(&self) -> &Self::Target {
		match self.len {
			0 => &[],
			_ => unsafe { std::slice::from_raw_parts(self.data, self.len) },
		}
	}
}

impl<T> From<Vec<T>> for BoxSlice<T> {
	fn from(value: Vec<T>) -> Self {
		let value = value.into_boxed_slice();
		Self {
			len: value.len(),
			data: std::boxed::Box::leak(value).as_mut_ptr(),
		}
	}
}

impl<T> Drop for BoxSlice<T> {
	fn drop(&mut self) {
		if self.len != 0 {
			unsafe {
				drop(std::boxed::Box::from_raw(std::slice::from_raw_parts_mut(self.data, self.len)))
			}
		}
	}
}
