/// Extension trait for a convenience method which transmutes a slice to a slice of another type
/// while ensuring correct alignment and size.
pub trait ExactAlign {
	/// SAFETY: See the documentation for `slice::align_to`
	unsafe fn exact_align_to<'a, Target>(&'a self) -> &'a [Target];
}

impl<T> ExactAlign for [T] {
	unsafe fn exact_align_to<'a, Target>(&'a self) -> &'a [Target] {
		let (before, target, after) = self.align_to::<Target>();
		assert!(before.is_empty());
		assert!(after.is_empty());
		target
	}
}

/// Reinterprets a `u32` slice as a byte slice for a single bulk `write_all`.
/// Unlike `exact_align_to`, going from a wider type down to `u8` can never
/// fail alignment, so this is a plain safe-looking cast wrapped in one
/// `unsafe` block rather than a trait method.
pub fn u32_slice_as_bytes(slice: &[u32]) -> &[u8] {
	// SAFETY: u8 has no alignment requirement and half the size of u32, so
	// the resulting slice always stays within the original allocation.
	unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
}
