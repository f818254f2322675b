//! Identifier generation for trace/span/request ids.
//!
//! A single helper so every component mints ids the same way rather than
//! each reaching for `uuid` with slightly different settings.

/// Generates a new random id, suitable for `traceId`, `spanId` and
/// internally generated request ids.
pub fn new_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_unique() {
		let a = new_id();
		let b = new_id();
		assert_ne!(a, b);
	}
}
