//! String formatting utilities.

/// Truncates an identifier for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("short"), "short");
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(
			truncate_id("6f1c2b9e-8a4d-4c3e-9b1a-2f0e5d7c8a91"),
			"6f1c2b9e.."
		);
	}
}
