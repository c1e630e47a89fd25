// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dedup hash over the identifying fields of an event.
//!
//! This is a 32-bit string hash, not a content address. Collisions drop an
//! event within one dedup window and nothing else.

use super::Event;

/// Hashes `(event_name, unified_user_id, timestamp, custom_data)`.
///
/// `custom_data` is a sorted map, so its JSON form and therefore the hash are
/// independent of insertion order.
#[must_use]
pub fn compute_event_hash(event: &Event) -> String {
	let custom_data = serde_json::to_string(&event.custom_data).unwrap_or_default();
	let input = format!(
		"{}_{}_{}_{}",
		event.event_name,
		event.unified_user_id().unwrap_or_default(),
		event.timestamp,
		custom_data
	);
	format!("hash_{}", to_base36(string_hash(&input).unsigned_abs()))
}

/// `h = h * 31 + c` over UTF-16 code units with 32-bit wrapping.
fn string_hash(input: &str) -> i32 {
	input.encode_utf16().fold(0_i32, |hash, unit| {
		hash.wrapping_shl(5)
			.wrapping_sub(hash)
			.wrapping_add(i32::from(unit))
	})
}

fn to_base36(mut n: u32) -> String {
	const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
	if n == 0 {
		return "0".to_string();
	}
	let mut out = Vec::new();
	while n > 0 {
		out.push(DIGITS[(n % 36) as usize]);
		n /= 36;
	}
	out.reverse();
	String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	fn event(name: &str, uid: &str, ts: i64, custom: serde_json::Value) -> Event {
		serde_json::from_value(json!({
			"event_name": name,
			"timestamp": ts,
			"platform": "website",
			"user_data": { "unified_user_id": uid },
			"custom_data": custom,
		}))
		.unwrap()
	}

	#[test]
	fn known_values() {
		assert_eq!(string_hash(""), 0);
		assert_eq!(string_hash("a"), 97);
		assert_eq!(string_hash("ab"), 97 * 31 + 98);
		assert_eq!(to_base36(0), "0");
		assert_eq!(to_base36(35), "z");
		assert_eq!(to_base36(36), "10");
	}

	#[test]
	fn key_order_does_not_matter() {
		let a = event("quiz_completed", "uid_1", 10, json!({ "a": 1, "b": 2 }));
		let b = event("quiz_completed", "uid_1", 10, json!({ "b": 2, "a": 1 }));
		assert_eq!(compute_event_hash(&a), compute_event_hash(&b));
	}

	#[test]
	fn any_identifying_field_changes_hash() {
		let base = event("quiz_completed", "uid_1", 10, json!({ "score": 1 }));
		let hash = compute_event_hash(&base);
		assert_ne!(
			hash,
			compute_event_hash(&event("quiz_started", "uid_1", 10, json!({ "score": 1 })))
		);
		assert_ne!(
			hash,
			compute_event_hash(&event("quiz_completed", "uid_2", 10, json!({ "score": 1 })))
		);
		assert_ne!(
			hash,
			compute_event_hash(&event("quiz_completed", "uid_1", 11, json!({ "score": 1 })))
		);
		assert_ne!(
			hash,
			compute_event_hash(&event("quiz_completed", "uid_1", 10, json!({ "score": 2 })))
		);
	}

	#[test]
	fn event_id_is_not_part_of_hash() {
		let mut a = event("page_view", "uid_1", 10, json!({}));
		let mut b = a.clone();
		a.event_id = "evt_a".into();
		b.event_id = "evt_b".into();
		assert_eq!(compute_event_hash(&a), compute_event_hash(&b));
	}

	proptest! {
		#[test]
		fn hash_is_deterministic(name in "[a-z_]{1,20}", uid in "[a-z0-9_]{1,20}", ts: i64) {
			let a = event(&name, &uid, ts, json!({}));
			prop_assert_eq!(compute_event_hash(&a), compute_event_hash(&a.clone()));
			prop_assert!(compute_event_hash(&a).starts_with("hash_"));
		}
	}
}
