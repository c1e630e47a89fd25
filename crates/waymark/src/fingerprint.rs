// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device fingerprint: a soft, stable signal for linking visits from the same
//! device. Not a security identifier.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use waymark_core::DeviceType;

const USER_AGENT_CHARS: usize = 100;
const SURFACE_SAMPLE_CHARS: usize = 50;
const FINGERPRINT_HEX_CHARS: usize = 16;

/// Observable properties of the host device, as reported by the embedding
/// surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEnvironment {
	/// `{width}x{height}x{color_depth}`.
	pub screen: Option<String>,
	pub timezone: Option<String>,
	pub language: Option<String>,
	pub platform: Option<String>,
	pub user_agent: Option<String>,
	/// A short sample of rendering-surface output.
	pub surface_sample: Option<String>,
}

impl DeviceEnvironment {
	#[must_use]
	pub fn device_type(&self) -> DeviceType {
		DeviceType::from_user_agent(self.user_agent.as_deref().unwrap_or_default())
	}

	/// Primary language subtag (`en` for `en-US`).
	#[must_use]
	pub fn locale(&self) -> Option<String> {
		self
			.language
			.as_deref()
			.and_then(|l| l.split(['-', '_']).next())
			.filter(|l| !l.is_empty())
			.map(str::to_ascii_lowercase)
	}
}

fn truncated(value: Option<&str>, max_chars: usize) -> String {
	value
		.map(|v| v.chars().take(max_chars).collect())
		.unwrap_or_default()
}

/// First 16 hex characters of the SHA-256 of the fixed environment tuple.
#[must_use]
pub fn compute_fingerprint(env: &DeviceEnvironment) -> String {
	let tuple = [
		env.screen.clone().unwrap_or_default(),
		env.timezone.clone().unwrap_or_default(),
		env.language.clone().unwrap_or_default(),
		env.platform.clone().unwrap_or_default(),
		truncated(env.user_agent.as_deref(), USER_AGENT_CHARS),
		truncated(env.surface_sample.as_deref(), SURFACE_SAMPLE_CHARS),
	];
	let serialized = serde_json::to_string(&tuple).unwrap_or_default();

	let digest = hex::encode(Sha256::digest(serialized.as_bytes()));
	digest[..FINGERPRINT_HEX_CHARS].to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn desktop() -> DeviceEnvironment {
		DeviceEnvironment {
			screen: Some("1920x1080x24".into()),
			timezone: Some("America/Chicago".into()),
			language: Some("en-US".into()),
			platform: Some("MacIntel".into()),
			user_agent: Some("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".into()),
			surface_sample: Some("data:image/png;base64,iVBORw0KGgo".into()),
		}
	}

	#[test]
	fn fingerprint_is_sixteen_hex_chars() {
		let fp = compute_fingerprint(&desktop());
		assert_eq!(fp.len(), 16);
		assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn user_agent_beyond_limit_is_ignored() {
		let mut a = desktop();
		let mut b = desktop();
		let base = "x".repeat(USER_AGENT_CHARS);
		a.user_agent = Some(format!("{base}tail-one"));
		b.user_agent = Some(format!("{base}tail-two"));
		assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
	}

	#[test]
	fn timezone_change_changes_fingerprint() {
		let mut other = desktop();
		other.timezone = Some("Europe/Berlin".into());
		assert_ne!(compute_fingerprint(&desktop()), compute_fingerprint(&other));
	}

	#[test]
	fn locale_is_primary_subtag() {
		assert_eq!(desktop().locale().as_deref(), Some("en"));
		assert_eq!(DeviceEnvironment::default().locale(), None);
	}

	proptest! {
		#[test]
		fn fingerprint_is_deterministic(screen in "[0-9]{3,4}x[0-9]{3,4}", tz in "[A-Za-z/_]{0,30}") {
			let env = DeviceEnvironment {
				screen: Some(screen),
				timezone: Some(tz),
				..Default::default()
			};
			prop_assert_eq!(compute_fingerprint(&env), compute_fingerprint(&env.clone()));
		}
	}
}
