// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Consent categories and grant state.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Consent category a sink is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
	/// Always granted.
	Necessary,
	Analytics,
	Marketing,
}

impl std::fmt::Display for ConsentCategory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ConsentCategory::Necessary => write!(f, "necessary"),
			ConsentCategory::Analytics => write!(f, "analytics"),
			ConsentCategory::Marketing => write!(f, "marketing"),
		}
	}
}

impl std::str::FromStr for ConsentCategory {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"necessary" => Ok(ConsentCategory::Necessary),
			"analytics" => Ok(ConsentCategory::Analytics),
			"marketing" => Ok(ConsentCategory::Marketing),
			_ => Err(CoreError::InvalidConsentCategory(s.to_string())),
		}
	}
}

/// Granted consent categories.
///
/// `necessary` is not a field: it is always granted and is re-asserted on
/// every deserialization. The default state grants nothing optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConsentWire", into = "ConsentWire")]
pub struct ConsentState {
	pub analytics: bool,
	pub marketing: bool,
}

#[derive(Serialize, Deserialize)]
struct ConsentWire {
	#[serde(default = "granted")]
	necessary: bool,
	#[serde(default)]
	analytics: bool,
	#[serde(default)]
	marketing: bool,
}

fn granted() -> bool {
	true
}

impl From<ConsentWire> for ConsentState {
	fn from(wire: ConsentWire) -> Self {
		Self {
			analytics: wire.analytics,
			marketing: wire.marketing,
		}
	}
}

impl From<ConsentState> for ConsentWire {
	fn from(state: ConsentState) -> Self {
		Self {
			necessary: true,
			analytics: state.analytics,
			marketing: state.marketing,
		}
	}
}

impl ConsentState {
	/// Only necessary processing.
	#[must_use]
	pub fn denied() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn granted_all() -> Self {
		Self {
			analytics: true,
			marketing: true,
		}
	}

	#[must_use]
	pub fn custom(analytics: bool, marketing: bool) -> Self {
		Self {
			analytics,
			marketing,
		}
	}

	#[must_use]
	pub fn necessary(&self) -> bool {
		true
	}

	#[must_use]
	pub fn allows(&self, category: ConsentCategory) -> bool {
		match category {
			ConsentCategory::Necessary => true,
			ConsentCategory::Analytics => self.analytics,
			ConsentCategory::Marketing => self.marketing,
		}
	}

	/// Decodes a stored consent decision, including the legacy bare
	/// `"accepted"` / `"rejected"` values. Returns `None` for unreadable input
	/// so callers fall back to the denied state.
	#[must_use]
	pub fn decode_stored(raw: &str) -> Option<Self> {
		match raw.trim() {
			"accepted" => Some(Self::granted_all()),
			"rejected" => Some(Self::denied()),
			other => serde_json::from_str(other).ok(),
		}
	}

	/// Compact form used in logs and deep links: `analytics:true,marketing:false`.
	#[must_use]
	pub fn summary(&self) -> String {
		format!("analytics:{},marketing:{}", self.analytics, self.marketing)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn default_is_fail_closed() {
		let state = ConsentState::default();
		assert!(state.allows(ConsentCategory::Necessary));
		assert!(!state.allows(ConsentCategory::Analytics));
		assert!(!state.allows(ConsentCategory::Marketing));
	}

	#[test]
	fn legacy_values_decode() {
		assert_eq!(
			ConsentState::decode_stored("accepted"),
			Some(ConsentState::granted_all())
		);
		assert_eq!(
			ConsentState::decode_stored("rejected"),
			Some(ConsentState::denied())
		);
		assert_eq!(ConsentState::decode_stored("garbage"), None);
	}

	#[test]
	fn necessary_cannot_be_revoked_through_storage() {
		let state =
			ConsentState::decode_stored(r#"{"necessary":false,"analytics":true}"#).unwrap();
		assert!(state.necessary());
		assert!(state.analytics);
		assert!(!state.marketing);

		let json = serde_json::to_value(state).unwrap();
		assert_eq!(json["necessary"], true);
	}

	#[test]
	fn summary_format() {
		assert_eq!(
			ConsentState::custom(true, false).summary(),
			"analytics:true,marketing:false"
		);
	}

	proptest! {
		#[test]
		fn category_roundtrip(category in prop_oneof![
			Just(ConsentCategory::Necessary),
			Just(ConsentCategory::Analytics),
			Just(ConsentCategory::Marketing),
		]) {
			let parsed: ConsentCategory = category.to_string().parse().unwrap();
			prop_assert_eq!(category, parsed);
		}

		#[test]
		fn state_roundtrip(analytics: bool, marketing: bool) {
			let state = ConsentState::custom(analytics, marketing);
			let json = serde_json::to_string(&state).unwrap();
			prop_assert_eq!(ConsentState::decode_stored(&json), Some(state));
		}
	}
}
