// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for sink API keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "[REDACTED]";

/// A secret string that never prints its contents and is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the secret. Keep the borrow short.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Debug for SecretString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "SecretString({REDACTED})")
	}
}

impl std::fmt::Display for SecretString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(REDACTED)
	}
}

impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl Serialize for SecretString {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer).map(Self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn never_prints_contents() {
		let secret = SecretString::new("ak_live_123");
		assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
		assert_eq!(secret.to_string(), "[REDACTED]");
		assert_eq!(secret.expose(), "ak_live_123");
	}

	#[test]
	fn serializes_redacted() {
		#[derive(Serialize)]
		struct Holder {
			key: SecretString,
		}
		let out = toml::to_string(&Holder {
			key: SecretString::new("ak_live_123"),
		})
		.unwrap();
		assert!(!out.contains("ak_live_123"));
		assert!(out.contains(REDACTED));
	}
}
