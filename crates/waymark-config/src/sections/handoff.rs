// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session continuity (handoff) configuration section.

use serde::{Deserialize, Serialize};

const DEFAULT_TTL_SECS: u64 = 10 * 60;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandoffConfigLayer {
	pub base_url: Option<String>,
	pub ttl_secs: Option<u64>,
	pub adopt_remote_identity: Option<bool>,
	pub request_timeout_ms: Option<u64>,
}

impl HandoffConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.base_url.is_some() {
			self.base_url = other.base_url;
		}
		if other.ttl_secs.is_some() {
			self.ttl_secs = other.ttl_secs;
		}
		if other.adopt_remote_identity.is_some() {
			self.adopt_remote_identity = other.adopt_remote_identity;
		}
		if other.request_timeout_ms.is_some() {
			self.request_timeout_ms = other.request_timeout_ms;
		}
	}

	pub fn finalize(self) -> HandoffConfig {
		HandoffConfig {
			base_url: self.base_url,
			ttl_secs: self.ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
			adopt_remote_identity: self.adopt_remote_identity.unwrap_or(false),
			request_timeout_ms: self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffConfig {
	/// Base URL for `/session-continuity` and `/cross-platform-handoff`.
	/// Handoff tokens are only kept in process when unset.
	pub base_url: Option<String>,
	/// Tokens older than this are treated as absent.
	pub ttl_secs: u64,
	/// Replace the local unified user id with the restored one.
	pub adopt_remote_identity: bool,
	pub request_timeout_ms: u64,
}

impl Default for HandoffConfig {
	fn default() -> Self {
		HandoffConfigLayer::default().finalize()
	}
}
