// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity and session configuration section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfigLayer {
	pub session_timeout_secs: Option<u64>,
	/// Directory for the durable file store. In-memory storage when unset.
	pub storage_dir: Option<PathBuf>,
}

impl IdentityConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.session_timeout_secs.is_some() {
			self.session_timeout_secs = other.session_timeout_secs;
		}
		if other.storage_dir.is_some() {
			self.storage_dir = other.storage_dir;
		}
	}

	pub fn finalize(self) -> IdentityConfig {
		IdentityConfig {
			session_timeout_secs: self
				.session_timeout_secs
				.unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS),
			storage_dir: self.storage_dir,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
	pub session_timeout_secs: u64,
	pub storage_dir: Option<PathBuf>,
}

impl Default for IdentityConfig {
	fn default() -> Self {
		IdentityConfigLayer::default().finalize()
	}
}
