// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Anonymous visitor identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Prefix carried by identifiers generated on this side of the pipeline.
pub const UNIFIED_USER_ID_PREFIX: &str = "uid_";

/// Upper bound for identifiers accepted from other surfaces.
pub const MAX_ID_LEN: usize = 200;

/// Stable anonymous identifier shared across web, app and backend surfaces.
///
/// Generated ids look like `uid_<uuid-v4>`. Ids handed over from another surface
/// are accepted as-is provided they pass [`validate_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnifiedUserId(String);

impl UnifiedUserId {
	#[must_use]
	pub fn new() -> Self {
		Self(format!("{UNIFIED_USER_ID_PREFIX}{}", Uuid::new_v4()))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// True when the id was minted by this pipeline rather than adopted.
	#[must_use]
	pub fn is_generated(&self) -> bool {
		self.0.starts_with(UNIFIED_USER_ID_PREFIX)
	}
}

impl Default for UnifiedUserId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for UnifiedUserId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for UnifiedUserId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		validate_id(s).map(Self)
	}
}

impl AsRef<str> for UnifiedUserId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Validates an externally supplied identifier.
///
/// Rejects empty ids, ids longer than [`MAX_ID_LEN`] and ids containing
/// whitespace or control characters.
pub fn validate_id(s: &str) -> Result<String, CoreError> {
	if s.is_empty() || s.len() > MAX_ID_LEN {
		return Err(CoreError::InvalidId(s.to_string()));
	}
	if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(CoreError::InvalidId(s.to_string()));
	}
	Ok(s.to_string())
}

/// The durable identity record.
///
/// Created once per storage backend. Only `device_fingerprint` changes after
/// creation, and only through an explicit recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedIdentity {
	pub id: UnifiedUserId,
	pub device_fingerprint: String,
	pub created_at: DateTime<Utc>,
}

impl UnifiedIdentity {
	#[must_use]
	pub fn new(device_fingerprint: impl Into<String>, now: DateTime<Utc>) -> Self {
		Self {
			id: UnifiedUserId::new(),
			device_fingerprint: device_fingerprint.into(),
			created_at: now,
		}
	}
}

/// Visit counters kept next to the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitMetrics {
	pub first_visit: DateTime<Utc>,
	pub last_visit: DateTime<Utc>,
	pub visit_count: u32,
}

impl VisitMetrics {
	#[must_use]
	pub fn first(now: DateTime<Utc>) -> Self {
		Self {
			first_visit: now,
			last_visit: now,
			visit_count: 1,
		}
	}

	pub fn record_visit(&mut self, now: DateTime<Utc>) {
		self.last_visit = now;
		self.visit_count = self.visit_count.saturating_add(1);
	}
}

/// Coarse device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
	Mobile,
	Tablet,
	Desktop,
}

impl DeviceType {
	/// Classifies a user agent string. Tablets are checked before phones because
	/// most tablet agents also advertise a mobile platform.
	#[must_use]
	pub fn from_user_agent(user_agent: &str) -> Self {
		let ua = user_agent.to_ascii_lowercase();

		let is_tablet = ["tablet", "ipad", "playbook", "silk"]
			.iter()
			.any(|needle| ua.contains(needle))
			|| (ua.contains("android") && !ua.contains("mobi"));
		if is_tablet {
			return DeviceType::Tablet;
		}

		let is_mobile = [
			"mobile",
			"iphone",
			"ipod",
			"android",
			"blackberry",
			"iemobile",
			"kindle",
			"opera mini",
			"opera mobi",
			"webos",
		]
		.iter()
		.any(|needle| ua.contains(needle));
		if is_mobile {
			DeviceType::Mobile
		} else {
			DeviceType::Desktop
		}
	}
}

impl std::fmt::Display for DeviceType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DeviceType::Mobile => write!(f, "mobile"),
			DeviceType::Tablet => write!(f, "tablet"),
			DeviceType::Desktop => write!(f, "desktop"),
		}
	}
}

impl std::str::FromStr for DeviceType {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"mobile" => Ok(DeviceType::Mobile),
			"tablet" => Ok(DeviceType::Tablet),
			"desktop" => Ok(DeviceType::Desktop),
			_ => Err(CoreError::InvalidDeviceType(s.to_string())),
		}
	}
}
