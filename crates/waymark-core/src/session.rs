// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Browsing session records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::identity::validate_id;

pub const SESSION_ID_PREFIX: &str = "sess_";

/// Inactivity window after which a session is superseded.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 30 * 60;

/// Most recent events retained on a session record.
pub const MAX_SESSION_EVENTS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	#[must_use]
	pub fn new() -> Self {
		Self(format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4()))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for SessionId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		validate_id(s).map(Self)
	}
}

/// Compact trace of an event tracked during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEventRecord {
	pub event_name: String,
	pub event_id: String,
	pub timestamp: DateTime<Utc>,
}

/// A single engagement period. Superseded, never deleted, once the inactivity
/// window elapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	pub last_activity_at: DateTime<Utc>,
	pub page_views: u32,
	#[serde(default)]
	pub events: Vec<SessionEventRecord>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub referrer: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub landing_page: Option<String>,
}

impl Session {
	#[must_use]
	pub fn start(
		now: DateTime<Utc>,
		referrer: Option<String>,
		landing_page: Option<String>,
	) -> Self {
		Self {
			id: SessionId::new(),
			started_at: now,
			last_activity_at: now,
			page_views: 1,
			events: Vec::new(),
			referrer,
			landing_page,
		}
	}

	/// A session stays valid while `now - last_activity_at < timeout`.
	#[must_use]
	pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
		now.signed_duration_since(self.last_activity_at) >= timeout
	}

	/// Records a page-level activity.
	pub fn touch(&mut self, now: DateTime<Utc>) {
		self.last_activity_at = now;
		self.page_views = self.page_views.saturating_add(1);
	}

	/// Appends an event trace and extends activity without counting a page view.
	pub fn record_event(&mut self, record: SessionEventRecord) {
		if record.timestamp > self.last_activity_at {
			self.last_activity_at = record.timestamp;
		}
		self.events.push(record);
		if self.events.len() > MAX_SESSION_EVENTS {
			let overflow = self.events.len() - MAX_SESSION_EVENTS;
			self.events.drain(..overflow);
		}
	}

	#[must_use]
	pub fn duration(&self) -> Duration {
		self.last_activity_at.signed_duration_since(self.started_at)
	}
}
