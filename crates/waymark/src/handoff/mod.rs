// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session continuity between the web, iOS and Android surfaces.
//!
//! A handoff token snapshots identity and session state on the source
//! surface. It is stored locally and in a remote [`HandoffStore`], and the
//! target surface restores it within the TTL. Tokens are not consumed by a
//! restore.

mod http;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use waymark_common_http::RetryableError;
use waymark_config::HandoffConfig;
use waymark_core::UnifiedUserId;

pub use http::HttpHandoffStore;

use crate::beacon::BeaconSender;
use crate::clock::Clock;
use crate::diagnostics::{Counter, Diagnostics};
use crate::identity::IdentityResolver;
use crate::storage::{keys, read_json, write_json};

const CONTINUITY_PATH: &str = "session-continuity";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
	#[default]
	Web,
	Ios,
	Android,
}

impl fmt::Display for Surface {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Surface::Web => "web",
			Surface::Ios => "ios",
			Surface::Android => "android",
		})
	}
}

/// Identity and session state carried across surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffToken {
	pub session_id: String,
	pub unified_user_id: String,
	/// Unix milliseconds.
	pub handoff_timestamp: i64,
	#[serde(default)]
	pub session_data: Map<String, Value>,
	pub source_platform: Surface,
	pub target_platform: Surface,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_fingerprint: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source_url: Option<String>,
}

impl HandoffToken {
	/// Age relative to `now`. Tokens stamped in the future count as fresh.
	/// `None` when the timestamp is too far from `now` to measure.
	pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
		let elapsed = elapsed_millis(now, self.handoff_timestamp)?;
		Duration::try_milliseconds(elapsed.max(0))
	}
}

/// Milliseconds from `stamped` to `now`, negative when `stamped` is in the
/// future. `None` on overflow.
fn elapsed_millis(now: DateTime<Utc>, stamped: i64) -> Option<i64> {
	now.timestamp_millis().checked_sub(stamped)
}

/// A timestamp is usable when it lies within `ttl` of `now` on either side.
fn within_ttl(elapsed: Option<i64>, ttl: Duration) -> bool {
	let ttl_ms = ttl.num_milliseconds().unsigned_abs();
	elapsed.is_some_and(|ms| ms.unsigned_abs() <= ttl_ms)
}

/// Telemetry record for a cross-surface transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
	pub source_platform: Surface,
	pub target_platform: Surface,
	pub handoff_type: String,
	pub unified_user_id: String,
	pub session_id: String,
	pub timestamp: i64,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Restore request parsed from the landing URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
	pub session_id: String,
	pub handoff_timestamp: i64,
}

impl HandoffRequest {
	/// Reads `session_id` and `handoff_timestamp` from the query. Both must
	/// be present and the timestamp numeric.
	pub fn from_url(url: &Url) -> Option<Self> {
		let mut session_id = None;
		let mut handoff_timestamp = None;
		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"session_id" if !value.is_empty() => session_id = Some(value.into_owned()),
				"handoff_timestamp" => handoff_timestamp = value.parse().ok(),
				_ => {}
			}
		}
		Some(Self {
			session_id: session_id?,
			handoff_timestamp: handoff_timestamp?,
		})
	}
}

/// Written to ephemeral storage after a successful restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuedSession {
	pub original_unified_user_id: String,
	pub original_session_id: String,
	pub restored_at: DateTime<Utc>,
	#[serde(default)]
	pub session_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoredHandoff {
	pub token: HandoffToken,
	pub continued: ContinuedSession,
	pub age: Duration,
	/// Whether the local identity now uses the token's unified user id.
	pub adopted_identity: bool,
}

#[derive(Debug, Error)]
pub enum HandoffError {
	#[error("HTTP request failed: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("server error ({status}): {message}")]
	Server { status: u16, message: String },

	#[error("invalid handoff payload: {0}")]
	Decode(String),
}

impl RetryableError for HandoffError {
	fn is_retryable(&self) -> bool {
		match self {
			HandoffError::Transport(e) => e.is_retryable(),
			HandoffError::Server { status, .. } => reqwest::StatusCode::from_u16(*status)
				.map(waymark_common_http::RetryConfig::is_retryable_status)
				.unwrap_or(false),
			HandoffError::Decode(_) => false,
		}
	}
}

/// Remote persistence for handoff tokens.
#[async_trait]
pub trait HandoffStore: Send + Sync + fmt::Debug {
	async fn put(&self, token: &HandoffToken) -> Result<(), HandoffError>;

	/// `Ok(None)` when no token exists for `session_id`.
	async fn get(&self, session_id: &str) -> Result<Option<HandoffToken>, HandoffError>;

	async fn record_handoff(&self, record: &HandoffRecord) -> Result<(), HandoffError>;
}

/// In-process store for tests and single-device setups.
#[derive(Debug, Default)]
pub struct MemoryHandoffStore {
	tokens: Mutex<HashMap<String, HandoffToken>>,
	records: Mutex<Vec<HandoffRecord>>,
}

impl MemoryHandoffStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, token: HandoffToken) {
		self.tokens.lock().insert(token.session_id.clone(), token);
	}

	pub fn records(&self) -> Vec<HandoffRecord> {
		self.records.lock().clone()
	}
}

#[async_trait]
impl HandoffStore for MemoryHandoffStore {
	async fn put(&self, token: &HandoffToken) -> Result<(), HandoffError> {
		self.insert(token.clone());
		Ok(())
	}

	async fn get(&self, session_id: &str) -> Result<Option<HandoffToken>, HandoffError> {
		Ok(self.tokens.lock().get(session_id).cloned())
	}

	async fn record_handoff(&self, record: &HandoffRecord) -> Result<(), HandoffError> {
		self.records.lock().push(record.clone());
		Ok(())
	}
}

/// Prepares and restores handoffs for the local surface.
#[derive(Debug)]
pub struct HandoffService {
	identity: Arc<IdentityResolver>,
	clock: Arc<dyn Clock>,
	diagnostics: Arc<Diagnostics>,
	config: HandoffConfig,
	surface: Surface,
	store: Option<Arc<dyn HandoffStore>>,
	beacon: Option<BeaconSender>,
}

impl HandoffService {
	pub fn new(
		identity: Arc<IdentityResolver>,
		clock: Arc<dyn Clock>,
		diagnostics: Arc<Diagnostics>,
		config: HandoffConfig,
	) -> Self {
		Self {
			identity,
			clock,
			diagnostics,
			config,
			surface: Surface::Web,
			store: None,
			beacon: None,
		}
	}

	pub fn with_store(mut self, store: Arc<dyn HandoffStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn with_surface(mut self, surface: Surface) -> Self {
		self.surface = surface;
		self
	}

	/// Enables [`Self::send_unload_state`]; it also needs `base_url`.
	pub fn with_beacon(mut self, beacon: BeaconSender) -> Self {
		self.beacon = Some(beacon);
		self
	}

	pub fn ttl(&self) -> Duration {
		Duration::from_std(std::time::Duration::from_secs(self.config.ttl_secs)).unwrap_or(Duration::MAX)
	}

	/// Snapshots identity and session state for `target`. The token is
	/// written to durable storage and, best effort, to the remote store.
	pub async fn prepare_handoff(&self, target: Surface, extra: Map<String, Value>) -> HandoffToken {
		let now = self.clock.now();
		let identity = self.identity.ensure_identity();
		let session = self
			.identity
			.current_session()
			.unwrap_or_else(|| self.identity.ensure_session());
		let page = self.identity.current_page();

		let mut session_data = Map::new();
		session_data.insert("page_views".into(), json!(session.page_views));
		session_data.insert(
			"time_on_site_ms".into(),
			json!(session.duration().num_milliseconds()),
		);
		session_data.insert(
			"last_activity".into(),
			json!(session.last_activity_at.timestamp_millis()),
		);
		if let Some(referrer) = &session.referrer {
			session_data.insert("referrer".into(), json!(referrer));
		}
		session_data.extend(extra.clone());

		let token = HandoffToken {
			session_id: session.id.to_string(),
			unified_user_id: identity.id.to_string(),
			handoff_timestamp: now.timestamp_millis(),
			session_data,
			source_platform: self.surface,
			target_platform: target,
			device_fingerprint: Some(identity.device_fingerprint.clone()),
			source_url: page.map(|p| p.url.to_string()),
		};

		if let Err(e) = write_json(
			self.identity.storage().durable.as_ref(),
			keys::CROSS_PLATFORM,
			&token,
		) {
			self.diagnostics.incr(Counter::StorageFailures);
			warn!(error = %e, "failed to store handoff token locally");
		}

		if let Some(store) = &self.store {
			if let Err(e) = store.put(&token).await {
				self.diagnostics.incr(Counter::RemotePersistFailures);
				warn!(session_id = %token.session_id, error = %e, "failed to persist handoff token");
			}

			let record = HandoffRecord {
				source_platform: self.surface,
				target_platform: target,
				handoff_type: "session_handoff".to_string(),
				unified_user_id: token.unified_user_id.clone(),
				session_id: token.session_id.clone(),
				timestamp: token.handoff_timestamp,
				extra,
			};
			if let Err(e) = store.record_handoff(&record).await {
				self.diagnostics.incr(Counter::RemotePersistFailures);
				warn!(session_id = %token.session_id, error = %e, "failed to record handoff");
			}
		}

		self.diagnostics.incr(Counter::HandoffsPrepared);
		info!(
			session_id = %token.session_id,
			target = %target,
			"handoff prepared"
		);
		token
	}

	/// The token last prepared on this device, if any.
	pub fn local_token(&self) -> Option<HandoffToken> {
		read_json(self.identity.storage().durable.as_ref(), keys::CROSS_PLATFORM)
			.unwrap_or_else(|e| {
				warn!(error = %e, "failed to read local handoff token");
				None
			})
	}

	/// Restores a handoff. Returns `None` when the request or the stored
	/// token is older than the TTL, or when no token is found.
	pub async fn restore_handoff(&self, request: &HandoffRequest) -> Option<RestoredHandoff> {
		let now = self.clock.now();
		let ttl = self.ttl();

		let request_age = elapsed_millis(now, request.handoff_timestamp);
		if !within_ttl(request_age, ttl) {
			self.diagnostics.incr(Counter::HandoffsRejected);
			debug!(
				session_id = %request.session_id,
				age_ms = ?request_age,
				"handoff request expired"
			);
			return None;
		}

		let token = self.lookup(&request.session_id).await?;

		let stored_age = elapsed_millis(now, token.handoff_timestamp);
		let age = match token.age(now) {
			Some(age) if within_ttl(stored_age, ttl) => age,
			_ => {
				self.diagnostics.incr(Counter::HandoffsRejected);
				debug!(
					session_id = %token.session_id,
					age_ms = ?stored_age,
					"stored handoff token expired"
				);
				return None;
			}
		};

		let continued = ContinuedSession {
			original_unified_user_id: token.unified_user_id.clone(),
			original_session_id: token.session_id.clone(),
			restored_at: now,
			session_data: token.session_data.clone(),
		};
		if let Err(e) = write_json(
			self.identity.storage().ephemeral.as_ref(),
			keys::CONTINUED_SESSION,
			&continued,
		) {
			self.diagnostics.incr(Counter::StorageFailures);
			warn!(error = %e, "failed to store continued session");
		}

		let adopted_identity = self.config.adopt_remote_identity && self.adopt(&token);

		self.diagnostics.incr(Counter::HandoffsRestored);
		info!(
			session_id = %token.session_id,
			source = %token.source_platform,
			age_ms = age.num_milliseconds(),
			adopted_identity,
			"handoff restored"
		);

		Some(RestoredHandoff {
			token,
			continued,
			age,
			adopted_identity,
		})
	}

	/// The continued-session record written by the last restore.
	pub fn continued_session(&self) -> Option<ContinuedSession> {
		read_json(
			self.identity.storage().ephemeral.as_ref(),
			keys::CONTINUED_SESSION,
		)
		.unwrap_or_else(|e| {
			warn!(error = %e, "failed to read continued session");
			None
		})
	}

	/// Posts final session state without waiting for a response. Returns
	/// false when no beacon or endpoint is configured.
	pub fn send_unload_state(&self, final_url: &Url) -> bool {
		let (Some(beacon), Some(base_url)) = (&self.beacon, &self.config.base_url) else {
			return false;
		};
		let Some(session) = self.identity.current_session() else {
			return false;
		};
		let identity = self.identity.ensure_identity();

		let body = json!({
			"session_id": session.id.to_string(),
			"unified_user_id": identity.id.to_string(),
			"final_url": final_url.as_str(),
			"session_duration_ms": session.duration().num_milliseconds(),
			"page_views": session.page_views,
			"timestamp": self.clock.now().timestamp_millis(),
		});
		let url = format!("{}/{CONTINUITY_PATH}", base_url.trim_end_matches('/'));
		beacon.send("unload_state", url, body)
	}

	async fn lookup(&self, session_id: &str) -> Option<HandoffToken> {
		if let Some(store) = &self.store {
			match store.get(session_id).await {
				Ok(Some(token)) => return Some(token),
				Ok(None) => debug!(session_id, "handoff token not found remotely"),
				Err(e) => warn!(session_id, error = %e, "failed to fetch handoff token"),
			}
		}

		let local = self
			.local_token()
			.filter(|token| token.session_id == session_id);
		if local.is_none() {
			debug!(session_id, "no handoff token available");
		}
		local
	}

	fn adopt(&self, token: &HandoffToken) -> bool {
		match token.unified_user_id.parse::<UnifiedUserId>() {
			Ok(id) => {
				self.identity.adopt_unified_user_id(id);
				true
			}
			Err(e) => {
				warn!(error = %e, "handoff carries an invalid unified user id");
				false
			}
		}
	}
}
